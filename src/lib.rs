//! # Verse - Session Protocol Engine
//!
//! Real-time, session-based exchange of structured state (nodes, tag groups,
//! tags) between a host and its clients over a reliable byte stream.
//!
//! ## Features
//!
//! - **Command envelope**: one [`Command`] sum type for every wire message and
//!   every locally synthesized event, backed by a compile-time registry
//! - **Negotiation**: method offer/selection and pluggable authentication
//!   (`NONE`, `PLAINTEXT`, `HMAC-SHA256` challenge/response)
//! - **Session loop**: read, decode, dispatch, write, keep-alive; malformed
//!   input is counted and skipped, never fatal on its own
//! - **Host**: TCP listener running one negotiated session per client task
//!
//! ## Protocol Overview
//!
//! ### Architecture
//!
//! ```text
//! Client                         Host
//!    |                             |
//!    |---- Method_Offer ---------->|
//!    |<--- Method_Offer (common) --|   negotiation
//!    |---- Method_Selection ------>|
//!    |---- Auth_Step ------------->|
//!    |<--- Auth_Result ------------|
//!    |                             |
//!    |==== Node / TagGroup / Tag =>|   session
//!    |<=== Node / TagGroup / Tag ==|
//!    |                             |
//!    |---- Terminate ------------->|
//! ```
//!
//! ### Negotiation State Machine
//!
//! ```text
//!   [Init] -> [ResolvingHost] -> [AwaitingMethodOffer] -> [MethodAgreed]
//!                                                              |
//!   [Established] <------------------------------- [Authenticating]
//!
//!   any non-terminal state -> [Failed] -> [Closed]
//! ```
//!
//! ### Wire Format
//!
//! ```text
//! [len: u16 BE][kind: u8][body: len - 1 bytes]
//! ```
//!
//! | Tag          | Kind               | Direction      |
//! |--------------|--------------------|----------------|
//! | `0x01-0x06`  | negotiation        | handshake only |
//! | `0x20-0x21`  | node create/destroy| bidirectional  |
//! | `0x40-0x41`  | tag group          | bidirectional  |
//! | `0x44`       | string tag value   | bidirectional  |
//! | `0xC0-0xFF`  | synthetic          | never on wire  |
//!
//! ## Quick Start
//!
//! ### Client
//!
//! ```rust,ignore
//! use verse::{negotiate, AckingHandler, Config, CredentialDescriptor, MethodId};
//!
//! let config = Config::load()?;
//! let creds = CredentialDescriptor::new("alice", "wonderland", [MethodId::PLAINTEXT])?;
//! let session = negotiate("localhost:12345", creds, &config).await?;
//!
//! let handle = session.handle();
//! handle.send(verse::Command::taggroup_create(7, 3, 0))?;
//! session.run(AckingHandler).await?;
//! ```
//!
//! ### Host
//!
//! ```rust,ignore
//! use verse::{AckingHandler, Config, Host};
//!
//! let host = Host::bind(Config::load()?).await?;
//! host.serve(|| AckingHandler).await?;
//! ```
//!
//! ## Modules
//!
//! - [`command`]: Command envelope, registry, codec and framing
//! - [`negotiation`]: Credentials, authentication methods, handshake
//! - [`session`]: Session loop and handler boundary
//! - [`transport`]: Stream connection lifecycle and host addresses
//! - [`host`]: Listener spawning one session per client
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod command;
pub mod config;
pub mod error;
pub mod host;
pub mod negotiation;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use command::{Command, CommandKind, FrameDecoder};
pub use config::Config;
pub use error::{Result, VerseError};
pub use host::{Host, HostHandle};
pub use negotiation::{negotiate, CredentialDescriptor, MethodId};
pub use session::{AckingHandler, Outbox, Session, SessionExit, SessionHandle, SessionHandler};
pub use transport::{ConnectionRole, HostAddress, StreamConnection};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Verse protocol version
pub const PROTOCOL_VERSION: &str = "1.0";
