//! Connection negotiation.
//!
//! Turns a bare stream connection into an authenticated [`Session`]:
//!
//! ```text
//! Client                               Host
//!    |                                   |
//!    |------- Method_Offer (m1..mN) ---->|  client's preference order
//!    |<------ Method_Offer (common) -----|  host's preference order
//!    |                                   |  or Terminate(no common method)
//!    |------- Method_Selection (m) ----->|
//!    |------- Auth_Step (m, id, data) -->|
//!    |<------ Auth_Result (in progress) -|  challenge methods only
//!    |------- Auth_Step (m, id, resp) -->|
//!    |<------ Auth_Result (accepted) ----|
//!    |                                   |
//!    |====== session commands ==========>|
//! ```
//!
//! The handshake itself is sans-io ([`ClientHandshake`], [`HostHandshake`]);
//! [`negotiate`], [`negotiate_client`] and [`negotiate_host`] drive it over a
//! connection with a timeout on every waiting state.
//!
//! ## Methods
//!
//! | Id | Name          | Round trips | Secret on the wire |
//! |----|---------------|-------------|--------------------|
//! | 1  | `NONE`        | 1           | no                 |
//! | 2  | `PLAINTEXT`   | 1           | yes                |
//! | 3  | `HMAC-SHA256` | 2           | no                 |
//!
//! # Usage
//!
//! ```rust,ignore
//! use verse::config::Config;
//! use verse::negotiation::{negotiate, CredentialDescriptor, MethodId};
//!
//! let creds = CredentialDescriptor::new("alice", "wonderland", [MethodId::PLAINTEXT])?;
//! let session = negotiate("localhost:12345", creds, &Config::default()).await?;
//! ```
//!
//! [`Session`]: crate::session::Session

mod credentials;
mod driver;
mod method;
mod state;

pub use credentials::{CredentialDescriptor, CredentialStore, MemoryCredentialStore, MethodId};
pub use driver::{negotiate, negotiate_client, negotiate_host};
#[cfg(feature = "crypto")]
pub use method::HmacChallengeMethod;
pub use method::{AuthExchange, AuthMethod, AuthMethods, AuthVerdict, NoneMethod, PlaintextMethod};
pub use state::{select_method, ClientHandshake, FailureKind, HostHandshake, NegotiationState};

/// Authentication round trips allowed before the handshake fails
pub const MAX_AUTH_ROUNDS: u32 = 4;
