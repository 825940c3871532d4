//! Stream transport.
//!
//! A [`StreamConnection`] wraps one reliable, ordered byte stream. Plain TCP
//! is the default; any `AsyncRead + AsyncWrite` stream (a TLS session, an
//! in-memory duplex) gets the same lifecycle:
//!
//! ```text
//!   open_as_client / accept_as_host / from_stream
//!                    │
//!                    ▼
//!                 ┌──────┐  shutdown()   ┌─────────┐        ┌────────┐
//!                 │ Open │ ────────────▶ │ Closing │ ─────▶ │ Closed │
//!                 └──────┘               └─────────┘        └────────┘
//!                    │        close() / peer EOF / CloseHandle  ▲
//!                    └──────────────────────────────────────────┘
//! ```

mod address;
mod stream;

pub use address::{resolve_service, HostAddress, DEFAULT_SERVICE};
pub use stream::{CloseHandle, StreamConnection};

/// Which end of the connection we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// We dialed out
    Client,
    /// We accepted
    Host,
}

impl ConnectionRole {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Host => "host",
        }
    }
}

impl std::fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Usable for reads and writes
    Open,
    /// Graceful shutdown in progress
    Closing,
    /// Resources released
    Closed,
}
