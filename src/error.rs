//! Verse protocol error types.
//!
//! # Error Classification
//!
//! Errors are classified by the layer that can recover from them:
//!
//! | Error               | Recovered by                       | Terminal for        |
//! |---------------------|------------------------------------|---------------------|
//! | `ConnectError`      | retrying another candidate or host | one connect attempt |
//! | `DecodeError`       | discarding one frame               | nothing             |
//! | `CommandError`      | nobody (programmer error)          | the call            |
//! | `NegotiationError`  | starting a fresh handshake         | one handshake       |
//! | `ConnectionLost`    | the session loop (normal exit)     | one session         |
//! | `ProtocolViolation` | nobody                             | one session         |
//!
//! Nothing here aborts the process; every failure path hands a classified
//! error back to the caller.

use thiserror::Error;

use crate::command::{CommandKind, DecodeError, TerminateReason};
use crate::negotiation::MethodId;

/// Verse protocol errors.
#[derive(Error, Debug)]
pub enum VerseError {
    /// Name resolution or connection establishment failed.
    #[error("Connect error: {0}")]
    Connect(#[from] ConnectError),

    /// Accepting an incoming connection failed.
    #[error("Accept error: {0}")]
    Accept(#[source] std::io::Error),

    /// Malformed or untrusted wire data.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Command misuse by the caller.
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// Handshake failed.
    #[error("Negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    /// The peer closed the connection or the transport failed.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Too many malformed frames on one session.
    #[error("Protocol violation: {malformed} malformed frames (tolerance {tolerance})")]
    ProtocolViolation {
        /// Malformed frames seen on the session.
        malformed: u32,
        /// Configured tolerance that was exceeded.
        tolerance: u32,
    },

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Verse operations
pub type Result<T> = std::result::Result<T, VerseError>;

/// Connection establishment errors.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The host address string could not be parsed.
    #[error("Invalid host address '{0}'")]
    InvalidAddress(String),

    /// Name resolution failed or produced no candidates.
    #[error("Cannot resolve {host}:{service}: {reason}")]
    Unresolvable {
        /// Host name.
        host: String,
        /// Service (port).
        service: String,
        /// Resolver message.
        reason: String,
    },

    /// Every resolved candidate refused or timed out.
    #[error("All {attempts} candidate(s) for {host}:{service} failed (last: {last_error})")]
    AllCandidatesFailed {
        /// Host name.
        host: String,
        /// Service (port).
        service: String,
        /// Number of candidates tried.
        attempts: usize,
        /// Error of the last candidate.
        last_error: String,
    },
}

/// Caller misuse of the command API.
///
/// These are programmer errors, never caused by network input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Raw tag does not name a registered kind.
    #[error("Unknown command kind {0:#04x}")]
    UnknownKind(u8),

    /// Synthetic kinds never cross the wire.
    #[error("{0} is synthetic and cannot be encoded or sent")]
    NotWireCapable(CommandKind),

    /// Only synthetic kinds may be dispatched locally.
    #[error("{0} is a wire command and cannot be synthesized")]
    NotSynthetic(CommandKind),

    /// The command was destroyed and holds sentinel values.
    #[error("{0} has been cleared")]
    Cleared(CommandKind),

    /// A required variable-length field is empty.
    #[error("{kind}: field '{field}' must not be empty")]
    EmptyField {
        /// Command kind.
        kind: CommandKind,
        /// Field name.
        field: &'static str,
    },

    /// A variable-length field exceeds its declared maximum.
    #[error("{kind}: field '{field}' is {len} bytes (max {max})")]
    FieldTooLong {
        /// Command kind.
        kind: CommandKind,
        /// Field name.
        field: &'static str,
        /// Actual length.
        len: usize,
        /// Declared maximum.
        max: usize,
    },
}

/// Handshake failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    /// Credentials must offer at least one method.
    #[error("No authentication methods offered")]
    NoOfferedMethods,

    /// Identity must be 1..=64 bytes to fit an `Auth_Step`.
    #[error("Identity is {0} bytes, expected 1..=64")]
    InvalidIdentity(usize),

    /// Method id 0 is reserved.
    #[error("Invalid authentication method {0}")]
    InvalidMethod(MethodId),

    /// Client and host share no authentication method.
    #[error("No common authentication method")]
    NoCommonMethod,

    /// The local side has no implementation for the agreed method.
    #[error("Authentication method {0} is not implemented locally")]
    UnsupportedMethod(MethodId),

    /// The host rejected the credentials.
    #[error("Authentication rejected")]
    AuthRejected,

    /// The host kept asking for steps past the configured limit.
    #[error("Authentication exceeded {0} rounds")]
    TooManyRounds(u32),

    /// The peer ended the handshake.
    #[error("Peer terminated the handshake ({0:?})")]
    PeerTerminated(TerminateReason),

    /// A waiting state exceeded its time bound.
    #[error("Timed out in state {0}")]
    Timeout(&'static str),

    /// The peer sent a command that is not legal in the current state.
    #[error("Unexpected {kind} in state {state}")]
    UnexpectedCommand {
        /// Handshake state name.
        state: &'static str,
        /// Offending command kind.
        kind: CommandKind,
    },

    /// The handshake is not in a state that allows the operation.
    #[error("Invalid handshake operation in state {0}")]
    InvalidState(&'static str),
}

impl VerseError {
    /// Build a `ConnectionLost` from any displayable cause.
    pub fn lost(reason: impl std::fmt::Display) -> Self {
        VerseError::ConnectionLost(reason.to_string())
    }

    /// Whether this error ends a session without being a fault.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, VerseError::ConnectionLost(_))
    }
}

impl NegotiationError {
    /// Reason to send the peer when the handshake fails with this error.
    pub fn terminate_reason(&self) -> Option<TerminateReason> {
        match self {
            NegotiationError::NoCommonMethod | NegotiationError::UnsupportedMethod(_) => {
                Some(TerminateReason::NoCommonMethod)
            },
            NegotiationError::AuthRejected | NegotiationError::TooManyRounds(_) => {
                Some(TerminateReason::AuthFailed)
            },
            NegotiationError::UnexpectedCommand { .. } | NegotiationError::InvalidMethod(_) => {
                Some(TerminateReason::ProtocolViolation)
            },
            NegotiationError::Timeout(_) => Some(TerminateReason::Normal),
            NegotiationError::NoOfferedMethods
            | NegotiationError::InvalidIdentity(_)
            | NegotiationError::PeerTerminated(_)
            | NegotiationError::InvalidState(_) => None,
        }
    }
}

impl From<toml::de::Error> for VerseError {
    fn from(err: toml::de::Error) -> Self {
        VerseError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_lost_classification() {
        assert!(VerseError::lost("peer closed").is_connection_lost());
        assert!(!VerseError::Config("x".to_string()).is_connection_lost());
    }

    #[test]
    fn test_negotiation_error_converts() {
        let err: VerseError = NegotiationError::NoCommonMethod.into();
        assert_eq!(
            err.to_string(),
            "Negotiation failed: No common authentication method"
        );
    }

    #[test]
    fn test_terminate_reason_for_failures() {
        assert_eq!(
            NegotiationError::NoCommonMethod.terminate_reason(),
            Some(TerminateReason::NoCommonMethod)
        );
        assert_eq!(
            NegotiationError::AuthRejected.terminate_reason(),
            Some(TerminateReason::AuthFailed)
        );
        assert_eq!(
            NegotiationError::PeerTerminated(TerminateReason::Normal).terminate_reason(),
            None
        );
    }

    #[test]
    fn test_protocol_violation_message() {
        let err = VerseError::ProtocolViolation {
            malformed: 9,
            tolerance: 8,
        };
        assert!(err.to_string().contains("9 malformed frames"));
    }
}
