//! Command envelopes and the per-kind operation registry.
//!
//! Every message that crosses the wire, and every event the session
//! fabricates for itself, is a [`Command`]. All kinds share one lifecycle:
//!
//! | Operation  | Wire kinds | Synthetic kinds |
//! |------------|------------|-----------------|
//! | construct  | yes        | yes             |
//! | describe   | yes        | yes             |
//! | destroy    | yes        | yes             |
//! | encode     | yes        | `NotWireCapable`|
//! | decode     | yes        | `SyntheticKind` |
//!
//! # Wire Format
//!
//! On the stream each command is carried in a length-prefixed frame:
//!
//! ```text
//! [len: u16 BE][kind: u8][body: len - 1 bytes]
//! ```
//!
//! The frame is the recovery boundary: a command that fails to decode is
//! dropped without losing sync with the stream. See [`FrameDecoder`].
//!
//! # Synthetic Commands
//!
//! Tags `0xC0..=0xFF` are reserved for synthetic commands. They let the
//! session dispatch locally-known outcomes (e.g. "my tag group creation
//! succeeded") through the same path as peer messages:
//!
//! ```rust,ignore
//! use verse::command::Command;
//!
//! let ack = Command::taggroup_create_ack(7, 3);
//! assert_eq!(ack.describe(), "TagGroup_Create_Ack: Node_ID: 7, TagGroup_ID: 3");
//! assert!(ack.encode().is_err());
//! ```

mod buffer;
mod codec;
mod kind;
mod registry;

use std::fmt;

use zeroize::Zeroize;

pub use buffer::{encode_frame, FrameDecoder, DEFAULT_MAX_FRAME_LEN, FRAME_HEADER_LEN};
pub use codec::{decode, encode, DecodeError};
pub use kind::{CommandKind, SYNTHETIC_BASE};
pub use registry::{lookup, BodyShape, CommandSpec};

use crate::error::CommandError;
use crate::negotiation::MethodId;

/// Sentinel for a cleared node id
pub const INVALID_NODE_ID: u32 = u32::MAX;

/// Sentinel for a cleared tag group id
pub const INVALID_TAGGROUP_ID: u16 = u16::MAX;

/// Sentinel for a cleared tag id
pub const INVALID_TAG_ID: u16 = u16::MAX;

/// Sentinel for a cleared user id
pub const INVALID_USER_ID: u16 = u16::MAX;

/// Sentinel for a cleared custom type
pub const INVALID_CUSTOM_TYPE: u16 = u16::MAX;

/// Maximum methods in one offer
pub const MAX_METHODS: usize = 16;

/// Maximum identity length in bytes
pub const MAX_IDENTITY_LEN: usize = 64;

/// Maximum authentication step payload in bytes
pub const MAX_AUTH_DATA_LEN: usize = 512;

/// Maximum string tag value in bytes
pub const MAX_TAG_STRING_LEN: usize = 1024;

/// Host verdict carried by `AuthResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthStatus {
    /// Credentials refused
    Rejected = 0,
    /// Credentials accepted, session established
    Accepted = 1,
    /// Another step is required (data carries the challenge)
    InProgress = 2,
    /// Sentinel left by `destroy`; never encoded or decoded
    Invalid = 0xFF,
}

impl AuthStatus {
    /// Parse a wire byte; the sentinel is not a legal wire value.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AuthStatus::Rejected),
            1 => Some(AuthStatus::Accepted),
            2 => Some(AuthStatus::InProgress),
            _ => None,
        }
    }

    /// Wire byte.
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }
}

/// Reason carried by `Terminate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TerminateReason {
    /// Orderly close
    Normal = 0,
    /// Local shutdown requested
    Shutdown = 1,
    /// Peer sent too much malformed input
    ProtocolViolation = 2,
    /// Authentication failed
    AuthFailed = 3,
    /// Handshake found no common authentication method
    NoCommonMethod = 4,
    /// Sentinel left by `destroy`; never encoded or decoded
    Invalid = 0xFF,
}

impl TerminateReason {
    /// Parse a wire byte; the sentinel is not a legal wire value.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(TerminateReason::Normal),
            1 => Some(TerminateReason::Shutdown),
            2 => Some(TerminateReason::ProtocolViolation),
            3 => Some(TerminateReason::AuthFailed),
            4 => Some(TerminateReason::NoCommonMethod),
            _ => None,
        }
    }

    /// Wire byte.
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }
}

/// Command envelope: one variant per registered kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Methods in preference order of the sender
    MethodOffer {
        /// Offered methods
        methods: Vec<MethodId>,
    },
    /// Client's pick from the host's offer
    MethodSelection {
        /// Selected method
        method: MethodId,
    },
    /// Client authentication step
    AuthStep {
        /// Agreed method
        method: MethodId,
        /// Claimed identity
        identity: String,
        /// Method-defined payload
        data: Vec<u8>,
    },
    /// Host verdict
    AuthResult {
        /// Verdict
        status: AuthStatus,
        /// Method-defined payload (challenge when in progress)
        data: Vec<u8>,
    },
    /// Idle keep-alive
    KeepAlive,
    /// Session termination
    Terminate {
        /// Why the sender is closing
        reason: TerminateReason,
    },
    /// Node creation
    NodeCreate {
        /// Node id
        node_id: u32,
        /// Parent node id
        parent_id: u32,
        /// Owning user id
        user_id: u16,
        /// Application-defined type
        custom_type: u16,
    },
    /// Node destruction
    NodeDestroy {
        /// Node id
        node_id: u32,
    },
    /// Tag group creation
    TagGroupCreate {
        /// Owning node
        node_id: u32,
        /// Tag group id
        taggroup_id: u16,
        /// Application-defined type
        custom_type: u16,
    },
    /// Tag group destruction
    TagGroupDestroy {
        /// Owning node
        node_id: u32,
        /// Tag group id
        taggroup_id: u16,
    },
    /// String tag value
    TagSetString {
        /// Owning node
        node_id: u32,
        /// Owning tag group
        taggroup_id: u16,
        /// Tag id
        tag_id: u16,
        /// UTF-8 value
        value: String,
    },
    /// Session established (synthetic)
    ConnectAccept {
        /// Negotiated method
        method: MethodId,
        /// Authenticated peer identity
        identity: String,
    },
    /// Node creation acknowledged (synthetic)
    NodeCreateAck {
        /// Node id
        node_id: u32,
    },
    /// Node destruction acknowledged (synthetic)
    NodeDestroyAck {
        /// Node id
        node_id: u32,
    },
    /// Tag group creation acknowledged (synthetic)
    TagGroupCreateAck {
        /// Owning node
        node_id: u32,
        /// Tag group id
        taggroup_id: u16,
    },
    /// Tag group destruction acknowledged (synthetic)
    TagGroupDestroyAck {
        /// Owning node
        node_id: u32,
        /// Tag group id
        taggroup_id: u16,
    },
}

impl Command {
    /// Create a MethodOffer
    pub fn method_offer(methods: Vec<MethodId>) -> Self {
        Command::MethodOffer { methods }
    }

    /// Create a MethodSelection
    pub fn method_selection(method: MethodId) -> Self {
        Command::MethodSelection { method }
    }

    /// Create an AuthStep
    pub fn auth_step(method: MethodId, identity: &str, data: Vec<u8>) -> Self {
        Command::AuthStep {
            method,
            identity: identity.to_string(),
            data,
        }
    }

    /// Create an AuthResult
    pub fn auth_result(status: AuthStatus, data: Vec<u8>) -> Self {
        Command::AuthResult { status, data }
    }

    /// Create a Terminate
    pub fn terminate(reason: TerminateReason) -> Self {
        Command::Terminate { reason }
    }

    /// Create a NodeCreate
    pub fn node_create(node_id: u32, parent_id: u32, user_id: u16, custom_type: u16) -> Self {
        Command::NodeCreate {
            node_id,
            parent_id,
            user_id,
            custom_type,
        }
    }

    /// Create a NodeDestroy
    pub fn node_destroy(node_id: u32) -> Self {
        Command::NodeDestroy { node_id }
    }

    /// Create a TagGroupCreate
    pub fn taggroup_create(node_id: u32, taggroup_id: u16, custom_type: u16) -> Self {
        Command::TagGroupCreate {
            node_id,
            taggroup_id,
            custom_type,
        }
    }

    /// Create a TagGroupDestroy
    pub fn taggroup_destroy(node_id: u32, taggroup_id: u16) -> Self {
        Command::TagGroupDestroy {
            node_id,
            taggroup_id,
        }
    }

    /// Create a TagSetString
    pub fn tag_set_string(node_id: u32, taggroup_id: u16, tag_id: u16, value: &str) -> Self {
        Command::TagSetString {
            node_id,
            taggroup_id,
            tag_id,
            value: value.to_string(),
        }
    }

    /// Create a synthetic ConnectAccept
    pub fn connect_accept(method: MethodId, identity: &str) -> Self {
        Command::ConnectAccept {
            method,
            identity: identity.to_string(),
        }
    }

    /// Create a synthetic NodeCreateAck
    pub fn node_create_ack(node_id: u32) -> Self {
        Command::NodeCreateAck { node_id }
    }

    /// Create a synthetic NodeDestroyAck
    pub fn node_destroy_ack(node_id: u32) -> Self {
        Command::NodeDestroyAck { node_id }
    }

    /// Create a synthetic TagGroupCreateAck
    pub fn taggroup_create_ack(node_id: u32, taggroup_id: u16) -> Self {
        Command::TagGroupCreateAck {
            node_id,
            taggroup_id,
        }
    }

    /// Create a synthetic TagGroupDestroyAck
    pub fn taggroup_destroy_ack(node_id: u32, taggroup_id: u16) -> Self {
        Command::TagGroupDestroyAck {
            node_id,
            taggroup_id,
        }
    }

    /// Kind tag of the populated variant.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::MethodOffer { .. } => CommandKind::MethodOffer,
            Command::MethodSelection { .. } => CommandKind::MethodSelection,
            Command::AuthStep { .. } => CommandKind::AuthStep,
            Command::AuthResult { .. } => CommandKind::AuthResult,
            Command::KeepAlive => CommandKind::KeepAlive,
            Command::Terminate { .. } => CommandKind::Terminate,
            Command::NodeCreate { .. } => CommandKind::NodeCreate,
            Command::NodeDestroy { .. } => CommandKind::NodeDestroy,
            Command::TagGroupCreate { .. } => CommandKind::TagGroupCreate,
            Command::TagGroupDestroy { .. } => CommandKind::TagGroupDestroy,
            Command::TagSetString { .. } => CommandKind::TagSetString,
            Command::ConnectAccept { .. } => CommandKind::ConnectAccept,
            Command::NodeCreateAck { .. } => CommandKind::NodeCreateAck,
            Command::NodeDestroyAck { .. } => CommandKind::NodeDestroyAck,
            Command::TagGroupCreateAck { .. } => CommandKind::TagGroupCreateAck,
            Command::TagGroupDestroyAck { .. } => CommandKind::TagGroupDestroyAck,
        }
    }

    /// Whether this command lives in the synthetic tag range.
    pub fn is_synthetic(&self) -> bool {
        self.kind().is_synthetic()
    }

    /// Encode kind tag and body (no frame header).
    pub fn encode(&self) -> Result<Vec<u8>, CommandError> {
        codec::encode(self)
    }

    /// One-line diagnostic rendering.
    pub fn describe(&self) -> String {
        self.to_string()
    }

    /// Release owned payloads and overwrite every field with its sentinel.
    ///
    /// The envelope stays inspectable afterwards so that stale use shows up
    /// as sentinel values (and `encode` refuses it) instead of live data.
    pub fn destroy(&mut self) {
        match self {
            Command::MethodOffer { methods } => {
                *methods = Vec::new();
            },
            Command::MethodSelection { method } => {
                *method = MethodId::RESERVED;
            },
            Command::AuthStep {
                method,
                identity,
                data,
            } => {
                *method = MethodId::RESERVED;
                *identity = String::new();
                wipe(data);
            },
            Command::AuthResult { status, data } => {
                *status = AuthStatus::Invalid;
                wipe(data);
            },
            Command::KeepAlive => {},
            Command::Terminate { reason } => {
                *reason = TerminateReason::Invalid;
            },
            Command::NodeCreate {
                node_id,
                parent_id,
                user_id,
                custom_type,
            } => {
                *node_id = INVALID_NODE_ID;
                *parent_id = INVALID_NODE_ID;
                *user_id = INVALID_USER_ID;
                *custom_type = INVALID_CUSTOM_TYPE;
            },
            Command::NodeDestroy { node_id }
            | Command::NodeCreateAck { node_id }
            | Command::NodeDestroyAck { node_id } => {
                *node_id = INVALID_NODE_ID;
            },
            Command::TagGroupCreate {
                node_id,
                taggroup_id,
                custom_type,
            } => {
                *node_id = INVALID_NODE_ID;
                *taggroup_id = INVALID_TAGGROUP_ID;
                *custom_type = INVALID_CUSTOM_TYPE;
            },
            Command::TagGroupDestroy {
                node_id,
                taggroup_id,
            }
            | Command::TagGroupCreateAck {
                node_id,
                taggroup_id,
            }
            | Command::TagGroupDestroyAck {
                node_id,
                taggroup_id,
            } => {
                *node_id = INVALID_NODE_ID;
                *taggroup_id = INVALID_TAGGROUP_ID;
            },
            Command::TagSetString {
                node_id,
                taggroup_id,
                tag_id,
                value,
            } => {
                *node_id = INVALID_NODE_ID;
                *taggroup_id = INVALID_TAGGROUP_ID;
                *tag_id = INVALID_TAG_ID;
                *value = String::new();
            },
            Command::ConnectAccept { method, identity } => {
                *method = MethodId::RESERVED;
                *identity = String::new();
            },
        }
    }

    /// Whether the command holds sentinel values left by [`Command::destroy`].
    ///
    /// `KeepAlive` has no fields and is never considered cleared.
    pub fn is_cleared(&self) -> bool {
        match self {
            Command::MethodOffer { methods } => methods.is_empty(),
            Command::MethodSelection { method }
            | Command::AuthStep { method, .. }
            | Command::ConnectAccept { method, .. } => *method == MethodId::RESERVED,
            Command::AuthResult { status, .. } => *status == AuthStatus::Invalid,
            Command::KeepAlive => false,
            Command::Terminate { reason } => *reason == TerminateReason::Invalid,
            Command::NodeCreate { node_id, .. }
            | Command::NodeDestroy { node_id }
            | Command::NodeCreateAck { node_id }
            | Command::NodeDestroyAck { node_id } => *node_id == INVALID_NODE_ID,
            Command::TagGroupCreate {
                node_id,
                taggroup_id,
                ..
            }
            | Command::TagGroupDestroy {
                node_id,
                taggroup_id,
            }
            | Command::TagSetString {
                node_id,
                taggroup_id,
                ..
            }
            | Command::TagGroupCreateAck {
                node_id,
                taggroup_id,
            }
            | Command::TagGroupDestroyAck {
                node_id,
                taggroup_id,
            } => *node_id == INVALID_NODE_ID || *taggroup_id == INVALID_TAGGROUP_ID,
        }
    }
}

/// Zero a byte payload before releasing it; auth data may hold secrets.
fn wipe(data: &mut Vec<u8>) {
    data.zeroize();
    *data = Vec::new();
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.kind().name();
        match self {
            Command::MethodOffer { methods } => {
                let list: Vec<String> = methods.iter().map(ToString::to_string).collect();
                write!(f, "{name}: Methods: [{}]", list.join(", "))
            },
            Command::MethodSelection { method } => write!(f, "{name}: Method: {method}"),
            // Step payloads may carry secrets; only their length is shown.
            Command::AuthStep {
                method,
                identity,
                data,
            } => write!(
                f,
                "{name}: Method: {method}, Identity: {identity}, Data_Len: {}",
                data.len()
            ),
            Command::AuthResult { status, data } => {
                write!(f, "{name}: Status: {status:?}, Data_Len: {}", data.len())
            },
            Command::KeepAlive => f.write_str(name),
            Command::Terminate { reason } => write!(f, "{name}: Reason: {reason:?}"),
            Command::NodeCreate {
                node_id,
                parent_id,
                user_id,
                custom_type,
            } => write!(
                f,
                "{name}: Node_ID: {node_id}, Parent_ID: {parent_id}, User_ID: {user_id}, Custom_Type: {custom_type}"
            ),
            Command::NodeDestroy { node_id }
            | Command::NodeCreateAck { node_id }
            | Command::NodeDestroyAck { node_id } => write!(f, "{name}: Node_ID: {node_id}"),
            Command::TagGroupCreate {
                node_id,
                taggroup_id,
                custom_type,
            } => write!(
                f,
                "{name}: Node_ID: {node_id}, TagGroup_ID: {taggroup_id}, Custom_Type: {custom_type}"
            ),
            Command::TagGroupDestroy {
                node_id,
                taggroup_id,
            }
            | Command::TagGroupCreateAck {
                node_id,
                taggroup_id,
            }
            | Command::TagGroupDestroyAck {
                node_id,
                taggroup_id,
            } => write!(f, "{name}: Node_ID: {node_id}, TagGroup_ID: {taggroup_id}"),
            Command::TagSetString {
                node_id,
                taggroup_id,
                tag_id,
                value,
            } => write!(
                f,
                "{name}: Node_ID: {node_id}, TagGroup_ID: {taggroup_id}, Tag_ID: {tag_id}, Value: {value:?}"
            ),
            Command::ConnectAccept { method, identity } => {
                write!(f, "{name}: Method: {method}, Identity: {identity}")
            },
        }
    }
}
