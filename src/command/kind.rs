//! Command kind tags.
//!
//! Every command starts with a one-byte kind tag. Tags from
//! [`SYNTHETIC_BASE`] upward are reserved for synthetic commands, which are
//! dispatched locally and never serialized.

use std::fmt;

use super::registry;
use crate::error::CommandError;

/// First tag of the reserved synthetic sub-range.
pub const SYNTHETIC_BASE: u8 = 0xC0;

/// Kind tag of a command envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum CommandKind {
    /// Authentication methods offered (client) or supported (host)
    MethodOffer = 0x01,
    /// Method picked by the client
    MethodSelection = 0x02,
    /// One authentication step from the client
    AuthStep = 0x03,
    /// Host verdict on an authentication step
    AuthResult = 0x04,
    /// Idle keep-alive
    KeepAlive = 0x05,
    /// Session termination with a reason
    Terminate = 0x06,
    /// Node creation request/notification
    NodeCreate = 0x20,
    /// Node destruction request/notification
    NodeDestroy = 0x21,
    /// Tag group creation request/notification
    TagGroupCreate = 0x40,
    /// Tag group destruction request/notification
    TagGroupDestroy = 0x41,
    /// String tag value
    TagSetString = 0x44,
    /// Synthetic: session established
    ConnectAccept = 0xC0,
    /// Synthetic: node creation acknowledged locally
    NodeCreateAck = 0xC1,
    /// Synthetic: node destruction acknowledged locally
    NodeDestroyAck = 0xC2,
    /// Synthetic: tag group creation acknowledged locally
    TagGroupCreateAck = 0xC3,
    /// Synthetic: tag group destruction acknowledged locally
    TagGroupDestroyAck = 0xC4,
}

impl CommandKind {
    /// Every registered kind, in tag order.
    pub const ALL: [CommandKind; 16] = [
        CommandKind::MethodOffer,
        CommandKind::MethodSelection,
        CommandKind::AuthStep,
        CommandKind::AuthResult,
        CommandKind::KeepAlive,
        CommandKind::Terminate,
        CommandKind::NodeCreate,
        CommandKind::NodeDestroy,
        CommandKind::TagGroupCreate,
        CommandKind::TagGroupDestroy,
        CommandKind::TagSetString,
        CommandKind::ConnectAccept,
        CommandKind::NodeCreateAck,
        CommandKind::NodeDestroyAck,
        CommandKind::TagGroupCreateAck,
        CommandKind::TagGroupDestroyAck,
    ];

    /// Look up a raw tag in the command registry.
    pub fn from_tag(tag: u8) -> Result<Self, CommandError> {
        registry::lookup(tag)
            .map(|spec| spec.kind)
            .ok_or(CommandError::UnknownKind(tag))
    }

    /// Raw tag byte.
    pub fn tag(&self) -> u8 {
        *self as u8
    }

    /// Synthetic kinds live in the reserved tag range and never hit the wire.
    pub fn is_synthetic(&self) -> bool {
        self.tag() >= SYNTHETIC_BASE
    }

    /// Wire kinds have an encoder and a decoder.
    pub fn is_wire(&self) -> bool {
        !self.is_synthetic()
    }

    /// Kinds that only appear while a handshake is in progress.
    pub fn is_negotiation(&self) -> bool {
        matches!(
            self,
            CommandKind::MethodOffer
                | CommandKind::MethodSelection
                | CommandKind::AuthStep
                | CommandKind::AuthResult
        )
    }

    /// Diagnostic name, as used in command descriptions.
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::MethodOffer => "Method_Offer",
            CommandKind::MethodSelection => "Method_Selection",
            CommandKind::AuthStep => "Auth_Step",
            CommandKind::AuthResult => "Auth_Result",
            CommandKind::KeepAlive => "Keep_Alive",
            CommandKind::Terminate => "Terminate",
            CommandKind::NodeCreate => "Node_Create",
            CommandKind::NodeDestroy => "Node_Destroy",
            CommandKind::TagGroupCreate => "TagGroup_Create",
            CommandKind::TagGroupDestroy => "TagGroup_Destroy",
            CommandKind::TagSetString => "Tag_Set_String",
            CommandKind::ConnectAccept => "Connect_Accept",
            CommandKind::NodeCreateAck => "Node_Create_Ack",
            CommandKind::NodeDestroyAck => "Node_Destroy_Ack",
            CommandKind::TagGroupCreateAck => "TagGroup_Create_Ack",
            CommandKind::TagGroupDestroyAck => "TagGroup_Destroy_Ack",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_range() {
        for kind in CommandKind::ALL {
            assert_eq!(kind.is_synthetic(), kind.tag() >= SYNTHETIC_BASE);
            assert_ne!(kind.is_synthetic(), kind.is_wire());
        }
        assert!(CommandKind::TagGroupCreateAck.is_synthetic());
        assert!(CommandKind::TagGroupCreate.is_wire());
    }

    #[test]
    fn test_from_tag() {
        assert_eq!(
            CommandKind::from_tag(0x40).unwrap(),
            CommandKind::TagGroupCreate
        );
        assert_eq!(
            CommandKind::from_tag(0x99),
            Err(CommandError::UnknownKind(0x99))
        );
        assert_eq!(CommandKind::from_tag(0), Err(CommandError::UnknownKind(0)));
    }

    #[test]
    fn test_all_is_sorted_and_unique() {
        let tags: Vec<u8> = CommandKind::ALL.iter().map(CommandKind::tag).collect();
        let mut sorted = tags.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(tags, sorted);
    }
}
