//! Static command registry.
//!
//! One table maps every kind tag to its name, body shape and decoder, so
//! per-kind behaviour is looked up instead of scattered across the codebase.
//! Synthetic kinds are registered without a decoder.

use std::fmt;

use phf::phf_map;

use super::codec::{self, DecodeError, WireReader};
use super::{
    Command, CommandKind, MAX_AUTH_DATA_LEN, MAX_IDENTITY_LEN, MAX_METHODS, MAX_TAG_STRING_LEN,
};

type DecodeFn = fn(&mut WireReader<'_>) -> Result<Command, DecodeError>;

/// Size constraint on a command body (bytes after the kind tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyShape {
    /// Exactly this many bytes
    Fixed(usize),
    /// Between `min` and `max` bytes, refined by the body's own length fields
    Variable {
        /// Smallest legal body
        min: usize,
        /// Largest legal body
        max: usize,
    },
    /// Never serialized
    Local,
}

impl BodyShape {
    /// Check a body length before any field is read.
    pub fn check(&self, kind: CommandKind, len: usize) -> Result<(), DecodeError> {
        match *self {
            BodyShape::Fixed(n) if len < n => Err(DecodeError::Truncated {
                needed: n,
                available: len,
            }),
            BodyShape::Fixed(n) if len > n => Err(DecodeError::LengthMismatch {
                kind,
                expected: n,
                actual: len,
            }),
            BodyShape::Variable { min, .. } if len < min => Err(DecodeError::Truncated {
                needed: min,
                available: len,
            }),
            BodyShape::Variable { max, .. } if len > max => Err(DecodeError::LengthMismatch {
                kind,
                expected: max,
                actual: len,
            }),
            BodyShape::Local => Err(DecodeError::SyntheticKind(kind)),
            _ => Ok(()),
        }
    }
}

/// Registry entry for one command kind.
pub struct CommandSpec {
    /// Kind this entry describes
    pub kind: CommandKind,
    /// Diagnostic name
    pub name: &'static str,
    /// Body size constraint
    pub body: BodyShape,
    decoder: Option<DecodeFn>,
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("body", &self.body)
            .field("wire", &self.is_wire())
            .finish()
    }
}

impl CommandSpec {
    pub(crate) fn decoder(&self) -> Option<DecodeFn> {
        self.decoder
    }

    /// Whether this kind can cross the wire.
    pub fn is_wire(&self) -> bool {
        self.decoder.is_some()
    }
}

static COMMANDS: phf::Map<u8, CommandSpec> = phf_map! {
    0x01u8 => CommandSpec {
        kind: CommandKind::MethodOffer,
        name: "Method_Offer",
        body: BodyShape::Variable { min: 1, max: 1 + MAX_METHODS },
        decoder: Some(codec::decode_method_offer),
    },
    0x02u8 => CommandSpec {
        kind: CommandKind::MethodSelection,
        name: "Method_Selection",
        body: BodyShape::Fixed(1),
        decoder: Some(codec::decode_method_selection),
    },
    0x03u8 => CommandSpec {
        kind: CommandKind::AuthStep,
        name: "Auth_Step",
        body: BodyShape::Variable { min: 5, max: 1 + 1 + MAX_IDENTITY_LEN + 2 + MAX_AUTH_DATA_LEN },
        decoder: Some(codec::decode_auth_step),
    },
    0x04u8 => CommandSpec {
        kind: CommandKind::AuthResult,
        name: "Auth_Result",
        body: BodyShape::Variable { min: 3, max: 3 + MAX_AUTH_DATA_LEN },
        decoder: Some(codec::decode_auth_result),
    },
    0x05u8 => CommandSpec {
        kind: CommandKind::KeepAlive,
        name: "Keep_Alive",
        body: BodyShape::Fixed(0),
        decoder: Some(codec::decode_keep_alive),
    },
    0x06u8 => CommandSpec {
        kind: CommandKind::Terminate,
        name: "Terminate",
        body: BodyShape::Fixed(1),
        decoder: Some(codec::decode_terminate),
    },
    0x20u8 => CommandSpec {
        kind: CommandKind::NodeCreate,
        name: "Node_Create",
        body: BodyShape::Fixed(12),
        decoder: Some(codec::decode_node_create),
    },
    0x21u8 => CommandSpec {
        kind: CommandKind::NodeDestroy,
        name: "Node_Destroy",
        body: BodyShape::Fixed(4),
        decoder: Some(codec::decode_node_destroy),
    },
    0x40u8 => CommandSpec {
        kind: CommandKind::TagGroupCreate,
        name: "TagGroup_Create",
        body: BodyShape::Fixed(8),
        decoder: Some(codec::decode_taggroup_create),
    },
    0x41u8 => CommandSpec {
        kind: CommandKind::TagGroupDestroy,
        name: "TagGroup_Destroy",
        body: BodyShape::Fixed(6),
        decoder: Some(codec::decode_taggroup_destroy),
    },
    0x44u8 => CommandSpec {
        kind: CommandKind::TagSetString,
        name: "Tag_Set_String",
        body: BodyShape::Variable { min: 10, max: 10 + MAX_TAG_STRING_LEN },
        decoder: Some(codec::decode_tag_set_string),
    },
    0xC0u8 => CommandSpec {
        kind: CommandKind::ConnectAccept,
        name: "Connect_Accept",
        body: BodyShape::Local,
        decoder: None,
    },
    0xC1u8 => CommandSpec {
        kind: CommandKind::NodeCreateAck,
        name: "Node_Create_Ack",
        body: BodyShape::Local,
        decoder: None,
    },
    0xC2u8 => CommandSpec {
        kind: CommandKind::NodeDestroyAck,
        name: "Node_Destroy_Ack",
        body: BodyShape::Local,
        decoder: None,
    },
    0xC3u8 => CommandSpec {
        kind: CommandKind::TagGroupCreateAck,
        name: "TagGroup_Create_Ack",
        body: BodyShape::Local,
        decoder: None,
    },
    0xC4u8 => CommandSpec {
        kind: CommandKind::TagGroupDestroyAck,
        name: "TagGroup_Destroy_Ack",
        body: BodyShape::Local,
        decoder: None,
    },
};

/// Look up the registry entry for a raw kind tag.
pub fn lookup(tag: u8) -> Option<&'static CommandSpec> {
    COMMANDS.get(&tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_registered() {
        for kind in CommandKind::ALL {
            let spec = lookup(kind.tag()).unwrap();
            assert_eq!(spec.kind, kind);
            assert_eq!(spec.name, kind.name());
            assert_eq!(spec.is_wire(), kind.is_wire());
            assert_eq!(spec.body == BodyShape::Local, kind.is_synthetic());
        }
        assert_eq!(COMMANDS.len(), CommandKind::ALL.len());
    }

    #[test]
    fn test_unregistered_tags() {
        for tag in [0x00u8, 0x07, 0x22, 0x45, 0xBF, 0xC5, 0xFF] {
            assert!(lookup(tag).is_none(), "tag {tag:#04x}");
        }
    }

    #[test]
    fn test_body_shape_check() {
        let fixed = BodyShape::Fixed(4);
        assert!(fixed.check(CommandKind::NodeDestroy, 4).is_ok());
        assert!(matches!(
            fixed.check(CommandKind::NodeDestroy, 3),
            Err(DecodeError::Truncated { needed: 4, available: 3 })
        ));
        assert!(matches!(
            fixed.check(CommandKind::NodeDestroy, 5),
            Err(DecodeError::LengthMismatch { expected: 4, actual: 5, .. })
        ));

        let var = BodyShape::Variable { min: 2, max: 8 };
        assert!(var.check(CommandKind::MethodOffer, 2).is_ok());
        assert!(var.check(CommandKind::MethodOffer, 8).is_ok());
        assert!(var.check(CommandKind::MethodOffer, 9).is_err());

        assert_eq!(
            BodyShape::Local.check(CommandKind::ConnectAccept, 0),
            Err(DecodeError::SyntheticKind(CommandKind::ConnectAccept))
        );
    }
}
