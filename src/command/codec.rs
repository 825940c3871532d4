//! Command body encoding and decoding.
//!
//! Decoding treats every byte as untrusted: each read is bounds-checked,
//! every length field is compared against its declared maximum before any
//! allocation, and a body must be consumed exactly.

use bytes::{Buf, BufMut};
use thiserror::Error;

use super::registry;
use super::{
    AuthStatus, Command, CommandKind, TerminateReason, INVALID_NODE_ID, INVALID_TAGGROUP_ID,
    INVALID_TAG_ID, MAX_AUTH_DATA_LEN, MAX_IDENTITY_LEN, MAX_METHODS, MAX_TAG_STRING_LEN,
};
use crate::error::CommandError;
use crate::negotiation::MethodId;

/// Malformed wire data.
///
/// Always recoverable at the frame boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Tag is not in the registry.
    #[error("Unknown command kind {0:#04x}")]
    UnknownKind(u8),

    /// A synthetic tag arrived on the wire.
    #[error("Synthetic command {0} cannot be decoded")]
    SyntheticKind(CommandKind),

    /// Fewer bytes than the kind requires.
    #[error("Truncated: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes required
        needed: usize,
        /// Bytes present
        available: usize,
    },

    /// Body size disagrees with the kind's declared size.
    #[error("{kind}: body is {actual} bytes, expected {expected}")]
    LengthMismatch {
        /// Command kind
        kind: CommandKind,
        /// Declared size (exact or maximum)
        expected: usize,
        /// Actual size
        actual: usize,
    },

    /// A length field exceeds its declared maximum.
    #[error("{kind}: field '{field}' claims {len} bytes (max {max})")]
    Oversized {
        /// Command kind
        kind: CommandKind,
        /// Field name
        field: &'static str,
        /// Claimed length
        len: usize,
        /// Declared maximum
        max: usize,
    },

    /// A field holds a value outside its legal range.
    #[error("{kind}: invalid value {value} for field '{field}'")]
    InvalidField {
        /// Command kind
        kind: CommandKind,
        /// Field name
        field: &'static str,
        /// Offending value
        value: u64,
    },

    /// A string field is not UTF-8.
    #[error("{kind}: field '{field}' is not valid UTF-8")]
    InvalidUtf8 {
        /// Command kind
        kind: CommandKind,
        /// Field name
        field: &'static str,
    },

    /// Frame header announced zero bytes.
    #[error("Empty frame")]
    EmptyFrame,

    /// Frame header announced more than the decoder accepts.
    #[error("Frame of {len} bytes exceeds maximum {max}")]
    FrameTooLarge {
        /// Announced length
        len: usize,
        /// Configured maximum
        max: usize,
    },
}

/// Bounds-checked reader over one command body.
pub(crate) struct WireReader<'a> {
    kind: CommandKind,
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub(crate) fn new(kind: CommandKind, buf: &'a [u8]) -> Self {
        Self { kind, buf }
    }

    fn need(&self, n: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < n {
            return Err(DecodeError::Truncated {
                needed: n,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.need(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Length-checked byte field; the length is validated before reading.
    fn bytes(&mut self, field: &'static str, len: usize, max: usize) -> Result<&'a [u8], DecodeError> {
        if len > max {
            return Err(DecodeError::Oversized {
                kind: self.kind,
                field,
                len,
                max,
            });
        }
        self.take(len)
    }

    fn string(&mut self, field: &'static str, len: usize, max: usize) -> Result<String, DecodeError> {
        let raw = self.bytes(field, len, max)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8 {
                kind: self.kind,
                field,
            })
    }

    fn method(&mut self, field: &'static str) -> Result<MethodId, DecodeError> {
        let raw = self.u8()?;
        if raw == MethodId::RESERVED.as_byte() {
            return Err(self.invalid(field, raw.into()));
        }
        Ok(MethodId::new(raw))
    }

    fn node_id(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        let id = self.u32()?;
        if id == INVALID_NODE_ID {
            return Err(self.invalid(field, id.into()));
        }
        Ok(id)
    }

    fn id16(&mut self, field: &'static str, sentinel: u16) -> Result<u16, DecodeError> {
        let id = self.u16()?;
        if id == sentinel {
            return Err(self.invalid(field, id.into()));
        }
        Ok(id)
    }

    fn invalid(&self, field: &'static str, value: u64) -> DecodeError {
        DecodeError::InvalidField {
            kind: self.kind,
            field,
            value,
        }
    }

    /// The body must be consumed exactly.
    pub(crate) fn finish(self, consumed_from: usize) -> Result<(), DecodeError> {
        if self.buf.has_remaining() {
            return Err(DecodeError::LengthMismatch {
                kind: self.kind,
                expected: consumed_from - self.buf.remaining(),
                actual: consumed_from,
            });
        }
        Ok(())
    }
}

/// Decode one command (kind tag followed by body) from `bytes`.
///
/// Never reads past `bytes`, whatever the length fields claim.
pub fn decode(bytes: &[u8]) -> Result<Command, DecodeError> {
    let (&tag, body) = bytes.split_first().ok_or(DecodeError::Truncated {
        needed: 1,
        available: 0,
    })?;
    let spec = registry::lookup(tag).ok_or(DecodeError::UnknownKind(tag))?;
    let decoder = spec.decoder().ok_or(DecodeError::SyntheticKind(spec.kind))?;
    spec.body.check(spec.kind, body.len())?;

    let mut reader = WireReader::new(spec.kind, body);
    let command = decoder(&mut reader)?;
    reader.finish(body.len())?;
    debug_assert_eq!(command.kind(), spec.kind);
    Ok(command)
}

/// Encode kind tag and body of a wire command.
pub fn encode(command: &Command) -> Result<Vec<u8>, CommandError> {
    let kind = command.kind();
    if kind.is_synthetic() {
        return Err(CommandError::NotWireCapable(kind));
    }
    if command.is_cleared() {
        return Err(CommandError::Cleared(kind));
    }

    let mut buf = Vec::with_capacity(16);
    buf.put_u8(kind.tag());

    match command {
        Command::MethodOffer { methods } => {
            check_len(kind, "methods", methods.len(), MAX_METHODS)?;
            buf.put_u8(methods.len() as u8);
            for method in methods {
                buf.put_u8(method.as_byte());
            }
        },
        Command::MethodSelection { method } => buf.put_u8(method.as_byte()),
        Command::AuthStep {
            method,
            identity,
            data,
        } => {
            if identity.is_empty() {
                return Err(CommandError::EmptyField {
                    kind,
                    field: "identity",
                });
            }
            check_len(kind, "identity", identity.len(), MAX_IDENTITY_LEN)?;
            check_len(kind, "data", data.len(), MAX_AUTH_DATA_LEN)?;
            buf.put_u8(method.as_byte());
            buf.put_u8(identity.len() as u8);
            buf.put_slice(identity.as_bytes());
            buf.put_u16(data.len() as u16);
            buf.put_slice(data);
        },
        Command::AuthResult { status, data } => {
            check_len(kind, "data", data.len(), MAX_AUTH_DATA_LEN)?;
            buf.put_u8(status.as_byte());
            buf.put_u16(data.len() as u16);
            buf.put_slice(data);
        },
        Command::KeepAlive => {},
        Command::Terminate { reason } => buf.put_u8(reason.as_byte()),
        Command::NodeCreate {
            node_id,
            parent_id,
            user_id,
            custom_type,
        } => {
            if *parent_id == INVALID_NODE_ID {
                return Err(CommandError::Cleared(kind));
            }
            buf.put_u32(*node_id);
            buf.put_u32(*parent_id);
            buf.put_u16(*user_id);
            buf.put_u16(*custom_type);
        },
        Command::NodeDestroy { node_id } => buf.put_u32(*node_id),
        Command::TagGroupCreate {
            node_id,
            taggroup_id,
            custom_type,
        } => {
            buf.put_u32(*node_id);
            buf.put_u16(*taggroup_id);
            buf.put_u16(*custom_type);
        },
        Command::TagGroupDestroy {
            node_id,
            taggroup_id,
        } => {
            buf.put_u32(*node_id);
            buf.put_u16(*taggroup_id);
        },
        Command::TagSetString {
            node_id,
            taggroup_id,
            tag_id,
            value,
        } => {
            check_len(kind, "value", value.len(), MAX_TAG_STRING_LEN)?;
            if *tag_id == INVALID_TAG_ID {
                return Err(CommandError::Cleared(kind));
            }
            buf.put_u32(*node_id);
            buf.put_u16(*taggroup_id);
            buf.put_u16(*tag_id);
            buf.put_u16(value.len() as u16);
            buf.put_slice(value.as_bytes());
        },
        Command::ConnectAccept { .. }
        | Command::NodeCreateAck { .. }
        | Command::NodeDestroyAck { .. }
        | Command::TagGroupCreateAck { .. }
        | Command::TagGroupDestroyAck { .. } => unreachable!("synthetic kinds rejected above"),
    }

    Ok(buf)
}

fn check_len(kind: CommandKind, field: &'static str, len: usize, max: usize) -> Result<(), CommandError> {
    if len > max {
        return Err(CommandError::FieldTooLong {
            kind,
            field,
            len,
            max,
        });
    }
    Ok(())
}

// Per-kind body decoders, referenced from the registry table.

pub(crate) fn decode_method_offer(r: &mut WireReader<'_>) -> Result<Command, DecodeError> {
    let count = r.u8()? as usize;
    if count == 0 || count > MAX_METHODS {
        return Err(r.invalid("count", count as u64));
    }
    let methods = (0..count)
        .map(|_| r.method("method"))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Command::MethodOffer { methods })
}

pub(crate) fn decode_method_selection(r: &mut WireReader<'_>) -> Result<Command, DecodeError> {
    Ok(Command::MethodSelection {
        method: r.method("method")?,
    })
}

pub(crate) fn decode_auth_step(r: &mut WireReader<'_>) -> Result<Command, DecodeError> {
    let method = r.method("method")?;
    let id_len = r.u8()? as usize;
    if id_len == 0 {
        return Err(r.invalid("identity_len", 0));
    }
    let identity = r.string("identity", id_len, MAX_IDENTITY_LEN)?;
    let data_len = r.u16()? as usize;
    let data = r.bytes("data", data_len, MAX_AUTH_DATA_LEN)?.to_vec();
    Ok(Command::AuthStep {
        method,
        identity,
        data,
    })
}

pub(crate) fn decode_auth_result(r: &mut WireReader<'_>) -> Result<Command, DecodeError> {
    let raw = r.u8()?;
    let status = AuthStatus::from_byte(raw).ok_or_else(|| r.invalid("status", raw.into()))?;
    let data_len = r.u16()? as usize;
    let data = r.bytes("data", data_len, MAX_AUTH_DATA_LEN)?.to_vec();
    Ok(Command::AuthResult { status, data })
}

pub(crate) fn decode_keep_alive(_r: &mut WireReader<'_>) -> Result<Command, DecodeError> {
    Ok(Command::KeepAlive)
}

pub(crate) fn decode_terminate(r: &mut WireReader<'_>) -> Result<Command, DecodeError> {
    let raw = r.u8()?;
    let reason = TerminateReason::from_byte(raw).ok_or_else(|| r.invalid("reason", raw.into()))?;
    Ok(Command::Terminate { reason })
}

pub(crate) fn decode_node_create(r: &mut WireReader<'_>) -> Result<Command, DecodeError> {
    Ok(Command::NodeCreate {
        node_id: r.node_id("node_id")?,
        parent_id: r.node_id("parent_id")?,
        user_id: r.u16()?,
        custom_type: r.u16()?,
    })
}

pub(crate) fn decode_node_destroy(r: &mut WireReader<'_>) -> Result<Command, DecodeError> {
    Ok(Command::NodeDestroy {
        node_id: r.node_id("node_id")?,
    })
}

pub(crate) fn decode_taggroup_create(r: &mut WireReader<'_>) -> Result<Command, DecodeError> {
    Ok(Command::TagGroupCreate {
        node_id: r.node_id("node_id")?,
        taggroup_id: r.id16("taggroup_id", INVALID_TAGGROUP_ID)?,
        custom_type: r.u16()?,
    })
}

pub(crate) fn decode_taggroup_destroy(r: &mut WireReader<'_>) -> Result<Command, DecodeError> {
    Ok(Command::TagGroupDestroy {
        node_id: r.node_id("node_id")?,
        taggroup_id: r.id16("taggroup_id", INVALID_TAGGROUP_ID)?,
    })
}

pub(crate) fn decode_tag_set_string(r: &mut WireReader<'_>) -> Result<Command, DecodeError> {
    let node_id = r.node_id("node_id")?;
    let taggroup_id = r.id16("taggroup_id", INVALID_TAGGROUP_ID)?;
    let tag_id = r.id16("tag_id", INVALID_TAG_ID)?;
    let len = r.u16()? as usize;
    let value = r.string("value", len, MAX_TAG_STRING_LEN)?;
    Ok(Command::TagSetString {
        node_id,
        taggroup_id,
        tag_id,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_taggroup_create_wire_layout() {
        let cmd = Command::taggroup_create(7, 3, 0x0102);
        let bytes = encode(&cmd).unwrap();
        assert_eq!(bytes, hex!("40 00000007 0003 0102"));
        assert_eq!(decode(&bytes).unwrap(), cmd);
    }

    #[test]
    fn test_wire_roundtrip_every_kind() {
        let commands = vec![
            Command::method_offer(vec![MethodId::PLAINTEXT, MethodId::NONE]),
            Command::method_selection(MethodId::PLAINTEXT),
            Command::auth_step(MethodId::PLAINTEXT, "alice", b"secret".to_vec()),
            Command::auth_result(AuthStatus::InProgress, vec![9; 32]),
            Command::KeepAlive,
            Command::terminate(TerminateReason::Shutdown),
            Command::node_create(10, 0, 100, 2),
            Command::node_destroy(10),
            Command::taggroup_create(10, 1, 0),
            Command::taggroup_destroy(10, 1),
            Command::tag_set_string(10, 1, 4, "héllo"),
        ];

        for cmd in commands {
            let bytes = encode(&cmd).unwrap();
            assert_eq!(bytes[0], cmd.kind().tag());
            assert_eq!(decode(&bytes).unwrap(), cmd, "{cmd}");
        }
    }

    #[test]
    fn test_encode_rejects_synthetic() {
        let ack = Command::taggroup_create_ack(7, 3);
        assert_eq!(
            encode(&ack),
            Err(CommandError::NotWireCapable(CommandKind::TagGroupCreateAck))
        );
    }

    #[test]
    fn test_encode_rejects_cleared() {
        let mut cmd = Command::node_destroy(4);
        cmd.destroy();
        assert_eq!(
            encode(&cmd),
            Err(CommandError::Cleared(CommandKind::NodeDestroy))
        );

        let orphan = Command::node_create(4, INVALID_NODE_ID, 0, 0);
        assert_eq!(
            encode(&orphan),
            Err(CommandError::Cleared(CommandKind::NodeCreate))
        );
        let untagged = Command::tag_set_string(4, 1, INVALID_TAG_ID, "v");
        assert_eq!(
            encode(&untagged),
            Err(CommandError::Cleared(CommandKind::TagSetString))
        );
    }

    #[test]
    fn test_encode_rejects_long_fields() {
        let cmd = Command::tag_set_string(1, 1, 1, &"x".repeat(MAX_TAG_STRING_LEN + 1));
        assert!(matches!(
            encode(&cmd),
            Err(CommandError::FieldTooLong { field: "value", .. })
        ));
    }

    #[test]
    fn test_encode_rejects_empty_identity() {
        let step = Command::auth_step(MethodId::NONE, "", Vec::new());
        assert_eq!(
            encode(&step),
            Err(CommandError::EmptyField {
                kind: CommandKind::AuthStep,
                field: "identity",
            })
        );
        assert!(decode(&hex!("03 01 00 0000")).is_err());
    }

    #[test]
    fn test_decode_unknown_kind() {
        assert_eq!(decode(&[0x99, 1, 2]), Err(DecodeError::UnknownKind(0x99)));
        assert_eq!(decode(&[0x00]), Err(DecodeError::UnknownKind(0x00)));
    }

    #[test]
    fn test_decode_empty() {
        assert_eq!(
            decode(&[]),
            Err(DecodeError::Truncated {
                needed: 1,
                available: 0
            })
        );
    }

    #[test]
    fn test_decode_synthetic_tag() {
        assert_eq!(
            decode(&hex!("c3 00000007 0003")),
            Err(DecodeError::SyntheticKind(CommandKind::TagGroupCreateAck))
        );
    }

    #[test]
    fn test_decode_fixed_size_mismatch() {
        assert_eq!(
            decode(&hex!("40 00000007 00")),
            Err(DecodeError::Truncated {
                needed: 8,
                available: 5
            })
        );
        assert!(matches!(
            decode(&hex!("40 00000007 0003 0000 ff")),
            Err(DecodeError::LengthMismatch {
                kind: CommandKind::TagGroupCreate,
                expected: 8,
                actual: 9
            })
        ));
    }

    #[test]
    fn test_decode_adversarial_length_field() {
        // value length claims 0xFFFF but only 2 bytes follow
        let bytes = hex!("44 00000001 0001 0001 ffff 6869");
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::Oversized {
                kind: CommandKind::TagSetString,
                field: "value",
                len: 0xFFFF,
                max: MAX_TAG_STRING_LEN
            })
        );

        // within the maximum, but past the end of the body
        let bytes = hex!("44 00000001 0001 0001 0010 6869");
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::Truncated {
                needed: 16,
                available: 2
            })
        );
    }

    #[test]
    fn test_decode_trailing_bytes_in_variable_body() {
        let mut bytes = encode(&Command::method_offer(vec![MethodId::NONE])).unwrap();
        bytes.push(0x01);
        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::LengthMismatch {
                kind: CommandKind::MethodOffer,
                ..
            })
        ));
    }

    #[test]
    fn test_decode_rejects_sentinel_ids() {
        assert_eq!(
            decode(&hex!("21 ffffffff")),
            Err(DecodeError::InvalidField {
                kind: CommandKind::NodeDestroy,
                field: "node_id",
                value: u32::MAX as u64
            })
        );
        assert!(matches!(
            decode(&hex!("41 00000001 ffff")),
            Err(DecodeError::InvalidField {
                field: "taggroup_id",
                ..
            })
        ));
    }

    #[test]
    fn test_decode_rejects_reserved_method_and_bad_enums() {
        assert!(matches!(
            decode(&hex!("02 00")),
            Err(DecodeError::InvalidField { field: "method", .. })
        ));
        assert!(matches!(
            decode(&hex!("04 07 0000")),
            Err(DecodeError::InvalidField { field: "status", .. })
        ));
        assert!(matches!(
            decode(&hex!("06 ff")),
            Err(DecodeError::InvalidField { field: "reason", .. })
        ));
        assert!(matches!(
            decode(&hex!("01 00")),
            Err(DecodeError::InvalidField { field: "count", .. })
        ));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let bytes = hex!("03 02 02 c3 28 0000");
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::InvalidUtf8 {
                kind: CommandKind::AuthStep,
                field: "identity"
            })
        );
    }
}
