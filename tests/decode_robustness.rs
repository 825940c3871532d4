//! Decoder robustness on untrusted input.
//!
//! Whatever the bytes claim, decoding must return a classified error or a
//! command whose kind matches its tag, and must never panic.

use proptest::prelude::*;
use verse::command::{decode, encode, encode_frame, lookup, Command, DecodeError, FrameDecoder};
use verse::negotiation::MethodId;

fn wire_command() -> impl Strategy<Value = Command> {
    let method = (1u8..=255).prop_map(MethodId::new);
    let node = 0u32..u32::MAX;
    let group = 0u16..u16::MAX;
    prop_oneof![
        prop::collection::vec(method.clone(), 1..=16).prop_map(Command::method_offer),
        method.clone().prop_map(Command::method_selection),
        (method, "[a-z]{1,64}", prop::collection::vec(any::<u8>(), 0..512))
            .prop_map(|(m, id, data)| Command::auth_step(m, &id, data)),
        Just(Command::KeepAlive),
        (node.clone(), node.clone(), any::<u16>(), any::<u16>())
            .prop_map(|(n, p, u, t)| Command::node_create(n, p, u, t)),
        node.clone().prop_map(Command::node_destroy),
        (node.clone(), group.clone(), any::<u16>())
            .prop_map(|(n, g, t)| Command::taggroup_create(n, g, t)),
        (node.clone(), group.clone()).prop_map(|(n, g)| Command::taggroup_destroy(n, g)),
        (node, group.clone(), group, "\\PC{0,64}")
            .prop_map(|(n, g, t, v)| Command::tag_set_string(n, g, t, &v)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 512, .. ProptestConfig::default() })]

    #[test]
    fn decode_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..600)) {
        match decode(&bytes) {
            Ok(cmd) => {
                prop_assert_eq!(cmd.kind().tag(), bytes[0]);
                prop_assert!(!cmd.is_synthetic());
                prop_assert!(!cmd.is_cleared());
                // accepted input is canonical
                prop_assert_eq!(encode(&cmd).unwrap(), bytes);
            },
            Err(DecodeError::UnknownKind(tag)) => prop_assert!(lookup(tag).is_none()),
            Err(_) => {},
        }
    }

    #[test]
    fn decode_known_tag_with_noise(
        tag in prop::sample::select(vec![0x01u8, 0x02, 0x03, 0x04, 0x05, 0x06, 0x20, 0x21, 0x40, 0x41, 0x44]),
        body in prop::collection::vec(any::<u8>(), 0..1100),
    ) {
        let mut bytes = vec![tag];
        bytes.extend_from_slice(&body);
        if let Ok(cmd) = decode(&bytes) {
            prop_assert_eq!(cmd.kind().tag(), tag);
        }
    }

    #[test]
    fn auth_step_identity_domain(identity in "[a-z]{0,70}", data in prop::collection::vec(any::<u8>(), 0..32)) {
        let step = Command::auth_step(MethodId::PLAINTEXT, &identity, data);
        match encode(&step) {
            Ok(bytes) => {
                prop_assert!((1..=64).contains(&identity.len()));
                prop_assert_eq!(decode(&bytes).unwrap(), step);
            },
            Err(_) => prop_assert!(identity.is_empty() || identity.len() > 64),
        }
    }

    #[test]
    fn adversarial_length_fields(len in any::<u16>(), tail in prop::collection::vec(any::<u8>(), 0..16)) {
        // Tag_Set_String whose value length disagrees with the body
        let mut bytes = vec![0x44, 0, 0, 0, 1, 0, 1, 0, 1];
        bytes.extend_from_slice(&len.to_be_bytes());
        bytes.extend_from_slice(&tail);
        let result = decode(&bytes);
        if usize::from(len) != tail.len() {
            prop_assert!(result.is_err());
        }
    }

    #[test]
    fn frames_survive_any_split(
        commands in prop::collection::vec(wire_command(), 1..8),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
    ) {
        let mut stream = Vec::new();
        for cmd in &commands {
            stream.extend_from_slice(&encode_frame(cmd).unwrap());
        }

        let mut points: Vec<usize> = cuts.iter().map(|i| i.index(stream.len())).collect();
        points.push(stream.len());
        points.sort_unstable();

        let mut decoder = FrameDecoder::default();
        let mut decoded = Vec::new();
        let mut start = 0;
        for end in points {
            decoder.extend(&stream[start..end]);
            start = end;
            while let Some(next) = decoder.next_command() {
                decoded.push(next.unwrap());
            }
        }
        prop_assert_eq!(decoded, commands);
        prop_assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn garbage_stream_never_panics(chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..16)) {
        let mut decoder = FrameDecoder::new(256);
        for chunk in &chunks {
            decoder.extend(chunk);
            while let Some(next) = decoder.next_command() {
                if let Ok(cmd) = next {
                    prop_assert!(!cmd.is_synthetic());
                }
            }
        }
    }
}

#[test]
fn test_synthetic_tags_rejected_on_wire() {
    for tag in 0xC0..=0xC4u8 {
        let spec = lookup(tag).unwrap();
        assert!(!spec.is_wire());
        assert!(matches!(
            decode(&[tag, 0, 0, 0, 1, 0, 1]),
            Err(DecodeError::SyntheticKind(_))
        ));
    }
}
