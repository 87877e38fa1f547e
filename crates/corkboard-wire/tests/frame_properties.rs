//! Property tests for the line codec.

use proptest::prelude::*;

use corkboard_types::{Message, MessageId};
use corkboard_wire::{Frame, WireError};

/// Text fields that survive the `::` framing unambiguously.
fn text_field() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 .,!?_-]{0,24}"
}

proptest! {
    #[test]
    fn post_round_trips(
        title in text_field(),
        author in text_field(),
        body in text_field(),
        id in 1u64..=u64::from(u32::MAX),
    ) {
        let msg = Message::post(MessageId::new(id), title, author, body);
        let line = Frame::from_message(&msg).encode().unwrap();
        let back = Frame::parse(&line).unwrap().into_message().unwrap();
        prop_assert_eq!(back, msg);
    }

    #[test]
    fn reply_round_trips(
        title in text_field(),
        author in text_field(),
        body in text_field(),
        parent in 1u64..1000,
        id in 1000u64..2000,
    ) {
        let msg = Message::reply(
            MessageId::new(id),
            MessageId::new(parent),
            title,
            author,
            body,
        );
        let line = Frame::from_message(&msg).encode().unwrap();
        let back = Frame::parse(&line).unwrap().into_message().unwrap();
        prop_assert_eq!(back, msg);
    }

    #[test]
    fn separator_in_any_text_field_is_rejected(
        prefix in text_field(),
        suffix in text_field(),
        slot in 0usize..3,
    ) {
        let poisoned = format!("{prefix}::{suffix}");
        let clean = "x".to_string();
        let pick = |i: usize| if i == slot { poisoned.clone() } else { clean.clone() };
        let frame = Frame::Post {
            title: pick(0),
            author: pick(1),
            body: pick(2),
            id: None,
        };
        let is_reserved_separator_err = matches!(
            frame.encode(),
            Err(WireError::ReservedSeparator { .. })
        );
        prop_assert!(is_reserved_separator_err);
    }

    #[test]
    fn parse_never_panics(line in "\\PC{0,64}") {
        let _ = Frame::parse(&line);
    }

    #[test]
    fn control_frames_round_trip(frame in control_frame()) {
        let line = frame.encode().unwrap();
        prop_assert_eq!(Frame::parse(&line).unwrap(), frame);
    }
}

fn control_frame() -> impl Strategy<Value = Frame> {
    proptest::strategy::Union::new(vec![
        (1u64..10_000).prop_map(|p| Frame::Read { page: p }).boxed(),
        (1u64..10_000)
            .prop_map(|id| Frame::Choose { id: MessageId::new(id) })
            .boxed(),
        (1u16..u16::MAX)
            .prop_map(|port| Frame::Register { port })
            .boxed(),
        Just(Frame::Policy).boxed(),
        Just(Frame::VersionQuery).boxed(),
        (0u64..10_000)
            .prop_map(|v| Frame::Check { version: v.into() })
            .boxed(),
        (0u32..64)
            .prop_map(|r| Frame::QuorumRead { replica: r.into() })
            .boxed(),
        Just(Frame::AcquireLock).boxed(),
        (1u64..10_000)
            .prop_map(|id| Frame::GrantLock { id: MessageId::new(id) })
            .boxed(),
        Just(Frame::Unlock).boxed(),
        (1u16..u16::MAX)
            .prop_map(|port| Frame::Transfer {
                host: "127.0.0.1".to_string(),
                port,
            })
            .boxed(),
        (1u64..10_000)
            .prop_map(|s| Frame::SendUpdates { start: MessageId::new(s) })
            .boxed(),
    ])
}
