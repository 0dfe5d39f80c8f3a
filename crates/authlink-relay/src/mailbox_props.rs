use crate::mailbox::{Mailbox, MailboxError};
use bytes::Bytes;
use proptest::prelude::*;
use std::time::Duration;

proptest! {
    #[test]
    fn test_post_get_preserves_payload(payload in prop::collection::vec(any::<u8>(), 0..1024)) {
        let mut mailbox = Mailbox::new();
        let data = Bytes::from(payload);
        let sequence = mailbox.post(data.clone(), 10, 2048).unwrap();

        let message = mailbox.get().expect("message lost");
        prop_assert_eq!(message.data, data);
        prop_assert_eq!(message.sequence, sequence);
    }

    #[test]
    fn test_delivery_is_fifo(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..100), 1..20)
    ) {
        let mut mailbox = Mailbox::new();

        let mut sequences = Vec::new();
        for payload in &payloads {
            sequences.push(mailbox.post(Bytes::from(payload.clone()), 100, 1024).unwrap());
        }

        for (i, expected) in sequences.iter().enumerate() {
            let message = mailbox.get().expect("queue should not be empty");
            prop_assert_eq!(message.sequence, *expected);
            prop_assert_eq!(&message.data[..], &payloads[i][..]);
        }
        prop_assert!(mailbox.get().is_none());
    }

    #[test]
    fn test_queue_cap_is_enforced(cap in 1usize..8) {
        let mut mailbox = Mailbox::new();
        for _ in 0..cap {
            mailbox.post(Bytes::from_static(b"x"), cap, 64).unwrap();
        }
        let overflow = mailbox.post(Bytes::from_static(b"x"), cap, 64);
        prop_assert!(matches!(overflow, Err(MailboxError::QueueFull)));
    }
}

#[test]
fn test_oversized_message_is_rejected() {
    let mut mailbox = Mailbox::new();
    let result = mailbox.post(Bytes::from(vec![0u8; 65]), 10, 64);
    assert!(matches!(result, Err(MailboxError::MessageTooLarge)));
}

#[test]
fn test_evict_expired_drops_old_messages() {
    let mut mailbox = Mailbox::new();
    mailbox.post(Bytes::from_static(b"stale"), 10, 64).unwrap();

    std::thread::sleep(Duration::from_millis(30));
    mailbox.post(Bytes::from_static(b"fresh"), 10, 64).unwrap();

    let evicted = mailbox.evict_expired(Duration::from_millis(20));
    assert_eq!(evicted, 1);
    let kept = mailbox.get().expect("fresh message kept");
    assert_eq!(&kept.data[..], b"fresh");
}

#[test]
fn test_idle_needs_empty_queue_and_inactivity() {
    let mut mailbox = Mailbox::new();
    mailbox.post(Bytes::from_static(b"x"), 10, 64).unwrap();

    std::thread::sleep(Duration::from_millis(20));
    // A queued message keeps the channel alive regardless of age.
    assert!(!mailbox.is_idle(Duration::from_millis(5)));

    mailbox.get();
    assert!(!mailbox.is_idle(Duration::from_millis(5)));
    std::thread::sleep(Duration::from_millis(20));
    assert!(mailbox.is_idle(Duration::from_millis(5)));
}
