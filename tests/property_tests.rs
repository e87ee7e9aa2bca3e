//! Property tests for the framing, queueing and sealing primitives.

use proptest::prelude::*;

use secure_access::bounded_queue::BoundedQueue;
use secure_access::protocol::frame::{
    DataFrame, FramePackage, FrameType, HEADER_SIZE, frame_size_for_mtu, reassemble,
};
use secure_access::security::crypto::{BLOCK_SIZE, Direction, EncryptionContext, MAC_SIZE};

// ── Framing ──────────────────────────────────────────────────

proptest! {
    /// Whatever the MTU, the receiver gets back exactly what was framed.
    #[test]
    fn framed_messages_reassemble(
        message in proptest::collection::vec(any::<u8>(), 0..600),
        mtu in (HEADER_SIZE + 1)..200usize,
    ) {
        let package = FramePackage::new(&message, frame_size_for_mtu(mtu)).unwrap();

        // Every frame survives the wire encoding.
        let wire: Vec<DataFrame> = package
            .frames()
            .iter()
            .map(|f| DataFrame::parse(&f.to_bytes()).unwrap())
            .collect();

        prop_assert_eq!(reassemble(&wire), Some(message));
    }

    /// A message fits one `Single` frame iff it is no larger than one
    /// frame's payload.
    #[test]
    fn single_frame_threshold(
        len in 0..300usize,
        mtu in (HEADER_SIZE + 1)..160usize,
    ) {
        let frame_size = frame_size_for_mtu(mtu);
        let package = FramePackage::new(&vec![0xA5; len], frame_size).unwrap();
        let frames = package.frames();

        if len <= frame_size {
            prop_assert_eq!(frames.len(), 1);
            prop_assert_eq!(frames[0].frame_type, FrameType::Single);
        } else {
            prop_assert_eq!(frames.len(), len.div_ceil(frame_size));
            prop_assert_eq!(frames[0].frame_type, FrameType::Sop);
            prop_assert_eq!(frames[0].length as usize, len);
            prop_assert_eq!(frames.last().unwrap().frame_type, FrameType::Eop);
            for frame in &frames[..frames.len() - 1] {
                prop_assert_eq!(frame.payload.len(), frame_size);
            }
            for frame in frames {
                prop_assert!(frame.to_bytes().len() <= mtu);
            }
        }
    }
}

// ── Bounded queue ────────────────────────────────────────────

proptest! {
    /// Elements come out in order and nothing past capacity gets in.
    #[test]
    fn queue_keeps_order_and_capacity(
        capacity in 1..16usize,
        items in proptest::collection::vec(any::<u16>(), 0..40),
    ) {
        let mut queue = BoundedQueue::new(capacity);
        let mut accepted = Vec::new();
        for item in &items {
            match queue.enqueue(*item) {
                Ok(()) => accepted.push(*item),
                Err(_) => prop_assert_eq!(queue.len(), capacity),
            }
            prop_assert!(queue.len() <= capacity);
        }

        prop_assert_eq!(accepted.len(), items.len().min(capacity));
        let drained: Vec<u16> = std::iter::from_fn(|| queue.dequeue()).collect();
        prop_assert_eq!(&drained, &items[..accepted.len()]);
        prop_assert!(queue.is_empty());
    }
}

// ── Sealing ──────────────────────────────────────────────────

proptest! {
    /// A run of messages opens on the far side with the IVs in lockstep,
    /// and the sealed size is whole blocks plus the MAC.
    #[test]
    fn sealed_messages_open_in_sequence(
        key in proptest::array::uniform16(any::<u8>()),
        messages in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..80),
            1..6,
        ),
    ) {
        let mut phone = EncryptionContext::new(&key, Direction::ToSorc).unwrap();
        let mut sorc = EncryptionContext::new(&key, Direction::ToPhone).unwrap();

        for message in &messages {
            let sealed = phone.encrypt(message).unwrap();
            prop_assert_eq!((sealed.len() - MAC_SIZE) % BLOCK_SIZE, 0);
            prop_assert_eq!(&sorc.decrypt(&sealed).unwrap(), message);

            let reply = sorc.encrypt(message).unwrap();
            prop_assert_eq!(&phone.decrypt(&reply).unwrap(), message);
        }
    }

    /// Flipping any bit of a sealed message is caught.
    #[test]
    fn any_flipped_bit_is_rejected(
        message in proptest::collection::vec(any::<u8>(), 1..48),
        bit in any::<proptest::sample::Index>(),
    ) {
        let key = [0x42; 16];
        let mut phone = EncryptionContext::new(&key, Direction::ToSorc).unwrap();
        let mut sorc = EncryptionContext::new(&key, Direction::ToPhone).unwrap();

        let mut sealed = phone.encrypt(&message).unwrap();
        let i = bit.index(sealed.len() * 8);
        sealed[i / 8] ^= 1 << (i % 8);

        prop_assert!(sorc.decrypt(&sealed).is_err());
    }
}
