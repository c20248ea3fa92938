use std::thread;

use harmoniq_rt::{AtomRingBuffer, RingBuffer, SharedAtomRing};
use rand::Rng;

const MESSAGES: u32 = 50_000;

#[test]
fn spsc_ring_never_tears_or_reorders() {
    let (mut producer, mut consumer) = RingBuffer::new(512).into_split();

    let writer = thread::spawn(move || {
        let mut rng = rand::thread_rng();
        let mut seq = 0u32;
        while seq < MESSAGES {
            let len: u8 = rng.gen_range(0..48);
            let fill = seq as u8;
            producer.try_write_u32(seq);
            producer.try_write_u8(len);
            for _ in 0..len {
                producer.try_write_u8(fill);
            }
            if producer.commit_write() {
                seq += 1;
            } else {
                thread::yield_now();
            }
        }
    });

    let mut expected = 0u32;
    let mut payload = [0u8; 64];
    while expected < MESSAGES {
        let Some(seq) = consumer.try_read_u32() else {
            thread::yield_now();
            continue;
        };
        assert_eq!(seq, expected, "messages arrived out of order");
        let len = consumer.try_read_u8().expect("length committed with sequence") as usize;
        assert!(consumer.try_read(&mut payload[..len]), "payload committed with header");
        assert!(payload[..len].iter().all(|&b| b == seq as u8), "torn payload for {seq}");
        expected += 1;
    }

    writer.join().unwrap();
    assert!(!consumer.is_data_available());
}

#[test]
fn structured_ring_drained_by_swap_keeps_order() {
    let source = std::sync::Arc::new(SharedAtomRing::new(4096));
    let scratch = SharedAtomRing::new(4096);

    let writer = {
        let source = std::sync::Arc::clone(&source);
        thread::spawn(move || {
            let mut index = 0i32;
            while index < 5_000 {
                if source.put(1, index, &index.to_ne_bytes()) {
                    index += 1;
                } else {
                    thread::yield_now();
                }
            }
        })
    };

    let mut next = 0i32;
    let mut buf = [0u8; 4];
    while next < 5_000 {
        source.drain_swap(&scratch);
        let mut ring = scratch.lock();
        while let Ok(Some(header)) = ring.try_read(&mut buf) {
            assert_eq!(header.index, next);
            assert_eq!(i32::from_ne_bytes(buf), next);
            next += 1;
        }
        drop(ring);
        thread::yield_now();
    }
    writer.join().unwrap();
}

#[test]
fn structured_ring_rejects_oversized_without_losing_later_messages() {
    let mut ring = AtomRingBuffer::new(256);
    assert!(ring.put(2, 0, &[0u8; 100]));
    assert!(ring.put(2, 1, &[1u8; 2]));
    let mut buf = [0u8; 8];
    assert!(ring.try_read(&mut buf).is_err());
    let header = ring.try_read(&mut buf).unwrap().unwrap();
    assert_eq!(header.index, 1);
}
