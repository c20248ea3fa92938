#![no_main]

use harmoniq_rt::{AtomReadError, AtomRingBuffer};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut ring = AtomRingBuffer::new(512);
    let mut payload = [0u8; 64];
    for op in data.chunks(4) {
        match op {
            [0, atom_type, len, ..] => {
                let len = usize::from(*len);
                let bytes = vec![*atom_type; len];
                ring.put(u32::from(*atom_type), i32::from(*len), &bytes);
            }
            [1, ..] => match ring.try_read(&mut payload) {
                Ok(Some(header)) => assert!((header.size as usize) <= payload.len()),
                Ok(None) => assert!(!ring.is_data_available()),
                Err(AtomReadError::TooLarge { size, max }) => assert!(size > max),
                Err(AtomReadError::Truncated) => panic!("committed messages are never partial"),
            },
            [2, ..] => ring.clear(),
            _ => {}
        }
    }
    ring.clear();
});
