use bytes::BytesMut;
use merlin_wire::{decode, encode, Decoded, Event};

fn sample_events() -> Vec<Event> {
    vec![
        Event::new_ctrl(merlin_wire::ctrl::ACTIVE, 1),
        Event::new_data(100, 0, 2, b"host check result".to_vec()),
        Event::new_data(101, 3, 3, Vec::new()),
        Event::new_data(102, 0, 4, vec![0xAB; 4096]),
        Event::new_ctrl(merlin_wire::ctrl::INACTIVE, 5),
    ]
}

/// Concatenating the encoding of a sequence and feeding it to the decoder
/// in arbitrary byte-sized chunks must reproduce exactly that sequence, in
/// order, regardless of how TCP happened to segment it (spec §8).
#[test]
fn arbitrary_chunking_reproduces_sequence() {
    let events = sample_events();
    let mut wire = BytesMut::new();
    for e in &events {
        encode(e, &mut wire).unwrap();
    }
    let wire = wire.freeze();

    for chunk_size in [1usize, 2, 3, 7, 19, 64, 4096, wire.len()] {
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        let mut offset = 0;
        while offset < wire.len() {
            let end = (offset + chunk_size).min(wire.len());
            buf.extend_from_slice(&wire[offset..end]);
            offset = end;

            loop {
                match decode(&mut buf).unwrap() {
                    Decoded::Event(ev) => decoded.push(ev),
                    Decoded::NeedMore => break,
                }
            }
        }
        assert_eq!(decoded, events, "mismatch at chunk_size={chunk_size}");
        assert!(buf.is_empty());
    }
}

#[test]
fn trailing_bytes_of_next_frame_are_preserved() {
    let events = sample_events();
    let mut wire = BytesMut::new();
    for e in &events {
        encode(e, &mut wire).unwrap();
    }

    let mut buf = wire.clone();
    let first = decode(&mut buf).unwrap();
    assert_eq!(first, Decoded::Event(events[0].clone()));
    // whatever remains must still decode cleanly into the rest
    let mut rest = Vec::new();
    loop {
        match decode(&mut buf).unwrap() {
            Decoded::Event(ev) => rest.push(ev),
            Decoded::NeedMore => break,
        }
    }
    assert_eq!(rest, events[1..]);
}
