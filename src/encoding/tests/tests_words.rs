//! Wire round-trips for the word shapes: words, tuples, optional
//! words, and sequences, plus the reader's offset bookkeeping.

use crate::encoding::*;

#[test]
fn roundtrip_word() {
    let bytes = to_bytes(&0x0102_0304_0506_0708u64);
    assert_eq!(bytes, [0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
    assert_eq!(from_bytes::<u64>(&bytes).unwrap(), 0x0102_0304_0506_0708);
}

#[test]
fn roundtrip_word_tuple() {
    // The quad-key shape: six words, no length prefix.
    let key: [u64; 6] = [1, 2, 3, 0, 42, u64::MAX];
    let bytes = to_bytes(&key);
    assert_eq!(bytes.len(), 48);
    assert_eq!(from_bytes::<[u64; 6]>(&bytes).unwrap(), key);

    // And the quad-id shape.
    let ids: [u64; 4] = [9, 8, 7, 0];
    assert_eq!(from_bytes::<[u64; 4]>(&to_bytes(&ids)).unwrap(), ids);
}

#[test]
fn roundtrip_optional_word() {
    let some: Option<u64> = Some(99);
    let none: Option<u64> = None;

    let bytes = to_bytes(&some);
    assert_eq!(bytes[0], 1, "presence byte first");
    assert_eq!(bytes.len(), 9);
    assert_eq!(from_bytes::<Option<u64>>(&bytes).unwrap(), some);

    let bytes = to_bytes(&none);
    assert_eq!(bytes, [0]);
    assert_eq!(from_bytes::<Option<u64>>(&bytes).unwrap(), none);
}

#[test]
fn optional_word_rejects_junk_presence_byte() {
    let err = from_bytes::<Option<u64>>(&[7]).unwrap_err();
    let WireError::BadTag { offset, tag, .. } = err else {
        panic!("expected BadTag, got {err}");
    };
    assert_eq!(offset, 0);
    assert_eq!(tag, 7);
}

#[test]
fn roundtrip_sequence() {
    let words: Vec<u64> = vec![10, 20, 30];
    let mut buf = Vec::new();
    put_seq(&words, &mut buf);
    assert_eq!(&buf[..4], &3u32.to_le_bytes());

    let mut reader = Reader::new(&buf);
    assert_eq!(take_seq::<u64>(&mut reader).unwrap(), words);
    reader.expect_end().unwrap();
}

#[test]
fn empty_sequence_is_four_bytes() {
    let mut buf = Vec::new();
    put_seq::<u64>(&[], &mut buf);
    assert_eq!(buf, [0, 0, 0, 0]);

    let mut reader = Reader::new(&buf);
    assert!(take_seq::<u64>(&mut reader).unwrap().is_empty());
}

#[test]
fn reader_tracks_offsets_across_values() {
    let mut buf = Vec::new();
    5u64.put(&mut buf);
    Some(6u64).put(&mut buf);

    let mut reader = Reader::new(&buf);
    assert_eq!(reader.offset(), 0);
    assert_eq!(reader.word().unwrap(), 5);
    assert_eq!(reader.offset(), 8);
    assert_eq!(<Option<u64> as Wire>::take(&mut reader).unwrap(), Some(6));
    assert_eq!(reader.offset(), 17);
    assert_eq!(reader.remaining(), 0);
}

#[test]
fn put_is_deterministic() {
    // Frames are checksummed over these bytes; encode twice, compare.
    let key: [u64; 6] = [11, 22, 33, 44, 55, 66];
    assert_eq!(to_bytes(&key), to_bytes(&key));
    let opt: Option<u64> = Some(7);
    assert_eq!(to_bytes(&opt), to_bytes(&opt));
}
