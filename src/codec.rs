//! Binary reply codec and the KEYS/ARGV request frame.
//!
//! Pure serialization logic; no Lua, no host imports, no global state.
//! Mirrors the `Reader`-plus-manual-LE-helpers style used for the wire
//! formats in this codebase's sibling primitives crate, adapted to the
//! tag-plus-length-prefixed `Reply` shape.

use thiserror::Error;

/// Maximum nesting depth `encode_value`/`decode_reply` will recurse
/// through. Matches the guest's own default script recursion guard so a
/// pathological reply can't blow the native stack before the script-level
/// limits even get a chance to apply.
pub const MAX_REPLY_DEPTH: usize = 64;

const TAG_NULL: u8 = 0x00;
const TAG_INT: u8 = 0x01;
const TAG_BULK: u8 = 0x02;
const TAG_ARRAY: u8 = 0x03;
const TAG_STATUS: u8 = 0x04;
const TAG_ERROR: u8 = 0x05;

/// A single reply value: the currency of both the host call bridge and the
/// final script-to-host response.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Null,
    Int(i64),
    Bulk(Vec<u8>),
    Array(Vec<Reply>),
    Status(Vec<u8>),
    Error(Vec<u8>),
}

/// Failure decoding a `Reply` or a KEYS/ARGV request frame.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum DecodeError {
    #[error("buffer truncated")]
    Truncated,
    #[error("unknown reply tag {0:#04x}")]
    UnknownTag(u8),
    #[error("nesting exceeds depth limit of {0}")]
    TooDeep(usize),
    #[error("keys_count {keys_count} exceeds item count {item_count}")]
    KeysCountExceedsTotal { keys_count: u32, item_count: u32 },
}

fn write_header(buf: &mut Vec<u8>, tag: u8, count_or_len: u32) {
    buf.push(tag);
    buf.extend_from_slice(&count_or_len.to_le_bytes());
}

/// Encode a single reply value, appending to `buf`. Returns an error only
/// when `value` nests an `Array` deeper than [`MAX_REPLY_DEPTH`].
pub fn encode_value(value: &Reply, buf: &mut Vec<u8>) -> Result<(), DecodeError> {
    encode_value_at(value, buf, 0)
}

fn encode_value_at(value: &Reply, buf: &mut Vec<u8>, depth: usize) -> Result<(), DecodeError> {
    if depth > MAX_REPLY_DEPTH {
        return Err(DecodeError::TooDeep(MAX_REPLY_DEPTH));
    }
    match value {
        Reply::Null => write_header(buf, TAG_NULL, 0),
        Reply::Int(v) => {
            write_header(buf, TAG_INT, 8);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Reply::Bulk(bytes) => {
            write_header(buf, TAG_BULK, bytes.len() as u32);
            buf.extend_from_slice(bytes);
        }
        Reply::Status(bytes) => {
            write_header(buf, TAG_STATUS, bytes.len() as u32);
            buf.extend_from_slice(bytes);
        }
        Reply::Error(bytes) => {
            write_header(buf, TAG_ERROR, bytes.len() as u32);
            buf.extend_from_slice(bytes);
        }
        Reply::Array(items) => {
            write_header(buf, TAG_ARRAY, items.len() as u32);
            for item in items {
                encode_value_at(item, buf, depth + 1)?;
            }
        }
    }
    Ok(())
}

/// Encode `value` as a freshly allocated buffer.
pub fn encode_reply(value: &Reply) -> Result<Vec<u8>, DecodeError> {
    let mut buf = Vec::new();
    encode_value(value, &mut buf)?;
    Ok(buf)
}

/// Decode one reply value starting at `buf[*offset]`, advancing `*offset`
/// past it. Recurses for `Array` payloads, bounded by [`MAX_REPLY_DEPTH`].
pub fn decode_reply(buf: &[u8], offset: &mut usize) -> Result<Reply, DecodeError> {
    decode_reply_at(buf, offset, 0)
}

fn decode_reply_at(buf: &[u8], offset: &mut usize, depth: usize) -> Result<Reply, DecodeError> {
    if depth > MAX_REPLY_DEPTH {
        return Err(DecodeError::TooDeep(MAX_REPLY_DEPTH));
    }
    if buf.len().saturating_sub(*offset) < 5 {
        return Err(DecodeError::Truncated);
    }
    let tag = buf[*offset];
    let count_or_len = u32::from_le_bytes(buf[*offset + 1..*offset + 5].try_into().unwrap());
    *offset += 5;

    match tag {
        TAG_NULL => Ok(Reply::Null),
        TAG_INT => {
            if buf.len().saturating_sub(*offset) < 8 {
                return Err(DecodeError::Truncated);
            }
            let value = i64::from_le_bytes(buf[*offset..*offset + 8].try_into().unwrap());
            *offset += 8;
            Ok(Reply::Int(value))
        }
        TAG_BULK | TAG_STATUS | TAG_ERROR => {
            let len = count_or_len as usize;
            if buf.len().saturating_sub(*offset) < len {
                return Err(DecodeError::Truncated);
            }
            let bytes = buf[*offset..*offset + len].to_vec();
            *offset += len;
            Ok(match tag {
                TAG_BULK => Reply::Bulk(bytes),
                TAG_STATUS => Reply::Status(bytes),
                _ => Reply::Error(bytes),
            })
        }
        TAG_ARRAY => {
            let mut items = Vec::with_capacity(count_or_len.min(4096) as usize);
            for _ in 0..count_or_len {
                items.push(decode_reply_at(buf, offset, depth + 1)?);
            }
            Ok(Reply::Array(items))
        }
        other => Err(DecodeError::UnknownTag(other)),
    }
}

/// Build a KEYS/ARGV-style request frame: a 4-byte LE item count followed
/// by, for each item, a 4-byte LE length and its bytes.
pub fn build_request<T: AsRef<[u8]>>(items: &[T]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + items.len() * 8);
    buf.extend_from_slice(&(items.len() as u32).to_le_bytes());
    for item in items {
        let bytes = item.as_ref();
        buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(bytes);
    }
    buf
}

/// Parse a request frame into its items, verifying that `expected_keys`
/// (the script's claimed KEYS count) does not exceed the item count. Fails
/// if the frame is truncated or any item length would overrun the buffer.
pub fn parse_request(buf: &[u8], expected_keys: u32) -> Result<Vec<Vec<u8>>, DecodeError> {
    if buf.len() < 4 {
        return Err(DecodeError::Truncated);
    }
    let count = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    if expected_keys > count {
        return Err(DecodeError::KeysCountExceedsTotal {
            keys_count: expected_keys,
            item_count: count,
        });
    }
    let mut offset = 4usize;
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if buf.len().saturating_sub(offset) < 4 {
            return Err(DecodeError::Truncated);
        }
        let len = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap()) as usize;
        offset += 4;
        if buf.len().saturating_sub(offset) < len {
            return Err(DecodeError::Truncated);
        }
        items.push(buf[offset..offset + len].to_vec());
        offset += len;
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encodes_int_scenario() {
        // eval("return 42") -> 01 08 00 00 00 2A 00 00 00 00 00 00 00.
        let buf = encode_reply(&Reply::Int(42)).unwrap();
        assert_eq!(
            buf,
            vec![TAG_INT, 8, 0, 0, 0, 42, 0, 0, 0, 0, 0, 0, 0]
        );
        let mut off = 0;
        assert_eq!(decode_reply(&buf, &mut off).unwrap(), Reply::Int(42));
    }

    #[test]
    fn encodes_nested_array() {
        let value = Reply::Array(vec![
            Reply::Int(1),
            Reply::Bulk(b"two".to_vec()),
            Reply::Array(vec![Reply::Null]),
        ]);
        let buf = encode_reply(&value).unwrap();
        let mut off = 0;
        assert_eq!(decode_reply(&buf, &mut off).unwrap(), value);
        assert_eq!(off, buf.len());
    }

    #[test]
    fn decode_truncated_header_fails() {
        let mut off = 0;
        assert_eq!(
            decode_reply(&[0x01, 0x00, 0x00], &mut off),
            Err(DecodeError::Truncated)
        );
    }

    #[test]
    fn decode_unknown_tag_fails() {
        let buf = [0xAA, 0, 0, 0, 0];
        let mut off = 0;
        assert_eq!(decode_reply(&buf, &mut off), Err(DecodeError::UnknownTag(0xAA)));
    }

    #[test]
    fn decode_array_claiming_too_many_items_fails_cleanly() {
        let mut buf = Vec::new();
        write_header(&mut buf, TAG_ARRAY, 3);
        encode_value(&Reply::Int(1), &mut buf).unwrap();
        let mut off = 0;
        assert_eq!(decode_reply(&buf, &mut off), Err(DecodeError::Truncated));
    }

    #[test]
    fn request_round_trip() {
        let items: Vec<&[u8]> = vec![b"key1", b"arg1", b"arg2"];
        let frame = build_request(&items);
        let parsed = parse_request(&frame, 1).unwrap();
        assert_eq!(parsed, vec![b"key1".to_vec(), b"arg1".to_vec(), b"arg2".to_vec()]);
    }

    #[test]
    fn request_keys_count_exceeding_total_fails() {
        let items: Vec<&[u8]> = vec![b"only_one"];
        let frame = build_request(&items);
        assert_eq!(
            parse_request(&frame, 2),
            Err(DecodeError::KeysCountExceedsTotal {
                keys_count: 2,
                item_count: 1
            })
        );
    }

    #[test]
    fn request_empty_frame_with_zero_keys() {
        let items: Vec<&[u8]> = vec![];
        let frame = build_request(&items);
        assert_eq!(parse_request(&frame, 0).unwrap(), Vec::<Vec<u8>>::new());
    }

    fn arb_reply() -> impl Strategy<Value = Reply> {
        let leaf = prop_oneof![
            Just(Reply::Null),
            any::<i64>().prop_map(Reply::Int),
            proptest::collection::vec(any::<u8>(), 0..64).prop_map(Reply::Bulk),
            proptest::collection::vec(any::<u8>(), 0..64).prop_map(Reply::Status),
            proptest::collection::vec(any::<u8>(), 0..64).prop_map(Reply::Error),
        ];
        leaf.prop_recursive(4, 64, 8, |inner| {
            proptest::collection::vec(inner, 0..8).prop_map(Reply::Array)
        })
    }

    proptest! {
        #[test]
        fn reply_round_trips_through_encode_decode(value in arb_reply()) {
            let buf = encode_reply(&value).unwrap();
            let mut off = 0;
            let decoded = decode_reply(&buf, &mut off).unwrap();
            prop_assert_eq!(decoded, value);
            prop_assert_eq!(off, buf.len());
        }

        #[test]
        fn request_frame_round_trips(items in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..32), 0..16)) {
            let frame = build_request(&items);
            let parsed = parse_request(&frame, 0).unwrap();
            prop_assert_eq!(parsed, items);
        }
    }
}
