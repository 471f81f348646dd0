//! Block codec — encode/decode one JSON record to/from a fixed-size buffer.
//!
//! Encoding: canonical JSON via `serde_json`, optionally SMAZ-compressed,
//! padded with ASCII spaces (0x20) to exactly `block_size` bytes. Decoding
//! reverses this, trimming to the outermost `{`..`}` pair before parsing so
//! that trailing pad bytes (or, for compressed blocks, decompressed pad
//! space runs) never reach the JSON parser.

use serde_json::Value;

use crate::compression;
use crate::error::{JinnError, Result};

pub const PAD_BYTE: u8 = b' ';

/// Pre-padding byte length of `record` once compressed (or not) — the
/// figure mutation code compares against `block_size` to decide on a resize.
pub fn encoded_length(record: &Value, compressed: bool) -> Result<usize> {
    Ok(encode_payload(record, compressed)?.len())
}

fn encode_payload(record: &Value, compressed: bool) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(record)
        .map_err(|e| JinnError::InvalidArgument(format!("record is not valid JSON: {e}")))?;
    Ok(if compressed {
        compression::compress(&json)
    } else {
        json
    })
}

/// Encode `record` into a buffer of exactly `block_size` bytes.
///
/// Fails with [`JinnError::InvalidArgument`] if the encoded payload does not
/// fit; callers (the mutation engine) are responsible for resizing the
/// store before calling this.
pub fn encode_block(record: &Value, block_size: u64, compressed: bool) -> Result<Vec<u8>> {
    let payload = encode_payload(record, compressed)?;
    let block_size = block_size as usize;
    if payload.len() > block_size {
        return Err(JinnError::InvalidArgument(format!(
            "encoded record is {} bytes, exceeds block size {}",
            payload.len(),
            block_size
        )));
    }
    let mut buf = vec![PAD_BYTE; block_size];
    buf[..payload.len()].copy_from_slice(&payload);
    Ok(buf)
}

/// Decode a full block buffer back into a JSON record.
///
/// `block` must be exactly `block_size` bytes, as read straight off disk.
pub fn decode_block(block: &[u8], block_index: u64, compressed: bool) -> Result<Value> {
    let raw: Vec<u8> = if compressed {
        compression::decompress(block).ok_or_else(|| JinnError::CorruptBlock {
            block: block_index,
            reason: "SMAZ decompression failed".to_string(),
        })?
    } else {
        block.to_vec()
    };

    let start = raw.iter().position(|&b| b == b'{');
    let end = raw.iter().rposition(|&b| b == b'}');
    let (start, end) = match (start, end) {
        (Some(s), Some(e)) if s <= e => (s, e),
        _ => {
            return Err(JinnError::CorruptBlock {
                block: block_index,
                reason: "no JSON object braces found in block".to_string(),
            })
        }
    };

    serde_json::from_slice(&raw[start..=end]).map_err(|e| JinnError::CorruptBlock {
        block: block_index,
        reason: format!("JSON parse failed: {e}"),
    })
}

/// Smallest power of two `>= n`, with a floor of 1.
pub fn next_pow2(n: usize) -> u64 {
    if n == 0 {
        return 1;
    }
    (n as u64).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn roundtrip_uncompressed() {
        let rec = json!({"_id": "1", "data": "Hello"});
        let block = encode_block(&rec, 64, false).unwrap();
        assert_eq!(block.len(), 64);
        let decoded = decode_block(&block, 0, false).unwrap();
        assert_eq!(decoded, rec);
    }

    #[test]
    fn roundtrip_compressed() {
        let rec = json!({"_id": "1", "data": "the quick brown fox and the lazy dog"});
        let len = encoded_length(&rec, true).unwrap();
        let block = encode_block(&rec, (len + 16) as u64, true).unwrap();
        let decoded = decode_block(&block, 0, true).unwrap();
        assert_eq!(decoded, rec);
    }

    #[test]
    fn oversize_record_errors() {
        let rec = json!({"_id": "1", "data": "this is far too long to fit"});
        assert!(encode_block(&rec, 4, false).is_err());
    }

    #[test]
    fn corrupt_block_without_braces_errors() {
        let block = vec![PAD_BYTE; 32];
        assert!(matches!(
            decode_block(&block, 3, false),
            Err(JinnError::CorruptBlock { block: 3, .. })
        ));
    }

    #[test]
    fn next_pow2_examples() {
        assert_eq!(next_pow2(0), 1);
        assert_eq!(next_pow2(1), 1);
        assert_eq!(next_pow2(63), 64);
        assert_eq!(next_pow2(64), 64);
        assert_eq!(next_pow2(65), 128);
    }
}
