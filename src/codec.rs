//! Frame codec: audio blocks to wire-safe text and back.
//!
//! The wire representation is standard base64 over the little-endian byte
//! image of the 16-bit samples. `encode` and `decode` are mutual inverses
//! for every well-formed block; neither has side effects.

use base64::prelude::*;

use crate::audio::AudioBlock;
use crate::error::{SessionError, SessionResult};

/// Encode a block as wire text.
pub fn encode(block: &AudioBlock) -> String {
    BASE64_STANDARD.encode(block.to_le_bytes())
}

/// Decode wire text back into a block.
///
/// Fails with [`SessionError::MalformedFrame`] when the input is not valid
/// base64 or does not decode to whole 16-bit samples.
pub fn decode(text: &str) -> SessionResult<AudioBlock> {
    let bytes = BASE64_STANDARD
        .decode(text)
        .map_err(|e| SessionError::MalformedFrame(e.to_string()))?;
    if bytes.len() % 2 != 0 {
        return Err(SessionError::MalformedFrame(format!(
            "odd byte count: {}",
            bytes.len()
        )));
    }
    Ok(AudioBlock::from_le_bytes(&bytes))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let block = AudioBlock::new(vec![0, 42, -42, i16::MAX, i16::MIN, -1]);
        let wire = encode(&block);
        let decoded = decode(&wire).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn test_round_trip_empty() {
        let block = AudioBlock::new(Vec::new());
        assert_eq!(decode(&encode(&block)).unwrap(), block);
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        let result = decode("!!!not base64!!!");
        match result {
            Err(SessionError::MalformedFrame(_)) => {}
            other => panic!("Expected MalformedFrame, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_odd_byte_count() {
        // Three raw bytes cannot form 16-bit samples.
        let wire = BASE64_STANDARD.encode([1u8, 2, 3]);
        let result = decode(&wire);
        match result {
            Err(SessionError::MalformedFrame(msg)) => assert!(msg.contains("odd byte count")),
            other => panic!("Expected MalformedFrame, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_is_standard_base64() {
        let block = AudioBlock::new(vec![0x0102]);
        assert_eq!(encode(&block), BASE64_STANDARD.encode([0x02u8, 0x01]));
    }
}
