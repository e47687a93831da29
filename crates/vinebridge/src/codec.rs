//! Length-prefixed framing and structured (de)serialization.
//!
//! Every message on a channel is an 8-byte little-endian length prefix
//! followed by a bincode body with fixed-width integers. The receiver reads
//! the full frame before deserializing, so the decoder itself never has to
//! deal with partial input.

use crate::error::CodecError;
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

/// Default per-channel frame cap. Far above the largest legitimate payload
/// (a plugin state chunk), far below anything that could exhaust memory when
/// a corrupted length prefix comes in.
pub const DEFAULT_FRAME_LIMIT: u64 = 64 * 1024 * 1024;

fn wire_options(limit: u64) -> impl Options {
    bincode::options()
        .with_little_endian()
        .with_fixint_encoding()
        .with_limit(limit)
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(wire_options(DEFAULT_FRAME_LIMIT).serialize(value)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(wire_options(DEFAULT_FRAME_LIMIT).deserialize(bytes)?)
}

/// Serialize `value` and write it as a single length-prefixed frame.
pub fn write_frame<W: Write, T: Serialize>(
    writer: &mut W,
    value: &T,
    limit: u64,
) -> Result<(), CodecError> {
    let body = wire_options(limit).serialize(value)?;
    let length = body.len() as u64;
    if length > limit {
        return Err(CodecError::FrameTooLarge { length, limit });
    }

    writer.write_all(&length.to_le_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Read exactly one length-prefixed frame and deserialize it.
pub fn read_frame<R: Read, T: DeserializeOwned>(
    reader: &mut R,
    limit: u64,
) -> Result<T, CodecError> {
    let mut prefix = [0u8; 8];
    reader.read_exact(&mut prefix)?;
    let length = u64::from_le_bytes(prefix);
    if length > limit {
        return Err(CodecError::FrameTooLarge { length, limit });
    }

    let mut body = vec![0u8; length as usize];
    reader.read_exact(&mut body)?;
    Ok(wire_options(limit).deserialize(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum Sample {
        Empty,
        Blob(Vec<u8>),
        Text(String),
        Pair { index: i32, value: f32 },
    }

    #[test]
    fn roundtrips_every_variant() {
        let samples = [
            Sample::Empty,
            Sample::Blob(vec![0xde, 0xad, 0xbe, 0xef]),
            Sample::Text("padded\0string".into()),
            Sample::Pair {
                index: 7,
                value: 0.25,
            },
        ];

        for sample in samples {
            let bytes = encode(&sample).unwrap();
            let decoded: Sample = decode(&bytes).unwrap();
            assert_eq!(sample, decoded);
        }
    }

    #[test]
    fn frames_are_delimited_and_fifo() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &Sample::Text("first".into()), 1024).unwrap();
        write_frame(&mut buffer, &Sample::Blob(vec![1, 2, 3]), 1024).unwrap();

        let mut cursor = std::io::Cursor::new(buffer);
        let first: Sample = read_frame(&mut cursor, 1024).unwrap();
        let second: Sample = read_frame(&mut cursor, 1024).unwrap();
        assert_eq!(first, Sample::Text("first".into()));
        assert_eq!(second, Sample::Blob(vec![1, 2, 3]));
    }

    #[test]
    fn rejects_oversized_length_prefix() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&u64::MAX.to_le_bytes());
        buffer.extend_from_slice(&[0u8; 16]);

        let mut cursor = std::io::Cursor::new(buffer);
        let result: Result<Sample, _> = read_frame(&mut cursor, 1024);
        assert!(matches!(result, Err(CodecError::FrameTooLarge { .. })));
    }

    #[test]
    fn rejects_oversized_payload_on_write() {
        let mut buffer = Vec::new();
        let result = write_frame(&mut buffer, &Sample::Blob(vec![0; 2048]), 64);
        assert!(result.is_err());
        assert!(buffer.is_empty());
    }

    #[test]
    fn rejects_unknown_discriminant() {
        // A discriminant far beyond the last `Sample` variant.
        let bytes = 99u32.to_le_bytes();
        let result: Result<Sample, _> = decode(&bytes);
        assert!(matches!(result, Err(CodecError::Malformed(_))));
    }

    #[test]
    fn rejects_invalid_utf8() {
        let mut bytes = encode(&Sample::Text("ok".into())).unwrap();
        // Corrupt the string body while keeping the length intact.
        let last = bytes.len() - 1;
        bytes[last] = 0xff;
        let result: Result<Sample, _> = decode(&bytes);
        assert!(matches!(result, Err(CodecError::Malformed(_))));
    }
}
