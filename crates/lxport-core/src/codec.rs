//! Block-compression codec for the compressed tunnel variant.
//!
//! Each WebSocket binary message is one independent block: the sender encodes
//! the bytes it read from TCP, the receiver decodes each message before writing
//! it to its TCP leg.  The broker never touches the codec; it forwards frames
//! untouched.
//!
//! [`BlockCodec`] is the seam where the codec plugs in.  Two implementations
//! ship: [`SnappyCodec`] (snappy block format, the agents' default) and
//! [`DeflateCodec`] (raw DEFLATE via `flate2`).  Both agents of one tunnel
//! must use the same [`CodecKind`].

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;
use std::sync::Arc;

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::protocol::command::ProtocolError;

/// Encodes and decodes one self-contained block of bytes.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait BlockCodec: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// Compresses `input` into a standalone block.
    fn encode(&self, input: &[u8]) -> Result<Vec<u8>, ProtocolError>;

    /// Decompresses one block produced by [`BlockCodec::encode`].
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>, ProtocolError>;
}

/// Selects a [`BlockCodec`] by name (`snappy` or `deflate`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CodecKind {
    #[default]
    Snappy,
    Deflate,
}

impl CodecKind {
    pub fn build(self) -> Arc<dyn BlockCodec> {
        match self {
            CodecKind::Snappy => Arc::new(SnappyCodec),
            CodecKind::Deflate => Arc::new(DeflateCodec::default()),
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecKind::Snappy => f.write_str("snappy"),
            CodecKind::Deflate => f.write_str("deflate"),
        }
    }
}

impl FromStr for CodecKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "snappy" => Ok(CodecKind::Snappy),
            "deflate" => Ok(CodecKind::Deflate),
            other => Err(ProtocolError::Codec(format!("unknown codec '{other}'"))),
        }
    }
}

/// Snappy raw block format (no framing), one block per message.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnappyCodec;

impl BlockCodec for SnappyCodec {
    fn name(&self) -> &'static str {
        "snappy"
    }

    fn encode(&self, input: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        snap::raw::Encoder::new()
            .compress_vec(input)
            .map_err(|e| ProtocolError::Codec(e.to_string()))
    }

    fn decode(&self, input: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        snap::raw::Decoder::new()
            .decompress_vec(input)
            .map_err(|e| ProtocolError::Codec(e.to_string()))
    }
}

/// Raw DEFLATE (RFC 1951) blocks.
#[derive(Debug, Clone, Copy)]
pub struct DeflateCodec {
    level: Compression,
}

impl DeflateCodec {
    /// Creates a codec with the given compression level (0–9).
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Default for DeflateCodec {
    /// Favors speed: tunnel frames are small and latency-sensitive.
    fn default() -> Self {
        Self {
            level: Compression::fast(),
        }
    }
}

impl BlockCodec for DeflateCodec {
    fn name(&self) -> &'static str {
        "deflate"
    }

    fn encode(&self, input: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let mut encoder = DeflateEncoder::new(Vec::with_capacity(input.len() / 2 + 16), self.level);
        encoder
            .write_all(input)
            .map_err(|e| ProtocolError::Codec(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| ProtocolError::Codec(e.to_string()))
    }

    fn decode(&self, input: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let mut decoder = DeflateDecoder::new(input);
        let mut out = Vec::with_capacity(input.len() * 2);
        decoder
            .read_to_end(&mut out)
            .map_err(|e| ProtocolError::Codec(e.to_string()))?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deflate_round_trip_restores_input() {
        let codec = DeflateCodec::default();
        let input: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let encoded = codec.encode(&input).unwrap();
        let decoded = codec.decode(&encoded).unwrap();

        assert_eq!(decoded, input);
    }

    #[test]
    fn test_deflate_round_trip_empty_block() {
        let codec = DeflateCodec::new(6);
        let encoded = codec.encode(&[]).unwrap();
        assert_eq!(codec.decode(&encoded).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_deflate_compresses_repetitive_data() {
        let codec = DeflateCodec::default();
        let input = vec![b'a'; 8192];
        let encoded = codec.encode(&input).unwrap();
        assert!(encoded.len() < input.len() / 10, "got {} bytes", encoded.len());
    }

    #[test]
    fn test_deflate_decode_garbage_returns_codec_error() {
        let codec = DeflateCodec::default();
        // 0xFF starts a block with the reserved BTYPE=11, which is invalid.
        let result = codec.decode(&[0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(result, Err(ProtocolError::Codec(_))));
    }

    #[test]
    fn test_snappy_round_trip_restores_input() {
        let codec = SnappyCodec;
        let input: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let encoded = codec.encode(&input).unwrap();

        assert_eq!(codec.decode(&encoded).unwrap(), input);
    }

    #[test]
    fn test_snappy_block_starts_with_varint_length() {
        // Raw snappy blocks begin with the uncompressed length as a varint.
        let encoded = SnappyCodec.encode(&[7u8; 300]).unwrap();
        assert_eq!(&encoded[..2], &[0xAC, 0x02]);
    }

    #[test]
    fn test_snappy_decode_garbage_returns_codec_error() {
        let result = SnappyCodec.decode(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(result, Err(ProtocolError::Codec(_))));
    }

    #[test]
    fn test_codec_kind_parses_names_and_defaults_to_snappy() {
        assert_eq!(CodecKind::default(), CodecKind::Snappy);
        assert_eq!("deflate".parse::<CodecKind>().unwrap(), CodecKind::Deflate);
        assert_eq!("Snappy".parse::<CodecKind>().unwrap(), CodecKind::Snappy);
        assert!("lz4".parse::<CodecKind>().is_err());
    }

    #[test]
    fn test_codec_kind_builds_matching_codec() {
        assert_eq!(CodecKind::Snappy.build().name(), "snappy");
        assert_eq!(CodecKind::Deflate.build().name(), "deflate");
        assert_eq!(CodecKind::Deflate.to_string(), "deflate");
    }

    #[test]
    fn test_level_is_clamped() {
        let codec = DeflateCodec::new(42);
        let encoded = codec.encode(b"hello").unwrap();
        assert_eq!(codec.decode(&encoded).unwrap(), b"hello");
    }
}
