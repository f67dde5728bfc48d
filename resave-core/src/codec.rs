//! Compression used by the save body envelope and by change form bodies.
//!
//! Both directions are pure functions over byte buffers; they know nothing
//! about the file structure around them.

use std::io::{Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression as ZlibLevel};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Body compression as recorded in the save header.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::Display, strum::FromRepr,
)]
#[repr(u16)]
pub enum Compression {
    #[default]
    None = 0,
    Zlib = 1,
    Lz4 = 2,
}

impl Compression {
    pub fn is_compressed(self) -> bool {
        self != Compression::None
    }

    pub fn inflate(self, compressed: &[u8], declared: usize) -> Result<Vec<u8>, CodecError> {
        match self {
            Compression::None => {
                if compressed.len() != declared {
                    return Err(CodecError::SizeMismatch {
                        algorithm: "none",
                        declared,
                        actual: compressed.len(),
                    });
                }
                Ok(compressed.to_vec())
            }
            Compression::Zlib => inflate_zlib(compressed, declared),
            Compression::Lz4 => inflate_lz4(compressed, declared),
        }
    }

    pub fn deflate(self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            Compression::None => Ok(bytes.to_vec()),
            Compression::Zlib => deflate_zlib(bytes),
            Compression::Lz4 => Ok(deflate_lz4(bytes)),
        }
    }
}

/// Starting buffer for a zlib stream; the declared size is untrusted, so
/// growth past this comes from actual output.
const ZLIB_START_RATIO: usize = 64;

/// One LZ4 token can expand to at most this many output bytes per input byte.
const LZ4_MAX_RATIO: usize = 255;

pub fn inflate_zlib(compressed: &[u8], declared: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(declared.min(compressed.len().saturating_mul(ZLIB_START_RATIO)));
    // read one byte past the declared size so an oversized stream is noticed
    let mut decoder = ZlibDecoder::new(compressed).take(declared as u64 + 1);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Corrupt {
            algorithm: "zlib",
            message: e.to_string(),
        })?;
    if out.len() != declared {
        return Err(CodecError::SizeMismatch {
            algorithm: "zlib",
            declared,
            actual: out.len(),
        });
    }
    Ok(out)
}

pub fn deflate_zlib(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let corrupt = |e: std::io::Error| CodecError::Corrupt {
        algorithm: "zlib",
        message: e.to_string(),
    };
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(bytes.len() / 2), ZlibLevel::default());
    encoder.write_all(bytes).map_err(corrupt)?;
    encoder.finish().map_err(corrupt)
}

/// LZ4 block format (no frame header); the size comes from the envelope.
pub fn inflate_lz4(compressed: &[u8], declared: usize) -> Result<Vec<u8>, CodecError> {
    if declared > compressed.len().saturating_mul(LZ4_MAX_RATIO) {
        return Err(CodecError::Corrupt {
            algorithm: "lz4",
            message: format!("{} bytes cannot expand to {}", compressed.len(), declared),
        });
    }
    let out = lz4_flex::block::decompress(compressed, declared).map_err(|e| CodecError::Corrupt {
        algorithm: "lz4",
        message: e.to_string(),
    })?;
    if out.len() != declared {
        return Err(CodecError::SizeMismatch {
            algorithm: "lz4",
            declared,
            actual: out.len(),
        });
    }
    Ok(out)
}

pub fn deflate_lz4(bytes: &[u8]) -> Vec<u8> {
    lz4_flex::block::compress(bytes)
}
