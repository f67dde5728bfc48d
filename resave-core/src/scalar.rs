use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::cursor::{ByteCursor, ByteSink};
use crate::error::FormatError;

/// A stored float. Compared and hashed by bit pattern so that NaNs read from
/// a save compare equal to themselves after a round trip.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize)]
pub struct Real(pub f32);

impl PartialEq for Real {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for Real {}

impl Hash for Real {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl fmt::Display for Real {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<f32> for Real {
    fn from(v: f32) -> Self {
        Self(v)
    }
}

/// Variable-size unsigned integer: the low two bits of the first byte give
/// the total width (1, 2 or 3 bytes), the value is the rest.
///
/// The stored width is kept so that a value written with a wider encoding
/// than necessary is written back the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VsVal {
    value: u32,
    width: u8,
}

impl VsVal {
    pub const MAX: u32 = 0x3F_FFFF;

    pub fn new(value: u32) -> Result<Self, FormatError> {
        let width = match value {
            0..=0x3F => 1,
            0x40..=0x3FFF => 2,
            0x4000..=Self::MAX => 3,
            _ => {
                return Err(FormatError::Unsupported {
                    what: "vsval",
                    value: value as u64,
                })
            }
        };
        Ok(Self { value, width })
    }

    #[inline]
    pub fn value(self) -> u32 {
        self.value
    }

    pub fn read(c: &mut ByteCursor<'_>) -> Result<Self, FormatError> {
        let first = c.read_u8()?;
        let (raw, width) = match first & 3 {
            0 => (first as u32, 1),
            1 => (first as u32 | (c.read_u8()? as u32) << 8, 2),
            2 => {
                let rest = c.read_u16()? as u32;
                (first as u32 | rest << 8, 3)
            }
            tag => {
                return Err(FormatError::IllegalTag {
                    kind: "vsval width",
                    tag: tag as u32,
                })
            }
        };
        Ok(Self {
            value: raw >> 2,
            width,
        })
    }

    pub fn write(self, out: &mut ByteSink) {
        let raw = self.value << 2 | (self.width as u32 - 1);
        match self.width {
            1 => out.write_u8(raw as u8),
            2 => out.write_u16(raw as u16),
            _ => {
                out.write_u8(raw as u8);
                out.write_u16((raw >> 8) as u16);
            }
        }
    }

    #[inline]
    pub fn byte_size(self) -> usize {
        self.width as usize
    }
}
