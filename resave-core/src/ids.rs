//! Identifier value types: VM object handles and world object handles.
//!
//! Neither type is constructed directly by decoders; they go through
//! [`IdRegistry`](crate::registry::IdRegistry) so every occurrence of the same
//! raw value within one load is the canonical one.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cursor::{ByteCursor, ByteSink};
use crate::error::FormatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EidWidth {
    W32,
    W64,
}

impl EidWidth {
    pub fn bytes(self) -> usize {
        match self {
            EidWidth::W32 => 4,
            EidWidth::W64 => 8,
        }
    }
}

/// A Papyrus VM object handle. Zero means "no object".
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Eid {
    raw: u64,
    width: EidWidth,
}

impl Eid {
    pub(crate) fn new(raw: u64, width: EidWidth) -> Self {
        Self { raw, width }
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.raw
    }

    #[inline]
    pub fn width(self) -> EidWidth {
        self.width
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.raw == 0
    }

    pub(crate) fn read_raw(cursor: &mut ByteCursor<'_>, width: EidWidth) -> Result<u64, FormatError> {
        Ok(match width {
            EidWidth::W32 => cursor.read_u32()? as u64,
            EidWidth::W64 => cursor.read_u64()?,
        })
    }

    pub fn write(self, out: &mut ByteSink) {
        match self.width {
            EidWidth::W32 => out.write_u32(self.raw as u32),
            EidWidth::W64 => out.write_u64(self.raw),
        }
    }

    #[inline]
    pub fn byte_size(self) -> usize {
        self.width.bytes()
    }
}

impl fmt::Debug for Eid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Eid({})", self)
    }
}

impl fmt::Display for Eid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.width {
            EidWidth::W32 => write!(f, "{:08x}", self.raw),
            EidWidth::W64 => write!(f, "{:016x}", self.raw),
        }
    }
}

impl Serialize for Eid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// What the top two bits of a RefID say about the remaining 22.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum RefIdKind {
    /// 1-based index into the save's form-id array.
    FormIndex,
    /// A form id from the master file (load order slot 0).
    Default,
    /// A form created at runtime (`0xFF` load order slot).
    Created,
    Unknown,
}

/// A 3-byte world object handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefId(u32);

impl RefId {
    pub const NONE: RefId = RefId(0);

    pub(crate) fn new(raw: u32) -> Self {
        Self(raw & 0xFF_FFFF)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn kind(self) -> RefIdKind {
        match self.0 >> 22 {
            0 => RefIdKind::FormIndex,
            1 => RefIdKind::Default,
            2 => RefIdKind::Created,
            _ => RefIdKind::Unknown,
        }
    }

    /// The low 22 bits.
    #[inline]
    pub fn value(self) -> u32 {
        self.0 & 0x3F_FFFF
    }

    /// Translate to a full form id. Form-index RefIDs need the save's form-id
    /// array; an index outside it yields `None`.
    pub fn form_id(self, form_ids: &[u32]) -> Option<u32> {
        match self.kind() {
            RefIdKind::FormIndex => {
                let value = self.value() as usize;
                if value == 0 {
                    Some(0)
                } else {
                    form_ids.get(value - 1).copied()
                }
            }
            RefIdKind::Default => Some(self.value()),
            RefIdKind::Created => Some(0xFF00_0000 | self.value()),
            RefIdKind::Unknown => None,
        }
    }

    pub fn write(self, out: &mut ByteSink) {
        out.write_u24_be(self.0);
    }

    pub const BYTE_SIZE: usize = 3;
}

impl fmt::Debug for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RefId({:06x})", self.0)
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

impl Serialize for RefId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
