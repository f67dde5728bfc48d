use std::fmt;

use serde::Serialize;

use crate::cursor::{ByteCursor, ByteSink};
use crate::error::{FormatError, Result};
use crate::layout::{Element, IndexWidth, Layout};
use crate::wstring::WString;

/// Count value that escapes to a 32-bit count.
const LARGE_TABLE_ESCAPE: u16 = 0xFFFF;

/// An index into the snapshot's string table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TString(u32);

impl TString {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }

    /// Read an index, checking it against a table of `len` strings.
    pub fn read(
        c: &mut ByteCursor<'_>,
        width: IndexWidth,
        len: usize,
    ) -> std::result::Result<Self, FormatError> {
        let index = match width {
            IndexWidth::U16 => c.read_u16()? as u32,
            IndexWidth::U32 => c.read_u32()?,
        };
        if index as usize >= len {
            return Err(FormatError::StringIndex { index, len });
        }
        Ok(Self(index))
    }
}

impl Element for TString {
    fn write(&self, out: &mut ByteSink, layout: &Layout) -> Result<()> {
        match layout.index_width {
            IndexWidth::U16 => {
                let i = u16::try_from(self.0).map_err(|_| FormatError::TooLong {
                    what: "string index",
                    len: self.0 as usize,
                })?;
                out.write_u16(i);
            }
            IndexWidth::U32 => out.write_u32(self.0),
        }
        Ok(())
    }

    fn byte_size(&self, layout: &Layout) -> usize {
        layout.index_bytes()
    }
}

impl fmt::Display for TString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The snapshot's interned strings. Every name in the VM heap is an index
/// into this table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringTable {
    strings: Vec<WString>,
    large: bool,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(c: &mut ByteCursor<'_>) -> Result<Self> {
        let short = c.read_u16()?;
        let (count, large) = if short == LARGE_TABLE_ESCAPE {
            (c.read_u32()? as usize, true)
        } else {
            (short as usize, false)
        };
        let mut strings = Vec::with_capacity(count.min(c.remaining() / 2));
        for _ in 0..count {
            strings.push(WString::read(c)?);
        }
        Ok(Self { strings, large })
    }

    pub fn write(&self, out: &mut ByteSink) -> Result<()> {
        if self.is_large() {
            out.write_u16(LARGE_TABLE_ESCAPE);
            out.write_u32(self.strings.len() as u32);
        } else {
            out.write_u16(self.strings.len() as u16);
        }
        for s in &self.strings {
            s.write(out)?;
        }
        Ok(())
    }

    pub fn byte_size(&self) -> usize {
        let count = if self.is_large() { 6 } else { 2 };
        count + self.strings.iter().map(WString::byte_size).sum::<usize>()
    }

    /// Whether the table uses the 32-bit count and index encoding.
    pub fn is_large(&self) -> bool {
        self.large || self.strings.len() >= LARGE_TABLE_ESCAPE as usize
    }

    pub fn index_width(&self) -> IndexWidth {
        if self.is_large() {
            IndexWidth::U32
        } else {
            IndexWidth::U16
        }
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn get(&self, s: TString) -> Option<&WString> {
        self.strings.get(s.0 as usize)
    }

    /// Text of an index, or the bare index if it is out of range.
    pub fn text(&self, s: TString) -> String {
        match self.get(s) {
            Some(w) => w.to_string(),
            None => s.to_string(),
        }
    }

    pub fn is_blank(&self, s: TString) -> bool {
        self.get(s).map_or(true, WString::is_empty)
    }

    /// Index of `s`, adding it if absent.
    pub fn intern(&mut self, s: WString) -> TString {
        match self.strings.iter().position(|e| *e == s) {
            Some(i) => TString(i as u32),
            None => {
                self.strings.push(s);
                TString(self.strings.len() as u32 - 1)
            }
        }
    }

    pub fn find(&self, s: &[u8]) -> Option<TString> {
        self.strings
            .iter()
            .position(|e| e.as_bytes() == s)
            .map(|i| TString(i as u32))
    }

    pub fn iter(&self) -> impl Iterator<Item = &WString> {
        self.strings.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::Game;

    #[test]
    fn small_table_round_trip() {
        let mut table = StringTable::new();
        let foo = table.intern(WString::from("Foo"));
        let bar = table.intern(WString::from("Bar"));
        assert_eq!(table.intern(WString::from("Foo")), foo);
        assert_eq!(table.index_width(), IndexWidth::U16);

        let mut out = ByteSink::new();
        table.write(&mut out).unwrap();
        assert_eq!(out.len(), table.byte_size());
        assert_eq!(hex::encode(out.as_slice()), "02000300466f6f0300426172");

        let back = StringTable::read(&mut ByteCursor::new(out.as_slice())).unwrap();
        assert_eq!(back, table);
        assert_eq!(back.text(bar), "Bar");
    }

    #[test]
    fn large_table_escape_is_kept() {
        let bytes = hex::decode("ffff0100000001006100").unwrap();
        let mut c = ByteCursor::new(&bytes);
        let table = StringTable::read(&mut c).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.is_large());
        assert_eq!(table.index_width(), IndexWidth::U32);
        assert_eq!(table.byte_size(), bytes.len() - 1);

        let mut out = ByteSink::new();
        table.write(&mut out).unwrap();
        assert_eq!(out.as_slice(), &bytes[..bytes.len() - 1]);
    }

    #[test]
    fn out_of_range_index_is_string_table_bug() {
        let bytes = [0x05, 0x00];
        let err = TString::read(&mut ByteCursor::new(&bytes), IndexWidth::U16, 3).unwrap_err();
        assert_eq!(err, FormatError::StringIndex { index: 5, len: 3 });
    }

    #[test]
    fn index_width_follows_layout() {
        let layout = Layout::new(Game::SkyrimSe);
        let wide = layout.with_index_width(IndexWidth::U32);
        let s = TString(7);
        let mut out = ByteSink::new();
        s.write(&mut out, &layout).unwrap();
        s.write(&mut out, &wide).unwrap();
        assert_eq!(out.as_slice(), &[7, 0, 7, 0, 0, 0]);
    }
}
