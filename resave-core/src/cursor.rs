//! Byte-level reading and writing with position accounting.
//!
//! Both [`ByteCursor`] and [`ByteSink`] keep a *mark*: the position of the last
//! checkpoint. [`ByteCursor::checkpoint`] compares the number of bytes a section
//! says it occupies against the bytes actually moved over since the mark and
//! fails with [`PositionMismatch`] when they differ. This is the main
//! corruption detector for formats without a schema, so it is never optional.
//!
//! Positions are *logical*: a cursor can be created with a base offset so that
//! a decompressed body reports the same positions the file-location table uses.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use resave_nls::TextDecoder;

use crate::error::{FormatError, PositionMismatch};

type ReadResult<T> = std::result::Result<T, FormatError>;

#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
    base: usize,
    mark: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self::with_base(buf, 0)
    }

    /// A cursor whose logical position starts at `base`.
    pub fn with_base(buf: &'a [u8], base: usize) -> Self {
        Self {
            buf,
            pos: 0,
            base,
            mark: 0,
        }
    }

    /// Logical position (base + bytes consumed).
    #[inline]
    pub fn position(&self) -> usize {
        self.base + self.pos
    }

    /// Bytes consumed from this cursor's own buffer.
    #[inline]
    pub fn offset(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// The unread part of the buffer, without consuming it.
    pub fn peek_rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// Move to an absolute offset within this cursor's buffer. The mark is reset.
    pub fn seek(&mut self, offset: usize) -> ReadResult<()> {
        if offset > self.buf.len() {
            return Err(FormatError::UnexpectedEof {
                what: "seek",
                offset: self.base + offset,
                need: offset - self.buf.len(),
                remaining: 0,
            });
        }
        self.pos = offset;
        self.mark = offset;
        Ok(())
    }

    fn take(&mut self, what: &'static str, n: usize) -> ReadResult<&'a [u8]> {
        if n > self.remaining() {
            return Err(FormatError::UnexpectedEof {
                what,
                offset: self.position(),
                need: n,
                remaining: self.remaining(),
            });
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn read_u8(&mut self) -> ReadResult<u8> {
        Ok(self.take("u8", 1)?[0])
    }

    pub fn read_i8(&mut self) -> ReadResult<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> ReadResult<u16> {
        Ok(LittleEndian::read_u16(self.take("u16", 2)?))
    }

    pub fn read_i16(&mut self) -> ReadResult<i16> {
        Ok(LittleEndian::read_i16(self.take("i16", 2)?))
    }

    pub fn read_u32(&mut self) -> ReadResult<u32> {
        Ok(LittleEndian::read_u32(self.take("u32", 4)?))
    }

    pub fn read_i32(&mut self) -> ReadResult<i32> {
        Ok(LittleEndian::read_i32(self.take("i32", 4)?))
    }

    pub fn read_u64(&mut self) -> ReadResult<u64> {
        Ok(LittleEndian::read_u64(self.take("u64", 8)?))
    }

    pub fn read_f32(&mut self) -> ReadResult<f32> {
        Ok(LittleEndian::read_f32(self.take("f32", 4)?))
    }

    /// Three bytes, most significant first. Used by RefIDs.
    pub fn read_u24_be(&mut self) -> ReadResult<u32> {
        Ok(BigEndian::read_u24(self.take("u24", 3)?))
    }

    pub fn read_bytes(&mut self, n: usize) -> ReadResult<&'a [u8]> {
        self.take("bytes", n)
    }

    pub fn read_array<const N: usize>(&mut self) -> ReadResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take("bytes", N)?);
        Ok(out)
    }

    /// Consume everything that is left.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let s = &self.buf[self.pos..];
        self.pos = self.buf.len();
        s
    }

    /// Split off the next `n` bytes as an independent cursor with the right
    /// logical base. This cursor advances past them.
    pub fn sub_cursor(&mut self, n: usize) -> ReadResult<ByteCursor<'a>> {
        let base = self.position();
        let buf = self.take("sub-section", n)?;
        Ok(ByteCursor::with_base(buf, base))
    }

    /// String with an 8-bit length prefix (raw bytes).
    pub fn read_bstring(&mut self) -> ReadResult<&'a [u8]> {
        let len = self.read_u8()? as usize;
        self.take("bstring", len)
    }

    /// String with a 16-bit length prefix (raw bytes).
    pub fn read_wstring(&mut self) -> ReadResult<&'a [u8]> {
        let len = self.read_u16()? as usize;
        self.take("wstring", len)
    }

    /// String with a 32-bit length prefix (raw bytes).
    pub fn read_lstring(&mut self) -> ReadResult<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.take("lstring", len)
    }

    /// NUL-terminated string; the terminator is consumed but not returned.
    pub fn read_zstring(&mut self) -> ReadResult<&'a [u8]> {
        let rest = &self.buf[self.pos..];
        match rest.iter().position(|&b| b == 0) {
            Some(end) => {
                let s = &rest[..end];
                self.pos += end + 1;
                Ok(s)
            }
            None => Err(FormatError::UnexpectedEof {
                what: "zstring terminator",
                offset: self.position(),
                need: rest.len() + 1,
                remaining: rest.len(),
            }),
        }
    }

    /// 16-bit length-prefixed string decoded through the charset service.
    pub fn read_wstring_text(&mut self, nls: &dyn TextDecoder) -> ReadResult<String> {
        Ok(nls.decode(self.read_wstring()?).into_owned())
    }

    /// NUL-terminated string decoded through the charset service.
    pub fn read_zstring_text(&mut self, nls: &dyn TextDecoder) -> ReadResult<String> {
        Ok(nls.decode(self.read_zstring()?).into_owned())
    }

    /// Bytes consumed since the last checkpoint (or creation / seek).
    #[inline]
    pub fn since_mark(&self) -> usize {
        self.pos - self.mark
    }

    /// Declare that the section just read occupies `declared` bytes.
    ///
    /// Fails if the cursor moved by a different amount since the previous
    /// checkpoint. The mark moves to the current position either way.
    pub fn checkpoint(
        &mut self,
        section: &str,
        declared: usize,
    ) -> std::result::Result<(), PositionMismatch> {
        let actual = self.since_mark();
        let start = self.base + self.mark;
        self.mark = self.pos;
        if actual != declared {
            log::error!(
                "{}: declared {} bytes, consumed {} (section started at 0x{:X})",
                section,
                declared,
                actual,
                start
            );
            return Err(PositionMismatch {
                section: section.to_string(),
                offset: start,
                declared,
                actual,
            });
        }
        Ok(())
    }

    /// Declare that the next section starts at logical position `expected`.
    pub fn expect_position(
        &mut self,
        section: &str,
        expected: usize,
    ) -> std::result::Result<(), PositionMismatch> {
        let actual = self.position();
        self.mark = self.pos;
        if actual != expected {
            return Err(PositionMismatch {
                section: section.to_string(),
                offset: actual,
                declared: expected,
                actual,
            });
        }
        Ok(())
    }

    /// Reset the mark to the current position without checking anything.
    pub fn set_mark(&mut self) {
        self.mark = self.pos;
    }
}

/// Output buffer with the same checkpoint accounting as [`ByteCursor`].
#[derive(Debug, Default, Clone)]
pub struct ByteSink {
    buf: Vec<u8>,
    base: usize,
    mark: usize,
}

impl ByteSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            buf: Vec::with_capacity(n),
            base: 0,
            mark: 0,
        }
    }

    /// A sink whose logical position starts at `base`.
    pub fn with_base(base: usize) -> Self {
        Self {
            buf: Vec::new(),
            base,
            mark: 0,
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.base + self.buf.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.buf.push(v as u8);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u24_be(&mut self, v: u32) {
        let mut b = [0u8; 3];
        BigEndian::write_u24(&mut b, v & 0xFF_FFFF);
        self.buf.extend_from_slice(&b);
    }

    pub fn write_bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    /// Overwrite four bytes at a position previously written (a size or
    /// offset placeholder).
    pub fn patch_u32(&mut self, at: usize, v: u32) {
        self.buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    pub fn write_bstring(&mut self, s: &[u8]) -> std::result::Result<(), FormatError> {
        let len = u8::try_from(s.len()).map_err(|_| FormatError::TooLong {
            what: "bstring",
            len: s.len(),
        })?;
        self.write_u8(len);
        self.write_bytes(s);
        Ok(())
    }

    pub fn write_wstring(&mut self, s: &[u8]) -> std::result::Result<(), FormatError> {
        let len = u16::try_from(s.len()).map_err(|_| FormatError::TooLong {
            what: "wstring",
            len: s.len(),
        })?;
        self.write_u16(len);
        self.write_bytes(s);
        Ok(())
    }

    pub fn write_lstring(&mut self, s: &[u8]) -> std::result::Result<(), FormatError> {
        let len = u32::try_from(s.len()).map_err(|_| FormatError::TooLong {
            what: "lstring",
            len: s.len(),
        })?;
        self.write_u32(len);
        self.write_bytes(s);
        Ok(())
    }

    pub fn write_zstring(&mut self, s: &[u8]) {
        self.write_bytes(s);
        self.write_u8(0);
    }

    #[inline]
    pub fn since_mark(&self) -> usize {
        self.buf.len() - self.mark
    }

    /// Write-side twin of [`ByteCursor::checkpoint`]: the section just
    /// written must be exactly `declared` bytes long.
    pub fn checkpoint(
        &mut self,
        section: &str,
        declared: usize,
    ) -> std::result::Result<(), PositionMismatch> {
        let actual = self.since_mark();
        let start = self.base + self.mark;
        self.mark = self.buf.len();
        if actual != declared {
            return Err(PositionMismatch {
                section: section.to_string(),
                offset: start,
                declared,
                actual,
            });
        }
        Ok(())
    }

    /// Write-side twin of [`ByteCursor::expect_position`].
    pub fn expect_position(
        &mut self,
        section: &str,
        expected: usize,
    ) -> std::result::Result<(), PositionMismatch> {
        let actual = self.position();
        self.mark = self.buf.len();
        if actual != expected {
            return Err(PositionMismatch {
                section: section.to_string(),
                offset: actual,
                declared: expected,
                actual,
            });
        }
        Ok(())
    }

    pub fn set_mark(&mut self) {
        self.mark = self.buf.len();
    }
}

/// Size of a 16-bit length-prefixed string.
#[inline]
pub fn wstring_size(s: &[u8]) -> usize {
    2 + s.len()
}
