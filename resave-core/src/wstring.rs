use std::borrow::Cow;
use std::fmt;

use resave_nls::{Decoder, TextDecoder};
use serde::{Serialize, Serializer};

use crate::cursor::{ByteCursor, ByteSink};
use crate::error::FormatError;

/// A 16-bit length-prefixed string.
///
/// The raw bytes are kept as stored so that writing the string back is exact
/// regardless of what code page it was written in. Text is produced on
/// demand through a [`TextDecoder`].
#[derive(Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct WString(Vec<u8>);

impl WString {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Encode `text` with the given decoder's encoding.
    pub fn from_text(text: &str, nls: &Decoder) -> Self {
        Self(nls.encode_owned(text))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn text<'a>(&'a self, nls: &dyn TextDecoder) -> Cow<'a, str> {
        nls.decode(&self.0)
    }

    pub fn read(cursor: &mut ByteCursor<'_>) -> Result<Self, FormatError> {
        Ok(Self(cursor.read_wstring()?.to_vec()))
    }

    pub fn write(&self, out: &mut ByteSink) -> Result<(), FormatError> {
        out.write_wstring(&self.0)
    }

    #[inline]
    pub fn byte_size(&self) -> usize {
        2 + self.0.len()
    }
}

impl From<&str> for WString {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl fmt::Display for WString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&Decoder::default().decode(&self.0))
    }
}

impl fmt::Debug for WString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", Decoder::default().decode(&self.0))
    }
}

impl Serialize for WString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resave_nls::Encoding;

    #[test]
    fn raw_bytes_survive_round_trip() {
        let raw = vec![0x4A, 0xF6, 0x72, 0x6E];
        let mut out = ByteSink::new();
        WString::from_bytes(raw.clone()).write(&mut out).unwrap();
        let bytes = out.into_inner();
        assert_eq!(bytes.len(), 6);

        let s = WString::read(&mut ByteCursor::new(&bytes)).unwrap();
        assert_eq!(s.as_bytes(), &raw[..]);
        assert_eq!(s.byte_size(), 6);
        assert_eq!(s.to_string(), "J\u{f6}rn");
    }

    #[test]
    fn from_text_uses_encoding() {
        let s = WString::from_text("Jörn", &Decoder::new(Encoding::Windows1252));
        assert_eq!(s.as_bytes(), &[0x4A, 0xF6, 0x72, 0x6E]);
    }
}
