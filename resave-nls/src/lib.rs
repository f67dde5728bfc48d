use anyhow::Result;
use encoding_rs::{Encoding as RsEncoding, GB18030, SHIFT_JIS, UTF_8, WINDOWS_1250, WINDOWS_1251, WINDOWS_1252};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::str::FromStr;

pub trait TextDecoder {
    fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str>;

    /// Decode C-style string: stop at the first NUL (0x00).
    fn decode_cstr<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        self.decode(&bytes[..end])
    }
}

/// Character sets seen in savegame strings.
///
/// Saves do not record which code page the game wrote their strings in, so
/// `Auto` guesses per string: valid UTF-8 is taken as-is and anything else is
/// read as Windows-1252, which is what the western releases use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Auto,
    Utf8,
    Windows1252,
    /// Central European releases.
    Windows1250,
    /// Russian releases.
    Windows1251,
    ShiftJis,
    Gb18030,
}

impl Encoding {
    #[inline]
    pub fn as_encoding_rs(self) -> &'static RsEncoding {
        match self {
            Encoding::Auto | Encoding::Windows1252 => WINDOWS_1252,
            Encoding::Utf8 => UTF_8,
            Encoding::Windows1250 => WINDOWS_1250,
            Encoding::Windows1251 => WINDOWS_1251,
            Encoding::ShiftJis => SHIFT_JIS,
            Encoding::Gb18030 => GB18030,
        }
    }
}

impl FromStr for Encoding {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Encoding::Auto),
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "cp1252" | "windows1252" | "windows-1252" => Ok(Encoding::Windows1252),
            "cp1250" | "windows1250" | "windows-1250" => Ok(Encoding::Windows1250),
            "cp1251" | "windows1251" | "windows-1251" => Ok(Encoding::Windows1251),
            "sjis" | "shift_jis" => Ok(Encoding::ShiftJis),
            "gbk" | "gb18030" => Ok(Encoding::Gb18030),
            _ => Err(anyhow::anyhow!("unknown text encoding: {}", s)),
        }
    }
}

/// A simple decoder bound to one encoding.
#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    enc: Encoding,
}

impl Decoder {
    #[inline]
    pub fn new(enc: Encoding) -> Self {
        Self { enc }
    }

    #[inline]
    pub fn encoding(&self) -> Encoding {
        self.enc
    }

    /// Encode a Rust string to bytes using the selected encoding.
    /// This is "best effort": unrepresentable chars will be replaced.
    ///
    /// `Auto` encodes as UTF-8 when the text is not plain ASCII and cannot be
    /// represented in Windows-1252.
    pub fn encode<'a>(&self, s: &'a str) -> Cow<'a, [u8]> {
        if self.enc == Encoding::Utf8 {
            return Cow::Borrowed(s.as_bytes());
        }
        let enc = self.enc.as_encoding_rs();
        let (cow, _, had_errors) = enc.encode(s);
        if had_errors && self.enc == Encoding::Auto {
            return Cow::Borrowed(s.as_bytes());
        }
        cow
    }

    /// Same as encode(), but always returns an owned Vec<u8>.
    pub fn encode_owned(&self, s: &str) -> Vec<u8> {
        self.encode(s).into_owned()
    }
}

impl TextDecoder for Decoder {
    fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        match self.enc {
            Encoding::Utf8 => match std::str::from_utf8(bytes) {
                Ok(s) => Cow::Borrowed(s),
                Err(_) => Cow::Owned(String::from_utf8_lossy(bytes).into_owned()),
            },
            Encoding::Auto => match std::str::from_utf8(bytes) {
                Ok(s) => Cow::Borrowed(s),
                Err(_) => WINDOWS_1252.decode_without_bom_handling(bytes).0,
            },
            _ => {
                let enc = self.enc.as_encoding_rs();
                let (cow, _had_errors) = enc.decode_without_bom_handling(bytes);
                cow
            }
        }
    }
}

/// A convenience default.
impl Default for Decoder {
    fn default() -> Self {
        Self::new(Encoding::Auto)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_decode_cstr() {
        let d = Decoder::new(Encoding::Utf8);
        let bytes = b"hello\0world";
        assert_eq!(d.decode_cstr(bytes), "hello");
    }

    #[test]
    fn auto_falls_back_to_cp1252() {
        let d = Decoder::default();
        assert_eq!(d.decode("Lydia".as_bytes()), "Lydia");
        assert_eq!(d.decode(&[0x4A, 0xF6, 0x72, 0x6E]), "J\u{f6}rn");
        assert_eq!(d.decode("Jörn".as_bytes()), "Jörn");
    }

    #[test]
    fn encode_roundtrip_cp1252() {
        let d = Decoder::new(Encoding::Windows1252);
        let b = d.encode_owned("Jörn");
        assert_eq!(b, vec![0x4A, 0xF6, 0x72, 0x6E]);
        assert_eq!(d.decode(&b), "Jörn");
    }

    #[test]
    fn parse_encoding_names() {
        assert_eq!("UTF8".parse::<Encoding>().unwrap(), Encoding::Utf8);
        assert_eq!("cp1251".parse::<Encoding>().unwrap(), Encoding::Windows1251);
        assert!("klingon".parse::<Encoding>().is_err());
    }
}
