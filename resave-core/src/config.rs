use resave_nls::{Decoder, Encoding};
use serde::{Deserialize, Serialize};

/// Knobs for [`crate::SaveFile::load`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// Charset used when strings are rendered as text.
    pub encoding: Encoding,
    /// Decode global data type 1001. When off the block is kept as raw bytes.
    pub decode_papyrus: bool,
    /// Tables with at least this many entries are summed in parallel by
    /// [`crate::SizeReport`].
    pub parallel_threshold: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            encoding: Encoding::Auto,
            decode_papyrus: true,
            parallel_threshold: 4096,
        }
    }
}

impl LoadOptions {
    pub fn decoder(&self) -> Decoder {
        Decoder::new(self.encoding)
    }
}
