use serde::{Deserialize, Serialize};

use crate::error::FormatError;
use crate::ids::EidWidth;

pub const SKYRIM_MAGIC: &[u8] = b"TESV_SAVEGAME";
pub const FALLOUT4_MAGIC: &[u8] = b"FO4_SAVEGAME";

/// The supported game variants. Everything version-specific about the format
/// hangs off this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum Game {
    #[strum(to_string = "Skyrim Legendary Edition")]
    SkyrimLe,
    #[strum(to_string = "Skyrim Special Edition")]
    SkyrimSe,
    #[strum(to_string = "Fallout 4")]
    Fallout4,
}

impl Game {
    /// Pick the variant from the file magic and the header version field.
    pub fn detect(magic: &[u8], version: u32) -> Result<Self, FormatError> {
        if magic == SKYRIM_MAGIC {
            Ok(if version < 12 { Game::SkyrimLe } else { Game::SkyrimSe })
        } else if magic == FALLOUT4_MAGIC {
            Ok(Game::Fallout4)
        } else {
            Err(FormatError::Magic {
                found: String::from_utf8_lossy(magic).into_owned(),
            })
        }
    }

    pub fn magic(self) -> &'static [u8] {
        match self {
            Game::SkyrimLe | Game::SkyrimSe => SKYRIM_MAGIC,
            Game::Fallout4 => FALLOUT4_MAGIC,
        }
    }

    pub fn eid_width(self) -> EidWidth {
        match self {
            Game::SkyrimLe | Game::SkyrimSe => EidWidth::W32,
            Game::Fallout4 => EidWidth::W64,
        }
    }

    /// Bytes per screenshot pixel.
    pub fn screenshot_bpp(self) -> usize {
        match self {
            Game::SkyrimLe => 3,
            Game::SkyrimSe | Game::Fallout4 => 4,
        }
    }

    /// Whether the header ends with a compression type and the body may sit
    /// in a compression envelope.
    pub fn has_compression(self) -> bool {
        self == Game::SkyrimSe
    }

    /// Whether the body carries the game version string after the form version.
    pub fn has_game_version(self) -> bool {
        self == Game::Fallout4
    }

    /// Whether a body with this form version lists light plugins.
    pub fn has_light_plugins(self, form_version: u8) -> bool {
        match self {
            Game::SkyrimLe => false,
            Game::SkyrimSe => form_version >= 78,
            Game::Fallout4 => form_version >= 68,
        }
    }

    /// Whether the Papyrus snapshot has struct tables.
    pub fn has_structs(self) -> bool {
        self == Game::Fallout4
    }

    pub fn is_fallout4(self) -> bool {
        self == Game::Fallout4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_variants() {
        assert_eq!(Game::detect(b"TESV_SAVEGAME", 9).unwrap(), Game::SkyrimLe);
        assert_eq!(Game::detect(b"TESV_SAVEGAME", 12).unwrap(), Game::SkyrimSe);
        assert_eq!(Game::detect(b"FO4_SAVEGAME", 15).unwrap(), Game::Fallout4);
        assert!(matches!(
            Game::detect(b"NOT_A_SAVE", 1),
            Err(FormatError::Magic { .. })
        ));
    }

    #[test]
    fn variant_properties() {
        assert_eq!(Game::Fallout4.eid_width(), EidWidth::W64);
        assert_eq!(Game::SkyrimSe.eid_width(), EidWidth::W32);
        assert!(Game::SkyrimSe.has_light_plugins(78));
        assert!(!Game::SkyrimSe.has_light_plugins(77));
        assert!(!Game::SkyrimLe.has_light_plugins(200));
        assert_eq!(Game::SkyrimLe.screenshot_bpp(), 3);
    }
}
