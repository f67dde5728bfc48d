use serde::Serialize;

use crate::codec::Compression;
use crate::cursor::{ByteCursor, ByteSink};
use crate::error::{Context, FormatError, Result};
use crate::game::Game;
use crate::scalar::Real;
use crate::wstring::WString;

/// The uncompressed file header. Everything here is inside the
/// `header_size` the file declares after the magic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Header {
    pub version: u32,
    pub save_number: u32,
    pub player_name: WString,
    pub level: u32,
    pub location: WString,
    pub game_date: WString,
    pub race: WString,
    pub sex: u16,
    pub current_exp: Real,
    pub level_up_exp: Real,
    pub filetime: u64,
    pub shot_width: u32,
    pub shot_height: u32,
    /// Only stored by Skyrim Special Edition.
    pub compression: Compression,
}

fn read_magic(c: &mut ByteCursor<'_>) -> Result<&'static [u8]> {
    for magic in [crate::game::SKYRIM_MAGIC, crate::game::FALLOUT4_MAGIC] {
        if c.peek_rest().starts_with(magic) {
            c.read_bytes(magic.len())?;
            return Ok(magic);
        }
    }
    let found = &c.peek_rest()[..c.remaining().min(13)];
    Err(FormatError::Magic {
        found: String::from_utf8_lossy(found).into_owned(),
    }
    .into())
}

impl Header {
    /// Read magic, header and screenshot. Returns the game variant too.
    pub fn read(c: &mut ByteCursor<'_>) -> Result<(Game, Self, Vec<u8>)> {
        let magic = read_magic(c)?;
        let header_size = c.read_u32().context("header size")? as usize;
        c.set_mark();

        let version = c.read_u32()?;
        let game = Game::detect(magic, version)?;
        let save_number = c.read_u32()?;
        let player_name = WString::read(c)?;
        let level = c.read_u32()?;
        let location = WString::read(c)?;
        let game_date = WString::read(c)?;
        let race = WString::read(c)?;
        let sex = c.read_u16()?;
        let current_exp = Real(c.read_f32()?);
        let level_up_exp = Real(c.read_f32()?);
        let filetime = c.read_u64()?;
        let shot_width = c.read_u32()?;
        let shot_height = c.read_u32()?;
        let compression = if game.has_compression() {
            let raw = c.read_u16()?;
            Compression::from_repr(raw).ok_or(FormatError::Unsupported {
                what: "compression type",
                value: raw as u64,
            })?
        } else {
            Compression::None
        };
        c.checkpoint("header", header_size)?;

        let header = Self {
            version,
            save_number,
            player_name,
            level,
            location,
            game_date,
            race,
            sex,
            current_exp,
            level_up_exp,
            filetime,
            shot_width,
            shot_height,
            compression,
        };

        let shot_len = header.screenshot_len(game)?;
        let screenshot = c.read_bytes(shot_len).context("screenshot")?.to_vec();
        Ok((game, header, screenshot))
    }

    pub fn screenshot_len(&self, game: Game) -> std::result::Result<usize, FormatError> {
        (self.shot_width as usize)
            .checked_mul(self.shot_height as usize)
            .and_then(|n| n.checked_mul(game.screenshot_bpp()))
            .ok_or(FormatError::Unsupported {
                what: "screenshot size",
                value: self.shot_width as u64 * self.shot_height as u64,
            })
    }

    /// Size of the fields counted by `header_size`.
    pub fn byte_size(&self, game: Game) -> usize {
        4 + 4
            + self.player_name.byte_size()
            + 4
            + self.location.byte_size()
            + self.game_date.byte_size()
            + self.race.byte_size()
            + 2
            + 4
            + 4
            + 8
            + 4
            + 4
            + if game.has_compression() { 2 } else { 0 }
    }

    pub fn write(&self, out: &mut ByteSink, game: Game, screenshot: &[u8]) -> Result<()> {
        let shot_len = self.screenshot_len(game)?;
        if screenshot.len() != shot_len {
            return Err(FormatError::Mismatch {
                what: "screenshot size",
                expected: shot_len.to_string(),
                found: screenshot.len().to_string(),
            }
            .into());
        }
        out.write_bytes(game.magic());
        let size = self.byte_size(game);
        out.write_u32(size as u32);
        out.set_mark();
        out.write_u32(self.version);
        out.write_u32(self.save_number);
        self.player_name.write(out)?;
        out.write_u32(self.level);
        self.location.write(out)?;
        self.game_date.write(out)?;
        self.race.write(out)?;
        out.write_u16(self.sex);
        out.write_f32(self.current_exp.0);
        out.write_f32(self.level_up_exp.0);
        out.write_u64(self.filetime);
        out.write_u32(self.shot_width);
        out.write_u32(self.shot_height);
        if game.has_compression() {
            out.write_u16(self.compression as u16);
        }
        out.checkpoint("header", size)?;
        out.write_bytes(screenshot);
        Ok(())
    }
}
