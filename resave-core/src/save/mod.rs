//! The savegame container: header, screenshot, optional compression envelope
//! and the body with its global data tables and change forms.

mod global;
mod header;
mod location;

use std::path::Path;

use resave_nls::Decoder;
use serde::Serialize;

use crate::changeform::{ChangeFormData, ChangeFormStore};
use crate::config::LoadOptions;
use crate::cursor::{ByteCursor, ByteSink};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{Context, Error, FormatError, PositionMismatch, Result};
use crate::game::Game;
use crate::ids::RefId;
use crate::papyrus::Papyrus;
use crate::registry::IdRegistry;
use crate::wstring::WString;

pub use global::{
    AnimObject, GlobalData, GlobalDataBody, GlobalReadContext, GlobalVariable, MiscStat,
    ANIM_OBJECTS, GLOBAL_VARIABLES, MISC_STATS, PAPYRUS,
};
pub use header::Header;
pub use location::FileLocationTable;

/// The plugin lists. `light` is only stored by variants and form versions
/// that know light plugins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    pub full: Vec<WString>,
    pub light: Option<Vec<WString>>,
}

fn read_names<T: Into<usize>>(c: &mut ByteCursor<'_>, count: T) -> Result<Vec<WString>> {
    let count = count.into();
    let mut names = Vec::with_capacity(count);
    for _ in 0..count {
        names.push(WString::read(c)?);
    }
    Ok(names)
}

impl PluginInfo {
    fn read(c: &mut ByteCursor<'_>, with_light: bool) -> Result<Self> {
        let size = c.read_u32().context("plugin info size")? as usize;
        c.set_mark();
        let n = c.read_u8()?;
        let full = read_names(c, n).context("plugins")?;
        let light = if with_light {
            let n = c.read_u16()?;
            Some(read_names(c, n).context("light plugins")?)
        } else {
            None
        };
        c.checkpoint("plugin info", size)?;
        Ok(Self { full, light })
    }

    fn light_names(&self) -> &[WString] {
        self.light.as_deref().unwrap_or(&[])
    }

    fn byte_size(&self, with_light: bool) -> usize {
        let names = |v: &[WString]| v.iter().map(WString::byte_size).sum::<usize>();
        1 + names(&self.full) + if with_light { 2 + names(self.light_names()) } else { 0 }
    }

    fn write(&self, out: &mut ByteSink, with_light: bool) -> Result<()> {
        let size = self.byte_size(with_light);
        out.write_u32(size as u32);
        out.set_mark();
        let n = u8::try_from(self.full.len()).map_err(|_| FormatError::TooLong {
            what: "plugin list",
            len: self.full.len(),
        })?;
        out.write_u8(n);
        for name in &self.full {
            name.write(out)?;
        }
        if with_light {
            let light = self.light_names();
            let n = u16::try_from(light.len()).map_err(|_| FormatError::TooLong {
                what: "light plugin list",
                len: light.len(),
            })?;
            out.write_u16(n);
            for name in light {
                name.write(out)?;
            }
        }
        out.checkpoint("plugin info", size)?;
        Ok(())
    }
}

fn read_globals(
    c: &mut ByteCursor<'_>,
    ctx: &mut GlobalReadContext<'_>,
    count: u32,
    table: &'static str,
) -> Result<Vec<GlobalData>> {
    let mut entries = Vec::with_capacity((count as usize).min(c.remaining() / 8));
    for i in 0..count as usize {
        let entry = GlobalData::read(c, ctx).map_err(|e| Error::Entry {
            table,
            index: i,
            total: count as usize,
            source: Box::new(e),
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

fn globals_size(entries: &[GlobalData]) -> usize {
    entries.iter().map(GlobalData::byte_size).sum()
}

fn write_globals(out: &mut ByteSink, entries: &[GlobalData], table: &'static str) -> Result<()> {
    for e in entries {
        e.write(out).with_context(|| format!("{} type {}", table, e.kind))?;
    }
    Ok(())
}

fn read_u32_list(c: &mut ByteCursor<'_>) -> Result<Vec<u32>> {
    let n = c.read_u32()? as usize;
    let mut v = Vec::with_capacity(n.min(c.remaining() / 4));
    for _ in 0..n {
        v.push(c.read_u32()?);
    }
    Ok(v)
}

fn write_u32_list(out: &mut ByteSink, v: &[u32]) {
    out.write_u32(v.len() as u32);
    for x in v {
        out.write_u32(*x);
    }
}

/// CRC32 over the header bytes followed by the uncompressed body.
pub fn digest(header: &[u8], body: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header);
    hasher.update(body);
    hasher.finalize()
}

/// A loaded save.
#[derive(Debug)]
pub struct SaveFile {
    pub game: Game,
    pub header: Header,
    pub screenshot: Vec<u8>,
    pub form_version: u8,
    /// Fallout 4 only.
    pub game_version: Option<WString>,
    pub plugins: PluginInfo,
    /// The table as read. Offsets and counts are recomputed on write; the
    /// reserved words are written back unchanged.
    pub location: FileLocationTable,
    pub table1: Vec<GlobalData>,
    pub table2: Vec<GlobalData>,
    pub change_forms: ChangeFormStore,
    pub table3: Vec<GlobalData>,
    /// Entries present minus the count stored for table 3.
    pub table3_count_bias: i32,
    pub form_ids: Vec<u32>,
    pub visited_worldspaces: Vec<u32>,
    pub unknown3: Vec<u8>,
    pub tail: Vec<u8>,
    registry: IdRegistry,
    diagnostics: Diagnostics,
    decoder: Decoder,
}

/// Two saves are equal when everything that is written back is equal.
impl PartialEq for SaveFile {
    fn eq(&self, other: &Self) -> bool {
        self.game == other.game
            && self.header == other.header
            && self.screenshot == other.screenshot
            && self.form_version == other.form_version
            && self.game_version == other.game_version
            && self.plugins == other.plugins
            && self.location == other.location
            && self.table1 == other.table1
            && self.table2 == other.table2
            && self.change_forms == other.change_forms
            && self.table3 == other.table3
            && self.table3_count_bias == other.table3_count_bias
            && self.form_ids == other.form_ids
            && self.visited_worldspaces == other.visited_worldspaces
            && self.unknown3 == other.unknown3
            && self.tail == other.tail
    }
}

#[derive(Debug)]
pub struct LoadResult {
    pub save: SaveFile,
    pub digest: u32,
    /// Some part of the save could not be read; it cannot be written back.
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SaveResult {
    pub bytes_written: usize,
    pub digest: u32,
}

/// A serialized save and the digest of its uncompressed bytes.
#[derive(Debug, Clone)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub digest: u32,
}

impl SaveFile {
    pub fn load(path: impl AsRef<Path>, options: &LoadOptions) -> Result<LoadResult> {
        let path = path.as_ref();
        let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let result = Self::from_bytes(&data, options)?;
        log::info!(
            "loaded {} ({}, {} bytes, digest {:08x})",
            path.display(),
            result.save.game,
            data.len(),
            result.digest
        );
        Ok(result)
    }

    pub fn from_bytes(data: &[u8], options: &LoadOptions) -> Result<LoadResult> {
        let mut c = ByteCursor::new(data);
        let (game, header, screenshot) = Header::read(&mut c).context("header")?;
        let header_len = c.offset();

        let inflated;
        let body = if header.compression.is_compressed() {
            let uncompressed = c.read_u32().context("compression envelope")? as usize;
            let compressed = c.read_u32().context("compression envelope")? as usize;
            let packed = c.read_bytes(compressed).context("compressed body")?;
            inflated = header.compression.inflate(packed, uncompressed)?;
            if !c.is_empty() {
                log::warn!("{} bytes after the compressed body are ignored", c.remaining());
            }
            log::debug!("{} body: {} -> {} bytes", header.compression, compressed, uncompressed);
            &inflated[..]
        } else {
            c.read_rest()
        };

        let digest = digest(&data[..header_len], body);
        let mut b = ByteCursor::with_base(body, header_len);
        let save = Self::read_body(&mut b, game, header, screenshot, options)?;
        let truncated = save.is_truncated();
        if truncated {
            log::warn!("save is truncated and will not be written back");
        }
        Ok(LoadResult {
            save,
            digest,
            truncated,
        })
    }

    fn read_body(
        b: &mut ByteCursor<'_>,
        game: Game,
        header: Header,
        screenshot: Vec<u8>,
        options: &LoadOptions,
    ) -> Result<Self> {
        let mut registry = IdRegistry::new(game.eid_width());
        let mut diagnostics = Diagnostics::new();

        let form_version = b.read_u8().context("form version")?;
        let game_version = if game.has_game_version() {
            Some(WString::read(b).context("game version")?)
        } else {
            None
        };
        let plugins = PluginInfo::read(b, game.has_light_plugins(form_version))?;
        let location = FileLocationTable::read(b).context("file location table")?;
        log::debug!(
            "form version {}, {} plugins, {} change forms",
            form_version,
            plugins.full.len(),
            location.change_form_count
        );

        let mut ctx = GlobalReadContext {
            game,
            decode_papyrus: options.decode_papyrus,
            registry: &mut registry,
            diagnostics: &mut diagnostics,
        };

        b.expect_position("global data table 1", location.global_data_table1_offset as usize)?;
        let table1 = read_globals(b, &mut ctx, location.global_data_table1_count, "global data table 1")?;

        b.expect_position("global data table 2", location.global_data_table2_offset as usize)?;
        let table2 = read_globals(b, &mut ctx, location.global_data_table2_count, "global data table 2")?;

        b.expect_position("change forms", location.change_forms_offset as usize)?;
        let table3_at = location.global_data_table3_offset as usize;
        let region_len = table3_at.checked_sub(b.position()).ok_or_else(|| FormatError::Mismatch {
            what: "global data table 3 offset",
            expected: format!("at least 0x{:X}", b.position()),
            found: format!("0x{:X}", table3_at),
        })?;
        let mut region = b.sub_cursor(region_len).context("change forms")?;
        let change_forms = ChangeFormStore::read(
            &mut region,
            location.change_form_count as usize,
            ctx.registry,
            ctx.diagnostics,
        );
        if !region.is_empty() && !change_forms.is_truncated() {
            return Err(PositionMismatch {
                section: "change forms".to_string(),
                offset: location.change_forms_offset as usize,
                declared: region_len,
                actual: region_len - region.remaining(),
            }
            .into());
        }

        // The stored count is unreliable; the form id array offset is not.
        b.expect_position("global data table 3", table3_at)?;
        let table3_end = location.form_id_array_count_offset as usize;
        let mut table3 = Vec::new();
        while b.position() < table3_end {
            let entry = GlobalData::read(b, &mut ctx).map_err(|e| Error::Entry {
                table: "global data table 3",
                index: table3.len(),
                total: location.global_data_table3_count as usize,
                source: Box::new(e),
            })?;
            table3.push(entry);
        }
        let stored = location.global_data_table3_count;
        let actual = table3.len() as u32;
        if stored != actual {
            ctx.diagnostics
                .push(Diagnostic::Table3CountBias { stored, actual });
        }
        let table3_count_bias = (actual as i64 - stored as i64) as i32;

        b.expect_position("form id array", table3_end)?;
        let form_ids = read_u32_list(b).context("form id array")?;
        let visited_worldspaces = read_u32_list(b).context("visited worldspaces")?;

        b.expect_position("unknown table 3", location.unknown_table3_offset as usize)?;
        let n = b.read_u32().context("unknown table 3")? as usize;
        let unknown3 = b.read_bytes(n).context("unknown table 3")?.to_vec();
        let tail = b.read_rest().to_vec();
        if !tail.is_empty() {
            log::debug!("{} bytes after unknown table 3", tail.len());
        }

        Ok(Self {
            game,
            header,
            screenshot,
            form_version,
            game_version,
            plugins,
            location,
            table1,
            table2,
            change_forms,
            table3,
            table3_count_bias,
            form_ids,
            visited_worldspaces,
            unknown3,
            tail,
            registry,
            diagnostics,
            decoder: options.decoder(),
        })
    }

    /// Whether a Papyrus snapshot or the change form store was cut short.
    pub fn is_truncated(&self) -> bool {
        self.change_forms.is_truncated()
            || self
                .table1
                .iter()
                .chain(&self.table2)
                .chain(&self.table3)
                .any(GlobalData::is_truncated)
    }

    fn with_light(&self) -> bool {
        self.game.has_light_plugins(self.form_version)
    }

    fn game_version_size(&self) -> usize {
        if !self.game.has_game_version() {
            return 0;
        }
        self.game_version.as_ref().map_or(2, WString::byte_size)
    }

    /// The file location table this save will be written with.
    pub fn plan(&self, header_len: usize) -> FileLocationTable {
        let mut flt = self.location;
        let mut pos = header_len
            + 1
            + self.game_version_size()
            + 4
            + self.plugins.byte_size(self.with_light())
            + FileLocationTable::BYTE_SIZE;

        flt.global_data_table1_offset = pos as u32;
        flt.global_data_table1_count = self.table1.len() as u32;
        pos += globals_size(&self.table1);

        flt.global_data_table2_offset = pos as u32;
        flt.global_data_table2_count = self.table2.len() as u32;
        pos += globals_size(&self.table2);

        flt.change_forms_offset = pos as u32;
        flt.change_form_count = self.change_forms.len() as u32;
        pos += self.change_forms.byte_size();

        flt.global_data_table3_offset = pos as u32;
        let stored = self.table3.len() as i64 - self.table3_count_bias as i64;
        flt.global_data_table3_count = stored.max(0) as u32;
        pos += globals_size(&self.table3);

        flt.form_id_array_count_offset = pos as u32;
        pos += 4 + 4 * self.form_ids.len() + 4 + 4 * self.visited_worldspaces.len();

        flt.unknown_table3_offset = pos as u32;
        flt
    }

    fn write_body(&self, out: &mut ByteSink, flt: &FileLocationTable) -> Result<()> {
        out.write_u8(self.form_version);
        if self.game.has_game_version() {
            match &self.game_version {
                Some(v) => v.write(out)?,
                None => out.write_u16(0),
            }
        }
        self.plugins.write(out, self.with_light())?;
        flt.write(out)?;

        out.expect_position("global data table 1", flt.global_data_table1_offset as usize)?;
        write_globals(out, &self.table1, "global data table 1")?;
        out.expect_position("global data table 2", flt.global_data_table2_offset as usize)?;
        write_globals(out, &self.table2, "global data table 2")?;
        out.expect_position("change forms", flt.change_forms_offset as usize)?;
        self.change_forms.write(out).context("change forms")?;
        out.expect_position("global data table 3", flt.global_data_table3_offset as usize)?;
        write_globals(out, &self.table3, "global data table 3")?;

        out.expect_position("form id array", flt.form_id_array_count_offset as usize)?;
        write_u32_list(out, &self.form_ids);
        write_u32_list(out, &self.visited_worldspaces);

        out.expect_position("unknown table 3", flt.unknown_table3_offset as usize)?;
        out.write_u32(self.unknown3.len() as u32);
        out.write_bytes(&self.unknown3);
        out.write_bytes(&self.tail);
        Ok(())
    }

    /// Serialize the whole file. Refused when the save is truncated.
    pub fn encode(&self) -> Result<Encoded> {
        if self.is_truncated() {
            return Err(Error::Truncated);
        }
        let mut head = ByteSink::new();
        self.header
            .write(&mut head, self.game, &self.screenshot)
            .context("header")?;
        let header_len = head.len();

        let flt = self.plan(header_len);
        let mut body = ByteSink::with_base(header_len);
        self.write_body(&mut body, &flt)?;
        let body = body.into_inner();
        let digest = digest(head.as_slice(), &body);

        let compression = self.header.compression;
        if compression.is_compressed() {
            let packed = compression.deflate(&body)?;
            head.write_u32(body.len() as u32);
            head.write_u32(packed.len() as u32);
            head.write_bytes(&packed);
        } else {
            head.write_bytes(&body);
        }
        Ok(Encoded {
            bytes: head.into_inner(),
            digest,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.encode()?.bytes)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<SaveResult> {
        let path = path.as_ref();
        let encoded = self.encode()?;
        std::fs::write(path, &encoded.bytes).with_context(|| format!("writing {}", path.display()))?;
        log::info!(
            "wrote {} ({} bytes, digest {:08x})",
            path.display(),
            encoded.bytes.len(),
            encoded.digest
        );
        Ok(SaveResult {
            bytes_written: encoded.bytes.len(),
            digest: encoded.digest,
        })
    }

    pub fn form_id_for(&self, r: RefId) -> Option<u32> {
        r.form_id(&self.form_ids)
    }

    /// The plugin a RefID's form comes from. Created forms have none.
    pub fn plugin_for(&self, r: RefId) -> Option<&WString> {
        let form_id = self.form_id_for(r)?;
        match form_id >> 24 {
            0xFF => None,
            0xFE => self
                .plugins
                .light
                .as_ref()?
                .get(((form_id >> 12) & 0xFFF) as usize),
            index => self.plugins.full.get(index as usize),
        }
    }

    pub fn papyrus(&self) -> Option<&Papyrus> {
        self.table3.iter().find_map(GlobalData::papyrus)
    }

    pub fn papyrus_mut(&mut self) -> Option<&mut Papyrus> {
        self.table3.iter_mut().find_map(GlobalData::papyrus_mut)
    }

    /// Decode the body of the change form for `r`, if there is one.
    pub fn decode_change_form(&mut self, r: RefId) -> Option<ChangeFormData> {
        let form = self.change_forms.get(r)?;
        Some(form.decode_body(&mut self.registry))
    }

    pub fn registry(&self) -> &IdRegistry {
        &self.registry
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// Render a string of this save as text.
    pub fn text(&self, s: &WString) -> String {
        s.text(&self.decoder).into_owned()
    }
}

pub fn load(path: impl AsRef<Path>, options: &LoadOptions) -> Result<LoadResult> {
    SaveFile::load(path, options)
}

pub fn save(save: &SaveFile, path: impl AsRef<Path>) -> Result<SaveResult> {
    save.save(path)
}
