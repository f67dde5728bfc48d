//! Typed change form bodies.

use serde::Serialize;

use crate::cursor::{ByteCursor, ByteSink};
use crate::error::{FormatError, Result};
use crate::ids::RefId;
use crate::registry::IdRegistry;

use super::ChangeFlags;

/// The form-flags block that starts most bodies when
/// [`ChangeFlags::FORM_FLAGS`] is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FormFlagsHeader {
    pub flags: u32,
    pub unknown: u16,
}

impl FormFlagsHeader {
    pub const BYTE_SIZE: usize = 6;

    fn read_if(c: &mut ByteCursor<'_>, flags: ChangeFlags) -> Result<Option<Self>> {
        if !flags.contains(ChangeFlags::FORM_FLAGS) {
            return Ok(None);
        }
        Ok(Some(Self {
            flags: c.read_u32()?,
            unknown: c.read_u16()?,
        }))
    }

    fn write(&self, out: &mut ByteSink) {
        out.write_u32(self.flags);
        out.write_u16(self.unknown);
    }
}

fn read_ref_id(c: &mut ByteCursor<'_>, registry: &mut IdRegistry) -> Result<RefId> {
    let r = registry.read_ref_id(c)?;
    registry.note_ref_id(r, |u| u.change_form = true);
    Ok(r)
}

fn expect_end(c: &ByteCursor<'_>, total: usize) -> Result<()> {
    if !c.is_empty() {
        return Err(FormatError::Mismatch {
            what: "change form body length",
            expected: total.to_string(),
            found: c.offset().to_string(),
        }
        .into());
    }
    Ok(())
}

/// FLST: an optional list of forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormListBody {
    pub header: Option<FormFlagsHeader>,
    /// Present when [`ChangeFlags::LIST_CONTENT`] is set.
    pub forms: Option<Vec<RefId>>,
}

impl FormListBody {
    pub fn decode(body: &[u8], flags: ChangeFlags, registry: &mut IdRegistry) -> Result<Self> {
        let mut c = ByteCursor::new(body);
        let header = FormFlagsHeader::read_if(&mut c, flags)?;
        let forms = if flags.contains(ChangeFlags::LIST_CONTENT) {
            let count = c.read_u32()? as usize;
            let mut forms = Vec::with_capacity(count.min(c.remaining() / RefId::BYTE_SIZE));
            for _ in 0..count {
                forms.push(read_ref_id(&mut c, registry)?);
            }
            Some(forms)
        } else {
            None
        };
        expect_end(&c, body.len())?;
        Ok(Self { header, forms })
    }

    fn encode(&self, out: &mut ByteSink) {
        if let Some(h) = &self.header {
            h.write(out);
        }
        if let Some(forms) = &self.forms {
            out.write_u32(forms.len() as u32);
            for f in forms {
                f.write(out);
            }
        }
    }

    fn byte_size(&self) -> usize {
        self.header.map_or(0, |_| FormFlagsHeader::BYTE_SIZE)
            + self
                .forms
                .as_ref()
                .map_or(0, |f| 4 + f.len() * RefId::BYTE_SIZE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeveledEntry {
    pub form: RefId,
    pub level: u16,
    pub count: u16,
    pub chance_none: u8,
}

impl LeveledEntry {
    pub const BYTE_SIZE: usize = RefId::BYTE_SIZE + 5;
}

/// LVLN, LVLI and LVSP: an optional list of leveled entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeveledListBody {
    pub header: Option<FormFlagsHeader>,
    pub entries: Option<Vec<LeveledEntry>>,
}

impl LeveledListBody {
    pub fn decode(body: &[u8], flags: ChangeFlags, registry: &mut IdRegistry) -> Result<Self> {
        let mut c = ByteCursor::new(body);
        let header = FormFlagsHeader::read_if(&mut c, flags)?;
        let entries = if flags.contains(ChangeFlags::LIST_CONTENT) {
            let count = c.read_u8()? as usize;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                entries.push(LeveledEntry {
                    form: read_ref_id(&mut c, registry)?,
                    level: c.read_u16()?,
                    count: c.read_u16()?,
                    chance_none: c.read_u8()?,
                });
            }
            Some(entries)
        } else {
            None
        };
        expect_end(&c, body.len())?;
        Ok(Self { header, entries })
    }

    fn encode(&self, out: &mut ByteSink) -> Result<()> {
        if let Some(h) = &self.header {
            h.write(out);
        }
        if let Some(entries) = &self.entries {
            let n = u8::try_from(entries.len()).map_err(|_| FormatError::TooLong {
                what: "leveled list",
                len: entries.len(),
            })?;
            out.write_u8(n);
            for e in entries {
                e.form.write(out);
                out.write_u16(e.level);
                out.write_u16(e.count);
                out.write_u8(e.chance_none);
            }
        }
        Ok(())
    }

    fn byte_size(&self) -> usize {
        self.header.map_or(0, |_| FormFlagsHeader::BYTE_SIZE)
            + self
                .entries
                .as_ref()
                .map_or(0, |e| 1 + e.len() * LeveledEntry::BYTE_SIZE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FieldValue {
    U16(u16),
    U32(u32),
    Bytes(Vec<u8>),
}

impl FieldValue {
    fn byte_size(&self) -> usize {
        match self {
            FieldValue::U16(_) => 2,
            FieldValue::U32(_) => 4,
            FieldValue::Bytes(b) => b.len(),
        }
    }
}

/// A body of a known type without a dedicated decoder: the form-flags
/// header as named fields, and everything after it as bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneralElement {
    pub fields: Vec<(&'static str, FieldValue)>,
}

impl GeneralElement {
    pub fn decode(body: &[u8], flags: ChangeFlags) -> Result<Self> {
        let mut c = ByteCursor::new(body);
        let mut fields = Vec::new();
        if let Some(h) = FormFlagsHeader::read_if(&mut c, flags)? {
            fields.push(("form flags", FieldValue::U32(h.flags)));
            fields.push(("form flags unknown", FieldValue::U16(h.unknown)));
        }
        fields.push(("data", FieldValue::Bytes(c.read_rest().to_vec())));
        Ok(Self { fields })
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    fn encode(&self, out: &mut ByteSink) {
        for (_, v) in &self.fields {
            match v {
                FieldValue::U16(x) => out.write_u16(*x),
                FieldValue::U32(x) => out.write_u32(*x),
                FieldValue::Bytes(b) => out.write_bytes(b),
            }
        }
    }

    fn byte_size(&self) -> usize {
        self.fields.iter().map(|(_, v)| v.byte_size()).sum()
    }
}

/// A decoded change form body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ChangeFormData {
    FormList(FormListBody),
    LeveledList(LeveledListBody),
    General(GeneralElement),
    /// The body could not be decoded; the bytes are kept as they were.
    Opaque { bytes: Vec<u8>, reason: String },
}

impl ChangeFormData {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = ByteSink::with_capacity(self.byte_size());
        match self {
            ChangeFormData::FormList(b) => b.encode(&mut out),
            ChangeFormData::LeveledList(b) => b.encode(&mut out)?,
            ChangeFormData::General(b) => b.encode(&mut out),
            ChangeFormData::Opaque { bytes, .. } => out.write_bytes(bytes),
        }
        Ok(out.into_inner())
    }

    /// Size of the uncompressed body.
    pub fn byte_size(&self) -> usize {
        match self {
            ChangeFormData::FormList(b) => b.byte_size(),
            ChangeFormData::LeveledList(b) => b.byte_size(),
            ChangeFormData::General(b) => b.byte_size(),
            ChangeFormData::Opaque { bytes, .. } => bytes.len(),
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, ChangeFormData::Opaque { .. })
    }
}
