//! World-object delta records.
//!
//! A change form is framed by a small header and carries its body as raw
//! bytes, optionally zlib-compressed. Bodies are only decoded on request. If
//! an entry's framing is corrupt the store looks for the one position from
//! which the remaining entries frame cleanly up to the end of the region,
//! and keeps the bytes it skipped as a [`ChangeFormEntry::Corrupt`] span.

pub mod body;

use std::collections::HashMap;

use bitflags::bitflags;
use serde::Serialize;

use crate::codec::{deflate_zlib, inflate_zlib};
use crate::cursor::{ByteCursor, ByteSink};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{FormatError, Result};
use crate::ids::RefId;
use crate::registry::IdRegistry;

pub use self::body::{
    ChangeFormData, FieldValue, FormFlagsHeader, FormListBody, GeneralElement, LeveledEntry,
    LeveledListBody,
};

bitflags! {
    /// Which parts of a form a change form records.
    #[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
    pub struct ChangeFlags: u32 {
        /// The body starts with a form-flags header.
        const FORM_FLAGS = 1 << 0;
        const BASE_OBJECT_VALUE = 1 << 1;
        const BASE_OBJECT_FULLNAME = 1 << 2;
        /// List forms carry their contents.
        const LIST_CONTENT = 1 << 31;
    }
}

impl Serialize for ChangeFlags {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::FromRepr)]
#[strum(serialize_all = "UPPERCASE")]
#[repr(u8)]
pub enum ChangeFormType {
    Refr = 0,
    Achr,
    Pmis,
    Pgre,
    Pbea,
    Pfla,
    Cell,
    Info,
    Qust,
    #[strum(serialize = "NPC_")]
    Npc,
    Acti,
    Tact,
    Armo,
    Book,
    Cont,
    Door,
    Ingr,
    Ligh,
    Misc,
    Appa,
    Stat,
    Mstt,
    Furn,
    Weap,
    Ammo,
    Keym,
    Alch,
    Idlm,
    Note,
    Eczn,
    Clas,
    Fact,
    Pack,
    Navm,
    Woop,
    Mgef,
    Smqn,
    Scen,
    Lctn,
    Rela,
    Phzd,
    Pbar,
    Pcon,
    Flst,
    Lvln,
    Lvli,
    Lvsp,
}

/// Width of the two length fields, from the top two bits of the type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LengthWidth {
    U8 = 0,
    U16 = 1,
    U32 = 2,
}

impl LengthWidth {
    fn from_bits(bits: u8) -> std::result::Result<Self, FormatError> {
        match bits {
            0 => Ok(LengthWidth::U8),
            1 => Ok(LengthWidth::U16),
            2 => Ok(LengthWidth::U32),
            _ => Err(FormatError::IllegalTag {
                kind: "change form length width",
                tag: bits as u32,
            }),
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            LengthWidth::U8 => 1,
            LengthWidth::U16 => 2,
            LengthWidth::U32 => 4,
        }
    }

    fn max(self) -> u64 {
        match self {
            LengthWidth::U8 => u8::MAX as u64,
            LengthWidth::U16 => u16::MAX as u64,
            LengthWidth::U32 => u32::MAX as u64,
        }
    }

    /// The narrowest width that holds `n`.
    fn fitting(n: usize) -> Self {
        if n <= u8::MAX as usize {
            LengthWidth::U8
        } else if n <= u16::MAX as usize {
            LengthWidth::U16
        } else {
            LengthWidth::U32
        }
    }

    fn read(self, c: &mut ByteCursor<'_>) -> std::result::Result<u32, FormatError> {
        Ok(match self {
            LengthWidth::U8 => c.read_u8()? as u32,
            LengthWidth::U16 => c.read_u16()? as u32,
            LengthWidth::U32 => c.read_u32()?,
        })
    }

    fn write(self, out: &mut ByteSink, v: u32) {
        match self {
            LengthWidth::U8 => out.write_u8(v as u8),
            LengthWidth::U16 => out.write_u16(v as u16),
            LengthWidth::U32 => out.write_u32(v),
        }
    }
}

const FRAME_FIXED: usize = RefId::BYTE_SIZE + 4 + 1 + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeForm {
    pub ref_id: RefId,
    pub change_flags: ChangeFlags,
    type_code: u8,
    width: LengthWidth,
    pub version: u8,
    /// Uncompressed size; zero when the body is stored uncompressed.
    length2: u32,
    data: Vec<u8>,
}

impl ChangeForm {
    pub fn new(ref_id: RefId, form_type: ChangeFormType, change_flags: ChangeFlags, version: u8) -> Self {
        Self {
            ref_id,
            change_flags,
            type_code: form_type as u8,
            width: LengthWidth::U8,
            version,
            length2: 0,
            data: Vec::new(),
        }
    }

    pub fn read(c: &mut ByteCursor<'_>, registry: &mut IdRegistry) -> Result<Self> {
        let ref_id = registry.read_ref_id(c)?;
        registry.note_ref_id(ref_id, |u| u.change_form = true);
        let change_flags = ChangeFlags::from_bits_retain(c.read_u32()?);
        let type_byte = c.read_u8()?;
        let width = LengthWidth::from_bits(type_byte >> 6)?;
        let version = c.read_u8()?;
        let length1 = width.read(c)?;
        let length2 = width.read(c)?;
        let data = c.read_bytes(length1 as usize)?.to_vec();
        Ok(Self {
            ref_id,
            change_flags,
            type_code: type_byte & 0x3F,
            width,
            version,
            length2,
            data,
        })
    }

    pub fn write(&self, out: &mut ByteSink) -> Result<()> {
        if self.data.len() as u64 > self.width.max() {
            return Err(FormatError::TooLong {
                what: "change form body",
                len: self.data.len(),
            }
            .into());
        }
        self.ref_id.write(out);
        out.write_u32(self.change_flags.bits());
        out.write_u8(self.type_code | (self.width as u8) << 6);
        out.write_u8(self.version);
        self.width.write(out, self.data.len() as u32);
        self.width.write(out, self.length2);
        out.write_bytes(&self.data);
        Ok(())
    }

    pub fn byte_size(&self) -> usize {
        FRAME_FIXED + 2 * self.width.bytes() + self.data.len()
    }

    /// The known type, if the 6-bit code is one.
    pub fn form_type(&self) -> Option<ChangeFormType> {
        ChangeFormType::from_repr(self.type_code)
    }

    pub fn type_code(&self) -> u8 {
        self.type_code
    }

    pub fn length_width(&self) -> LengthWidth {
        self.width
    }

    pub fn is_compressed(&self) -> bool {
        self.length2 > 0
    }

    /// Stored body bytes, compressed if the form is.
    pub fn raw_data(&self) -> &[u8] {
        &self.data
    }

    /// The body, inflated if it is stored compressed.
    pub fn body_bytes(&self) -> Result<Vec<u8>> {
        if self.is_compressed() {
            Ok(inflate_zlib(&self.data, self.length2 as usize)?)
        } else {
            Ok(self.data.clone())
        }
    }

    /// Decode the body by type code. Never fails: anything that cannot be
    /// decoded is returned as [`ChangeFormData::Opaque`].
    pub fn decode_body(&self, registry: &mut IdRegistry) -> ChangeFormData {
        let body = match self.body_bytes() {
            Ok(b) => b,
            Err(e) => {
                return ChangeFormData::Opaque {
                    bytes: self.data.clone(),
                    reason: e.to_string(),
                }
            }
        };

        let decoded = match self.form_type() {
            Some(ChangeFormType::Flst) => {
                FormListBody::decode(&body, self.change_flags, registry).map(ChangeFormData::FormList)
            }
            Some(ChangeFormType::Lvln | ChangeFormType::Lvli | ChangeFormType::Lvsp) => {
                LeveledListBody::decode(&body, self.change_flags, registry)
                    .map(ChangeFormData::LeveledList)
            }
            Some(_) => GeneralElement::decode(&body, self.change_flags).map(ChangeFormData::General),
            None => {
                return ChangeFormData::Opaque {
                    bytes: body,
                    reason: format!("unknown change form type {}", self.type_code),
                }
            }
        };

        decoded.unwrap_or_else(|e| {
            log::debug!("change form {} kept opaque: {}", self.ref_id, e);
            ChangeFormData::Opaque {
                bytes: body,
                reason: e.to_string(),
            }
        })
    }

    /// Replace the body. A compressed form stays compressed, and the length
    /// width grows if the new body needs it.
    pub fn set_body(&mut self, body: &ChangeFormData) -> Result<()> {
        let raw = body.encode()?;
        if self.is_compressed() {
            self.length2 = raw.len() as u32;
            self.data = deflate_zlib(&raw)?;
        } else {
            self.data = raw;
        }
        let needed = LengthWidth::fitting(self.data.len().max(self.length2 as usize));
        if needed.bytes() > self.width.bytes() {
            self.width = needed;
        }
        Ok(())
    }
}

/// Bytes of one framed entry starting at `at`, if its framing is plausible.
fn frame_len(buf: &[u8], at: usize) -> Option<usize> {
    let mut c = ByteCursor::new(buf.get(at..)?);
    c.read_bytes(RefId::BYTE_SIZE + 4).ok()?;
    let width = LengthWidth::from_bits(c.read_u8().ok()? >> 6).ok()?;
    c.read_u8().ok()?;
    let length1 = width.read(&mut c).ok()? as usize;
    width.read(&mut c).ok()?;
    c.read_bytes(length1).ok()?;
    Some(c.offset())
}

/// The unique position after `from` where the remaining entries frame
/// exactly to the end of `buf`.
///
/// One backward pass: the number of entries that chain from a position to
/// the end is one more than the number chaining from where its frame ends.
fn find_resync(buf: &[u8], from: usize, remaining: usize) -> Option<usize> {
    const NO_CHAIN: u32 = u32::MAX;
    let start = from + 1;
    if start > buf.len() {
        return None;
    }
    let mut chains = vec![NO_CHAIN; buf.len() + 1 - start];
    let mut found = None;
    for p in (start..=buf.len()).rev() {
        let chained = if p == buf.len() {
            0
        } else {
            match frame_len(buf, p).map(|n| chains[p + n - start]) {
                Some(NO_CHAIN) | None => NO_CHAIN,
                Some(k) => k + 1,
            }
        };
        chains[p - start] = chained;
        if chained != NO_CHAIN && chained as usize == remaining {
            if found.is_some() {
                return None;
            }
            found = Some(p);
        }
    }
    found
}

/// Bytes skipped over while resynchronizing, written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptSpan {
    /// Logical position of the span in the save.
    pub offset: usize,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeFormEntry {
    Form(ChangeForm),
    Corrupt(CorruptSpan),
}

impl ChangeFormEntry {
    pub fn byte_size(&self) -> usize {
        match self {
            ChangeFormEntry::Form(f) => f.byte_size(),
            ChangeFormEntry::Corrupt(s) => s.bytes.len(),
        }
    }
}

/// Every change form of a save, in file order, with a lookup by RefID.
#[derive(Debug, Clone, Default)]
pub struct ChangeFormStore {
    entries: Vec<ChangeFormEntry>,
    index: HashMap<RefId, usize>,
    truncated: bool,
}

impl PartialEq for ChangeFormStore {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries && self.truncated == other.truncated
    }
}

impl Eq for ChangeFormStore {}

impl ChangeFormStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `count` entries from `c`, which spans exactly the change form
    /// region.
    pub fn read(
        c: &mut ByteCursor<'_>,
        count: usize,
        registry: &mut IdRegistry,
        diagnostics: &mut Diagnostics,
    ) -> Self {
        let mut store = Self::new();
        let region = c.peek_rest();
        let base = c.position();
        let start = c.offset();

        let mut i = 0;
        while i < count {
            let at = c.offset() - start;
            c.set_mark();
            match ChangeForm::read(c, registry) {
                Ok(form) => {
                    debug_assert_eq!(c.since_mark(), form.byte_size());
                    store.push(form, diagnostics);
                    i += 1;
                }
                Err(e) => {
                    log::warn!("change form {} of {} at 0x{:X}: {}", i, count, base + at, e);
                    let remaining = count - i - 1;
                    let end = match find_resync(region, at, remaining) {
                        Some(end) => end,
                        None => {
                            log::error!("no resync point for change forms after entry {}", i);
                            store.truncated = true;
                            region.len()
                        }
                    };
                    diagnostics.push(Diagnostic::ChangeFormResync {
                        index: i,
                        offset: base + at,
                        skipped: end - at,
                    });
                    store.entries.push(ChangeFormEntry::Corrupt(CorruptSpan {
                        offset: base + at,
                        bytes: region[at..end].to_vec(),
                    }));
                    // seek within the region never fails
                    if c.seek(start + end).is_err() || store.truncated {
                        break;
                    }
                    i += 1;
                }
            }
        }
        store
    }

    fn push(&mut self, form: ChangeForm, diagnostics: &mut Diagnostics) {
        let at = self.entries.len();
        if self.index.insert(form.ref_id, at).is_some() {
            diagnostics.push(Diagnostic::DuplicateKey {
                table: "change forms",
                key: form.ref_id.to_string(),
                index: at,
            });
        }
        self.entries.push(ChangeFormEntry::Form(form));
    }

    /// Append a new change form. An existing form with the same RefID is
    /// shadowed for lookups.
    pub fn insert(&mut self, form: ChangeForm) {
        let at = self.entries.len();
        self.index.insert(form.ref_id, at);
        self.entries.push(ChangeFormEntry::Form(form));
    }

    pub fn write(&self, out: &mut ByteSink) -> Result<()> {
        for e in &self.entries {
            match e {
                ChangeFormEntry::Form(f) => f.write(out)?,
                ChangeFormEntry::Corrupt(s) => out.write_bytes(&s.bytes),
            }
        }
        Ok(())
    }

    pub fn byte_size(&self) -> usize {
        self.entries.iter().map(ChangeFormEntry::byte_size).sum()
    }

    /// Number of entries, corrupt spans included. This is the count the
    /// file-location table records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Corrupt framing with no resync point left the tail of the region
    /// unparsed.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn get(&self, ref_id: RefId) -> Option<&ChangeForm> {
        match self.entries.get(*self.index.get(&ref_id)?) {
            Some(ChangeFormEntry::Form(f)) => Some(f),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, ref_id: RefId) -> Option<&mut ChangeForm> {
        let at = *self.index.get(&ref_id)?;
        match self.entries.get_mut(at) {
            Some(ChangeFormEntry::Form(f)) => Some(f),
            _ => None,
        }
    }

    pub fn entries(&self) -> &[ChangeFormEntry] {
        &self.entries
    }

    pub fn forms(&self) -> impl Iterator<Item = &ChangeForm> {
        self.entries.iter().filter_map(|e| match e {
            ChangeFormEntry::Form(f) => Some(f),
            ChangeFormEntry::Corrupt(_) => None,
        })
    }

    pub fn corrupt_spans(&self) -> impl Iterator<Item = &CorruptSpan> {
        self.entries.iter().filter_map(|e| match e {
            ChangeFormEntry::Corrupt(s) => Some(s),
            ChangeFormEntry::Form(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::EidWidth;
    use pretty_assertions::assert_eq;

    fn frame(ref_id: u32, type_code: u8, body: &[u8]) -> Vec<u8> {
        let mut out = ByteSink::new();
        out.write_u24_be(ref_id);
        out.write_u32(0);
        out.write_u8(type_code);
        out.write_u8(1);
        out.write_u8(body.len() as u8);
        out.write_u8(0);
        out.write_bytes(body);
        out.into_inner()
    }

    #[test]
    fn unknown_type_is_opaque_with_exact_size() {
        let bytes = frame(0x400001, 0x3E, &[1, 2, 3, 4, 5]);
        let mut reg = IdRegistry::new(EidWidth::W32);
        let form = ChangeForm::read(&mut ByteCursor::new(&bytes), &mut reg).unwrap();
        assert_eq!(form.form_type(), None);
        assert_eq!(form.byte_size(), bytes.len());

        let body = form.decode_body(&mut reg);
        assert!(body.is_opaque());
        assert_eq!(body.byte_size(), 5);
    }

    #[test]
    fn compressed_body_round_trips_through_set_body() {
        let mut reg = IdRegistry::new(EidWidth::W32);
        let raw = hex::decode("0100000040000a").unwrap();
        let compressed = deflate_zlib(&raw).unwrap();

        let mut out = ByteSink::new();
        out.write_u24_be(0x400002);
        out.write_u32(ChangeFlags::LIST_CONTENT.bits());
        out.write_u8(ChangeFormType::Flst as u8);
        out.write_u8(3);
        out.write_u8(compressed.len() as u8);
        out.write_u8(raw.len() as u8);
        out.write_bytes(&compressed);
        let bytes = out.into_inner();

        let mut form = ChangeForm::read(&mut ByteCursor::new(&bytes), &mut reg).unwrap();
        assert!(form.is_compressed());
        let mut body = form.decode_body(&mut reg);
        match &mut body {
            ChangeFormData::FormList(list) => {
                let forms = list.forms.as_mut().unwrap();
                assert_eq!(forms.len(), 1);
                forms.push(reg.intern_ref_id(0x400003));
            }
            other => panic!("expected a form list, got {:?}", other),
        }
        form.set_body(&body).unwrap();
        assert!(form.is_compressed());
        assert_eq!(form.decode_body(&mut reg), body);
    }

    #[test]
    fn corrupt_entry_is_contained() {
        let good1 = frame(0x400001, 0, &[0xAA; 4]);
        let mut bad = frame(0x400002, 0, &[0xBB; 4]);
        bad[9] = 0xF0; // length overruns everything
        let good2 = frame(0x400003, 0, &[0xCC; 6]);
        let region = [good1.clone(), bad.clone(), good2.clone()].concat();

        let mut reg = IdRegistry::new(EidWidth::W32);
        let mut diags = Diagnostics::new();
        let mut c = ByteCursor::with_base(&region, 100);
        let store = ChangeFormStore::read(&mut c, 3, &mut reg, &mut diags);

        assert!(c.is_empty());
        assert!(!store.is_truncated());
        assert_eq!(store.len(), 3);
        assert_eq!(store.forms().count(), 2);
        let span = store.corrupt_spans().next().unwrap();
        assert_eq!(span.offset, 100 + good1.len());
        assert_eq!(span.bytes, bad);
        assert!(store.get(reg.intern_ref_id(0x400003)).is_some());
        assert_eq!(diags.len(), 1);

        let mut out = ByteSink::new();
        store.write(&mut out).unwrap();
        assert_eq!(out.as_slice(), &region[..]);
        assert_eq!(store.byte_size(), region.len());
    }

    #[test]
    fn corrupt_entry_without_resync_truncates() {
        let good = frame(0x400001, 0, &[0xAA; 4]);
        let mut bad = frame(0x400002, 0, &[0xBB; 4]);
        bad[9] = 0xF0;
        let region = [good, bad].concat();

        let mut reg = IdRegistry::new(EidWidth::W32);
        let mut diags = Diagnostics::new();
        // five declared entries, only two present
        let store = ChangeFormStore::read(&mut ByteCursor::new(&region), 5, &mut reg, &mut diags);
        assert!(store.is_truncated());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn type_names() {
        assert_eq!(ChangeFormType::Npc.to_string(), "NPC_");
        assert_eq!(ChangeFormType::Flst as u8, 43);
        assert_eq!(ChangeFormType::Lvsp as u8, 46);
        assert_eq!(ChangeFormType::from_repr(0), Some(ChangeFormType::Refr));
    }
}
