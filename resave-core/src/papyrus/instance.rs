//! Heap objects: script instances, world references, struct instances and
//! arrays. Each is read in two phases, a header when the table is read and a
//! body once every table's headers are known.

use crate::cursor::{ByteCursor, ByteSink};
use crate::error::{Error, FormatError, Result};
use crate::ids::{Eid, RefId};
use crate::layout::{Element, Layout};
use crate::registry::EidKind;

use super::context::ReadContext;
use super::strings::TString;
use super::table::Link;
use super::value::{VarType, Variable};

/// The shape shared by every two-phase table entry.
pub trait Instance {
    const TABLE: &'static str;

    fn eid(&self) -> Eid;

    fn write_header(&self, out: &mut ByteSink, layout: &Layout) -> Result<()>;

    fn header_size(&self, layout: &Layout) -> usize;

    /// Fails with [`Error::Truncated`] if the body was never read.
    fn write_body(&self, out: &mut ByteSink, layout: &Layout) -> Result<()>;

    fn body_size(&self, layout: &Layout) -> usize;

    fn has_body(&self) -> bool;
}

/// Each body starts with the id of the header it belongs to.
pub(crate) fn expect_body_eid(
    c: &mut ByteCursor<'_>,
    ctx: &mut ReadContext<'_>,
    what: &'static str,
    expected: Eid,
) -> Result<()> {
    let found = match expected.width() {
        w if w == ctx.layout.eid_width => ctx.read_eid(c)?,
        _ => ctx.read_eid32(c)?,
    };
    if found != expected {
        return Err(FormatError::Mismatch {
            what,
            expected: expected.to_string(),
            found: found.to_string(),
        }
        .into());
    }
    Ok(())
}

pub(crate) fn read_variables(
    c: &mut ByteCursor<'_>,
    ctx: &mut ReadContext<'_>,
    count: usize,
) -> Result<Vec<Variable>> {
    let mut vars = Vec::with_capacity(count.min(c.remaining()));
    for _ in 0..count {
        vars.push(Variable::read(c, ctx)?);
    }
    Ok(vars)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInstanceData {
    pub flag: u8,
    pub type_name: TString,
    pub unknown1: u32,
    /// Present when `flag & 0x04`.
    pub unknown2: Option<u32>,
    pub variables: Vec<Variable>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInstance {
    pub eid: Eid,
    pub script_name: TString,
    pub unknown_bits: u16,
    pub unknown_u16: u16,
    pub ref_id: RefId,
    pub unknown_byte: u8,
    /// Fallout 4 only, when `unknown_bits & 3 == 3`.
    pub extra: Option<u8>,
    pub definition: Link,
    pub data: Option<ScriptInstanceData>,
}

impl ScriptInstance {
    pub(crate) fn read_header(c: &mut ByteCursor<'_>, ctx: &mut ReadContext<'_>) -> Result<(Eid, Self)> {
        let eid = ctx.read_eid(c)?;
        let script_name = ctx.read_tstring(c)?;
        let unknown_bits = c.read_u16()?;
        let unknown_u16 = c.read_u16()?;
        let ref_id = ctx.read_ref_id(c)?;
        let unknown_byte = c.read_u8()?;
        let extra = if ctx.layout.game.is_fallout4() && unknown_bits & 3 == 3 {
            Some(c.read_u8()?)
        } else {
            None
        };
        ctx.registry.define(eid, EidKind::ScriptInstance);
        Ok((
            eid,
            Self {
                eid,
                script_name,
                unknown_bits,
                unknown_u16,
                ref_id,
                unknown_byte,
                extra,
                definition: Link::Pending,
                data: None,
            },
        ))
    }

    pub(crate) fn read_body(&mut self, c: &mut ByteCursor<'_>, ctx: &mut ReadContext<'_>) -> Result<()> {
        expect_body_eid(c, ctx, "script instance body", self.eid)?;
        let flag = c.read_u8()?;
        let type_name = ctx.read_tstring(c)?;
        let unknown1 = c.read_u32()?;
        let unknown2 = if flag & 0x04 != 0 {
            Some(c.read_u32()?)
        } else {
            None
        };
        let count = c.read_u32()? as usize;
        let variables = read_variables(c, ctx, count)?;
        self.data = Some(ScriptInstanceData {
            flag,
            type_name,
            unknown1,
            unknown2,
            variables,
        });
        Ok(())
    }

    /// The instance's member values, if its body was read.
    pub fn variables(&self) -> &[Variable] {
        self.data.as_ref().map_or(&[], |d| &d.variables)
    }
}

impl Instance for ScriptInstance {
    const TABLE: &'static str = "script instances";

    fn eid(&self) -> Eid {
        self.eid
    }

    fn write_header(&self, out: &mut ByteSink, layout: &Layout) -> Result<()> {
        self.eid.write(out);
        self.script_name.write(out, layout)?;
        out.write_u16(self.unknown_bits);
        out.write_u16(self.unknown_u16);
        self.ref_id.write(out);
        out.write_u8(self.unknown_byte);
        if let Some(b) = self.extra {
            out.write_u8(b);
        }
        Ok(())
    }

    fn header_size(&self, layout: &Layout) -> usize {
        self.eid.byte_size()
            + layout.index_bytes()
            + 4
            + RefId::BYTE_SIZE
            + 1
            + self.extra.map_or(0, |_| 1)
    }

    fn write_body(&self, out: &mut ByteSink, layout: &Layout) -> Result<()> {
        let data = self.data.as_ref().ok_or(Error::Truncated)?;
        self.eid.write(out);
        out.write_u8(data.flag);
        data.type_name.write(out, layout)?;
        out.write_u32(data.unknown1);
        if let Some(v) = data.unknown2 {
            out.write_u32(v);
        }
        out.write_u32(data.variables.len() as u32);
        data.variables.write(out, layout)
    }

    fn body_size(&self, layout: &Layout) -> usize {
        self.data.as_ref().map_or(0, |data| {
            self.eid.byte_size()
                + 1
                + layout.index_bytes()
                + 4
                + data.unknown2.map_or(0, |_| 4)
                + 4
                + data.variables.byte_size(layout)
        })
    }

    fn has_body(&self) -> bool {
        self.data.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceData {
    pub flag: u8,
    pub type_name: TString,
    pub unknown1: u32,
    pub unknown2: u32,
    pub variables: Vec<Variable>,
}

/// A world object as seen by the VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub eid: Eid,
    pub type_name: TString,
    pub definition: Link,
    pub data: Option<ReferenceData>,
}

impl Reference {
    pub(crate) fn read_header(c: &mut ByteCursor<'_>, ctx: &mut ReadContext<'_>) -> Result<(Eid, Self)> {
        let eid = ctx.read_eid(c)?;
        let type_name = ctx.read_tstring(c)?;
        ctx.registry.define(eid, EidKind::Reference);
        Ok((
            eid,
            Self {
                eid,
                type_name,
                definition: Link::Pending,
                data: None,
            },
        ))
    }

    pub(crate) fn read_body(&mut self, c: &mut ByteCursor<'_>, ctx: &mut ReadContext<'_>) -> Result<()> {
        expect_body_eid(c, ctx, "reference body", self.eid)?;
        let flag = c.read_u8()?;
        let type_name = ctx.read_tstring(c)?;
        let unknown1 = c.read_u32()?;
        let unknown2 = c.read_u32()?;
        let count = c.read_u32()? as usize;
        let variables = read_variables(c, ctx, count)?;
        self.data = Some(ReferenceData {
            flag,
            type_name,
            unknown1,
            unknown2,
            variables,
        });
        Ok(())
    }
}

impl Instance for Reference {
    const TABLE: &'static str = "references";

    fn eid(&self) -> Eid {
        self.eid
    }

    fn write_header(&self, out: &mut ByteSink, layout: &Layout) -> Result<()> {
        self.eid.write(out);
        self.type_name.write(out, layout)
    }

    fn header_size(&self, layout: &Layout) -> usize {
        self.eid.byte_size() + layout.index_bytes()
    }

    fn write_body(&self, out: &mut ByteSink, layout: &Layout) -> Result<()> {
        let data = self.data.as_ref().ok_or(Error::Truncated)?;
        self.eid.write(out);
        out.write_u8(data.flag);
        data.type_name.write(out, layout)?;
        out.write_u32(data.unknown1);
        out.write_u32(data.unknown2);
        out.write_u32(data.variables.len() as u32);
        data.variables.write(out, layout)
    }

    fn body_size(&self, layout: &Layout) -> usize {
        self.data.as_ref().map_or(0, |data| {
            self.eid.byte_size() + 1 + layout.index_bytes() + 12 + data.variables.byte_size(layout)
        })
    }

    fn has_body(&self) -> bool {
        self.data.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructInstanceData {
    pub flag: u8,
    pub variables: Vec<Variable>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructInstance {
    pub eid: Eid,
    pub struct_name: TString,
    pub definition: Link,
    pub data: Option<StructInstanceData>,
}

impl StructInstance {
    pub(crate) fn read_header(c: &mut ByteCursor<'_>, ctx: &mut ReadContext<'_>) -> Result<(Eid, Self)> {
        let eid = ctx.read_eid(c)?;
        let struct_name = ctx.read_tstring(c)?;
        ctx.registry.define(eid, EidKind::StructInstance);
        Ok((
            eid,
            Self {
                eid,
                struct_name,
                definition: Link::Pending,
                data: None,
            },
        ))
    }

    pub(crate) fn read_body(&mut self, c: &mut ByteCursor<'_>, ctx: &mut ReadContext<'_>) -> Result<()> {
        expect_body_eid(c, ctx, "struct instance body", self.eid)?;
        let flag = c.read_u8()?;
        let count = c.read_u32()? as usize;
        let variables = read_variables(c, ctx, count)?;
        self.data = Some(StructInstanceData { flag, variables });
        Ok(())
    }
}

impl Instance for StructInstance {
    const TABLE: &'static str = "struct instances";

    fn eid(&self) -> Eid {
        self.eid
    }

    fn write_header(&self, out: &mut ByteSink, layout: &Layout) -> Result<()> {
        self.eid.write(out);
        self.struct_name.write(out, layout)
    }

    fn header_size(&self, layout: &Layout) -> usize {
        self.eid.byte_size() + layout.index_bytes()
    }

    fn write_body(&self, out: &mut ByteSink, layout: &Layout) -> Result<()> {
        let data = self.data.as_ref().ok_or(Error::Truncated)?;
        self.eid.write(out);
        out.write_u8(data.flag);
        out.write_u32(data.variables.len() as u32);
        data.variables.write(out, layout)
    }

    fn body_size(&self, layout: &Layout) -> usize {
        self.data.as_ref().map_or(0, |data| {
            self.eid.byte_size() + 1 + 4 + data.variables.byte_size(layout)
        })
    }

    fn has_body(&self) -> bool {
        self.data.is_some()
    }
}

/// A VM array. The header fixes the element type and length; the body is
/// exactly `length` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayInfo {
    pub eid: Eid,
    pub element_type: VarType,
    /// Present for arrays of refs and structs.
    pub type_name: Option<TString>,
    pub length: u32,
    pub data: Option<Vec<Variable>>,
}

impl ArrayInfo {
    pub(crate) fn read_header(c: &mut ByteCursor<'_>, ctx: &mut ReadContext<'_>) -> Result<(Eid, Self)> {
        let eid = ctx.read_eid(c)?;
        let element_type = VarType::read(c)?;
        let type_name = if element_type.has_type_name() {
            Some(ctx.read_tstring(c)?)
        } else {
            None
        };
        let length = c.read_u32()?;
        ctx.registry.define(eid, EidKind::Array);
        Ok((
            eid,
            Self {
                eid,
                element_type,
                type_name,
                length,
                data: None,
            },
        ))
    }

    pub(crate) fn read_body(&mut self, c: &mut ByteCursor<'_>, ctx: &mut ReadContext<'_>) -> Result<()> {
        expect_body_eid(c, ctx, "array body", self.eid)?;
        self.data = Some(read_variables(c, ctx, self.length as usize)?);
        Ok(())
    }

    pub fn elements(&self) -> &[Variable] {
        self.data.as_deref().unwrap_or(&[])
    }
}

impl Instance for ArrayInfo {
    const TABLE: &'static str = "arrays";

    fn eid(&self) -> Eid {
        self.eid
    }

    fn write_header(&self, out: &mut ByteSink, layout: &Layout) -> Result<()> {
        self.eid.write(out);
        out.write_u8(self.element_type.code());
        if let Some(t) = self.type_name {
            t.write(out, layout)?;
        }
        let length = self.data.as_ref().map_or(self.length, |d| d.len() as u32);
        out.write_u32(length);
        Ok(())
    }

    fn header_size(&self, layout: &Layout) -> usize {
        self.eid.byte_size() + 1 + self.type_name.map_or(0, |_| layout.index_bytes()) + 4
    }

    fn write_body(&self, out: &mut ByteSink, layout: &Layout) -> Result<()> {
        let data = self.data.as_ref().ok_or(Error::Truncated)?;
        self.eid.write(out);
        data.write(out, layout)
    }

    fn body_size(&self, layout: &Layout) -> usize {
        self.data
            .as_ref()
            .map_or(0, |data| self.eid.byte_size() + data.byte_size(layout))
    }

    fn has_body(&self) -> bool {
        self.data.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::game::Game;
    use crate::papyrus::strings::StringTable;
    use crate::registry::{IdRegistry, Referent};
    use crate::wstring::WString;
    use pretty_assertions::assert_eq;

    fn strings() -> StringTable {
        let mut t = StringTable::new();
        t.intern(WString::from("Foo"));
        t
    }

    #[test]
    fn script_instance_header_and_body() {
        let strings = strings();
        let mut reg = IdRegistry::new(Game::SkyrimSe.eid_width());
        let mut diagnostics = Diagnostics::new();
        let layout = Layout::new(Game::SkyrimSe);
        let mut ctx = ReadContext::new(layout, &strings, &mut reg, &mut diagnostics);

        // eid 0x100, Foo, bits 0, 0, refid 000001, byte 0
        let header = hex::decode("00010000 0000 0000 0000 000001 00".replace(' ', "")).unwrap();
        // eid 0x100, flag 4, Foo, u32 0, u32 9, one var: ref Foo -> 0x100
        let body = hex::decode("00010000 04 0000 00000000 09000000 01000000 01 0000 00010000".replace(' ', "")).unwrap();

        let mut c = ByteCursor::new(&header);
        let (eid, mut inst) = ScriptInstance::read_header(&mut c, &mut ctx).unwrap();
        assert!(c.is_empty());
        assert_eq!(inst.ref_id.raw(), 1);
        assert_eq!(inst.header_size(&layout), header.len());

        let mut c = ByteCursor::new(&body);
        inst.read_body(&mut c, &mut ctx).unwrap();
        assert!(c.is_empty());
        let data = inst.data.as_ref().unwrap();
        assert_eq!(data.unknown2, Some(9));
        assert_eq!(inst.variables()[0].referent(), Some(Referent::ScriptInstance));
        assert_eq!(inst.variables()[0].eid(), Some(eid));
        assert_eq!(inst.body_size(&layout), body.len());

        let mut out = ByteSink::new();
        inst.write_header(&mut out, &layout).unwrap();
        inst.write_body(&mut out, &layout).unwrap();
        assert_eq!(out.as_slice(), &[header, body].concat()[..]);
    }

    #[test]
    fn body_eid_must_match_header() {
        let strings = strings();
        let mut reg = IdRegistry::new(Game::SkyrimSe.eid_width());
        let mut diagnostics = Diagnostics::new();
        let mut ctx = ReadContext::new(Layout::new(Game::SkyrimSe), &strings, &mut reg, &mut diagnostics);

        let mut c = ByteCursor::new(&[1, 0, 0, 0, 0, 0, 0, 0, 0]);
        let (_, mut arr) = ArrayInfo::read_header(&mut c, &mut ctx).unwrap();
        assert_eq!(arr.element_type, VarType::Null);

        let err = arr.read_body(&mut ByteCursor::new(&[2, 0, 0, 0]), &mut ctx).unwrap_err();
        assert!(matches!(err, Error::Format(FormatError::Mismatch { .. })));
    }

    #[test]
    fn fallout4_extra_byte_follows_bits() {
        let strings = strings();
        let mut reg = IdRegistry::new(Game::Fallout4.eid_width());
        let mut diagnostics = Diagnostics::new();
        let layout = Layout::new(Game::Fallout4);
        let mut ctx = ReadContext::new(layout, &strings, &mut reg, &mut diagnostics);

        let header = hex::decode("0100000000000000 0000 0300 0000 000002 00 07".replace(' ', "")).unwrap();
        let mut c = ByteCursor::new(&header);
        let (_, inst) = ScriptInstance::read_header(&mut c, &mut ctx).unwrap();
        assert!(c.is_empty());
        assert_eq!(inst.extra, Some(7));
        assert_eq!(inst.header_size(&layout), header.len());
        assert!(!inst.has_body());
        assert!(matches!(
            inst.write_body(&mut ByteSink::new(), &layout),
            Err(Error::Truncated)
        ));
    }
}
