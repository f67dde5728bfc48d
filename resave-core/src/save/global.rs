//! Global data tables: typed entries keyed by a numeric type.

use serde::Serialize;

use crate::cursor::{ByteCursor, ByteSink};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{Context, FormatError, PositionMismatch, Result};
use crate::game::Game;
use crate::ids::RefId;
use crate::papyrus::Papyrus;
use crate::registry::IdRegistry;
use crate::scalar::{Real, VsVal};
use crate::wstring::WString;

pub const MISC_STATS: u32 = 0;
pub const GLOBAL_VARIABLES: u32 = 3;
pub const PAPYRUS: u32 = 1001;
pub const ANIM_OBJECTS: u32 = 1002;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MiscStat {
    pub name: WString,
    pub category: u8,
    pub value: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GlobalVariable {
    pub form: RefId,
    pub value: Real,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnimObject {
    pub actor: RefId,
    pub animation: RefId,
    pub flag: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalDataBody {
    MiscStats(Vec<MiscStat>),
    GlobalVariables { count: VsVal, vars: Vec<GlobalVariable> },
    Papyrus(Box<Papyrus>),
    AnimObjects(Vec<AnimObject>),
    /// Types without a decoder, typed bodies that failed to decode, and the
    /// Papyrus block when decoding it was switched off.
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalData {
    pub kind: u32,
    pub body: GlobalDataBody,
}

/// What a global data reader needs from the load.
pub struct GlobalReadContext<'r> {
    pub game: Game,
    pub decode_papyrus: bool,
    pub registry: &'r mut IdRegistry,
    pub diagnostics: &'r mut Diagnostics,
}

fn read_ref_id(c: &mut ByteCursor<'_>, registry: &mut IdRegistry) -> Result<RefId> {
    let r = registry.read_ref_id(c)?;
    registry.note_ref_id(r, |u| u.global_data = true);
    Ok(r)
}

fn decode_typed(kind: u32, data: &[u8], registry: &mut IdRegistry) -> Result<GlobalDataBody> {
    let mut c = ByteCursor::new(data);
    let body = match kind {
        MISC_STATS => {
            let count = c.read_u32()? as usize;
            let mut stats = Vec::with_capacity(count.min(data.len()));
            for _ in 0..count {
                stats.push(MiscStat {
                    name: WString::read(&mut c)?,
                    category: c.read_u8()?,
                    value: c.read_i32()?,
                });
            }
            GlobalDataBody::MiscStats(stats)
        }
        GLOBAL_VARIABLES => {
            let count = VsVal::read(&mut c)?;
            let mut vars = Vec::with_capacity((count.value() as usize).min(data.len()));
            for _ in 0..count.value() {
                vars.push(GlobalVariable {
                    form: read_ref_id(&mut c, registry)?,
                    value: Real(c.read_f32()?),
                });
            }
            GlobalDataBody::GlobalVariables { count, vars }
        }
        ANIM_OBJECTS => {
            let count = c.read_u32()? as usize;
            let mut objects = Vec::with_capacity(count.min(data.len()));
            for _ in 0..count {
                objects.push(AnimObject {
                    actor: read_ref_id(&mut c, registry)?,
                    animation: read_ref_id(&mut c, registry)?,
                    flag: c.read_u8()?,
                });
            }
            GlobalDataBody::AnimObjects(objects)
        }
        _ => return Ok(GlobalDataBody::Raw(data.to_vec())),
    };
    if !c.is_empty() {
        return Err(FormatError::Mismatch {
            what: "global data length",
            expected: data.len().to_string(),
            found: c.offset().to_string(),
        }
        .into());
    }
    Ok(body)
}

impl GlobalData {
    pub fn read(c: &mut ByteCursor<'_>, ctx: &mut GlobalReadContext<'_>) -> Result<Self> {
        let kind = c.read_u32()?;
        let len = c.read_u32()? as usize;
        let data = c.read_bytes(len).with_context(|| format!("global data type {}", kind))?;

        let body = match kind {
            PAPYRUS if ctx.decode_papyrus => GlobalDataBody::Papyrus(Box::new(Papyrus::read(
                data,
                ctx.game,
                ctx.registry,
                ctx.diagnostics,
            ))),
            PAPYRUS => GlobalDataBody::Raw(data.to_vec()),
            _ => decode_typed(kind, data, ctx.registry).unwrap_or_else(|e| {
                ctx.diagnostics.push(Diagnostic::RawFallback {
                    what: format!("global data type {}", kind),
                    reason: e.to_string(),
                });
                GlobalDataBody::Raw(data.to_vec())
            }),
        };
        Ok(Self { kind, body })
    }

    fn payload_size(&self) -> usize {
        match &self.body {
            GlobalDataBody::MiscStats(stats) => {
                4 + stats.iter().map(|s| s.name.byte_size() + 5).sum::<usize>()
            }
            GlobalDataBody::GlobalVariables { count, vars } => {
                count.byte_size() + vars.len() * (RefId::BYTE_SIZE + 4)
            }
            GlobalDataBody::Papyrus(p) => p.byte_size(),
            GlobalDataBody::AnimObjects(objects) => 4 + objects.len() * (2 * RefId::BYTE_SIZE + 1),
            GlobalDataBody::Raw(bytes) => bytes.len(),
        }
    }

    pub fn byte_size(&self) -> usize {
        8 + self.payload_size()
    }

    pub fn write(&self, out: &mut ByteSink) -> Result<()> {
        let len = self.payload_size();
        out.write_u32(self.kind);
        out.write_u32(len as u32);
        let start = out.position();
        match &self.body {
            GlobalDataBody::MiscStats(stats) => {
                out.write_u32(stats.len() as u32);
                for s in stats {
                    s.name.write(out)?;
                    out.write_u8(s.category);
                    out.write_i32(s.value);
                }
            }
            GlobalDataBody::GlobalVariables { count, vars } => {
                if count.value() as usize != vars.len() {
                    VsVal::new(vars.len() as u32)?.write(out);
                } else {
                    count.write(out);
                }
                for v in vars {
                    v.form.write(out);
                    out.write_f32(v.value.0);
                }
            }
            GlobalDataBody::Papyrus(p) => p.write(out).context("papyrus")?,
            GlobalDataBody::AnimObjects(objects) => {
                out.write_u32(objects.len() as u32);
                for o in objects {
                    o.actor.write(out);
                    o.animation.write(out);
                    out.write_u8(o.flag);
                }
            }
            GlobalDataBody::Raw(bytes) => out.write_bytes(bytes),
        }
        let written = out.position() - start;
        if written != len {
            return Err(PositionMismatch {
                section: format!("global data type {}", self.kind),
                offset: start,
                declared: len,
                actual: written,
            }
            .into());
        }
        Ok(())
    }

    pub fn papyrus(&self) -> Option<&Papyrus> {
        match &self.body {
            GlobalDataBody::Papyrus(p) => Some(p),
            _ => None,
        }
    }

    pub fn papyrus_mut(&mut self) -> Option<&mut Papyrus> {
        match &mut self.body {
            GlobalDataBody::Papyrus(p) => Some(p),
            _ => None,
        }
    }

    /// Whether this entry blocks writing the save.
    pub fn is_truncated(&self) -> bool {
        self.papyrus().map_or(false, |p| p.truncated)
    }
}
