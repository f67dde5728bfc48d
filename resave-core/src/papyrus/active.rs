//! Call-stack state: running threads, their frames, queued function calls and
//! suspended stacks.

use serde::Serialize;

use crate::cursor::{ByteCursor, ByteSink};
use crate::error::{Error, FormatError, Result};
use crate::ids::Eid;
use crate::layout::{Element, Layout};
use crate::registry::EidKind;

use super::context::ReadContext;
use super::definition::MemberDesc;
use super::instance::{expect_body_eid, read_variables, Instance};
use super::parameter::OpcodeData;
use super::strings::TString;
use super::value::Variable;

fn read_members(c: &mut ByteCursor<'_>, ctx: &mut ReadContext<'_>) -> Result<Vec<MemberDesc>> {
    let count = c.read_u16()? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(MemberDesc::read(c, ctx)?);
    }
    Ok(out)
}

fn write_count_u16(out: &mut ByteSink, what: &'static str, len: usize) -> Result<()> {
    let n = u16::try_from(len).map_err(|_| FormatError::TooLong { what, len })?;
    out.write_u16(n);
    Ok(())
}

/// One function activation on a thread's stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub flag: u8,
    pub function_type: u8,
    pub script_name: TString,
    pub base_name: TString,
    pub event: TString,
    /// Present for plain functions without the native flag.
    pub status: Option<TString>,
    pub opcode_major: u8,
    pub opcode_minor: u8,
    pub return_type: TString,
    pub doc: TString,
    pub user_flags: u32,
    pub function_flags: u8,
    pub params: Vec<MemberDesc>,
    pub locals: Vec<MemberDesc>,
    pub code: Vec<OpcodeData>,
    pub instruction_pointer: u32,
    pub owner: Variable,
    pub variables: Vec<Variable>,
}

impl StackFrame {
    pub fn read(c: &mut ByteCursor<'_>, ctx: &mut ReadContext<'_>) -> Result<Self> {
        let variable_count = c.read_u32()? as usize;
        let flag = c.read_u8()?;
        let function_type = c.read_u8()?;
        let script_name = ctx.read_tstring(c)?;
        let base_name = ctx.read_tstring(c)?;
        let event = ctx.read_tstring(c)?;
        let status = if flag & 0x01 == 0 && function_type == 0 {
            Some(ctx.read_tstring(c)?)
        } else {
            None
        };
        let opcode_major = c.read_u8()?;
        let opcode_minor = c.read_u8()?;
        let return_type = ctx.read_tstring(c)?;
        let doc = ctx.read_tstring(c)?;
        let user_flags = c.read_u32()?;
        let function_flags = c.read_u8()?;
        let params = read_members(c, ctx)?;
        let locals = read_members(c, ctx)?;

        let opcode_count = c.read_u16()? as usize;
        let mut code = Vec::with_capacity(opcode_count);
        for i in 0..opcode_count {
            let op = OpcodeData::read(c, ctx).map_err(|e| Error::Entry {
                table: "opcodes",
                index: i,
                total: opcode_count,
                source: Box::new(e.into()),
            })?;
            code.push(op);
        }

        let instruction_pointer = c.read_u32()?;
        let owner = Variable::read(c, ctx)?;
        let variables = read_variables(c, ctx, variable_count)?;

        Ok(Self {
            flag,
            function_type,
            script_name,
            base_name,
            event,
            status,
            opcode_major,
            opcode_minor,
            return_type,
            doc,
            user_flags,
            function_flags,
            params,
            locals,
            code,
            instruction_pointer,
            owner,
            variables,
        })
    }

    pub fn is_native(&self) -> bool {
        self.flag & 0x01 != 0
    }
}

impl Element for StackFrame {
    fn write(&self, out: &mut ByteSink, layout: &Layout) -> Result<()> {
        out.write_u32(self.variables.len() as u32);
        out.write_u8(self.flag);
        out.write_u8(self.function_type);
        self.script_name.write(out, layout)?;
        self.base_name.write(out, layout)?;
        self.event.write(out, layout)?;
        if let Some(s) = self.status {
            s.write(out, layout)?;
        }
        out.write_u8(self.opcode_major);
        out.write_u8(self.opcode_minor);
        self.return_type.write(out, layout)?;
        self.doc.write(out, layout)?;
        out.write_u32(self.user_flags);
        out.write_u8(self.function_flags);
        write_count_u16(out, "function parameters", self.params.len())?;
        self.params.write(out, layout)?;
        write_count_u16(out, "function locals", self.locals.len())?;
        self.locals.write(out, layout)?;
        write_count_u16(out, "function opcodes", self.code.len())?;
        self.code.write(out, layout)?;
        out.write_u32(self.instruction_pointer);
        self.owner.write(out, layout)?;
        self.variables.write(out, layout)
    }

    fn byte_size(&self, layout: &Layout) -> usize {
        let idx = layout.index_bytes();
        4 + 2
            + 3 * idx
            + self.status.map_or(0, |_| idx)
            + 2
            + 2 * idx
            + 4
            + 1
            + 2
            + self.params.byte_size(layout)
            + 2
            + self.locals.byte_size(layout)
            + 2
            + self.code.byte_size(layout)
            + 4
            + self.owner.byte_size(layout)
            + self.variables.byte_size(layout)
    }
}

/// What an active script is currently waiting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    None,
    Index(TString, u32),
    Variable(Variable),
    Both(TString, Variable),
}

impl Selector {
    fn read(c: &mut ByteCursor<'_>, ctx: &mut ReadContext<'_>) -> Result<Self> {
        let tag = c.read_u8()?;
        Ok(match tag {
            0 => Selector::None,
            1 => Selector::Index(ctx.read_tstring(c)?, c.read_u32()?),
            2 => Selector::Variable(Variable::read(c, ctx)?),
            3 => Selector::Both(ctx.read_tstring(c)?, Variable::read(c, ctx)?),
            _ => {
                return Err(FormatError::IllegalTag {
                    kind: "active script selector",
                    tag: tag as u32,
                }
                .into())
            }
        })
    }

    fn tag(&self) -> u8 {
        match self {
            Selector::None => 0,
            Selector::Index(..) => 1,
            Selector::Variable(_) => 2,
            Selector::Both(..) => 3,
        }
    }
}

impl Element for Selector {
    fn write(&self, out: &mut ByteSink, layout: &Layout) -> Result<()> {
        out.write_u8(self.tag());
        match self {
            Selector::None => Ok(()),
            Selector::Index(s, v) => {
                s.write(out, layout)?;
                out.write_u32(*v);
                Ok(())
            }
            Selector::Variable(v) => v.write(out, layout),
            Selector::Both(s, v) => {
                s.write(out, layout)?;
                v.write(out, layout)
            }
        }
    }

    fn byte_size(&self, layout: &Layout) -> usize {
        1 + match self {
            Selector::None => 0,
            Selector::Index(..) => layout.index_bytes() + 4,
            Selector::Variable(v) => v.byte_size(layout),
            Selector::Both(_, v) => layout.index_bytes() + v.byte_size(layout),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveScriptData {
    pub major: u8,
    pub minor: u8,
    pub attached: Variable,
    pub flag: u8,
    pub unknown_byte: u8,
    /// Present when `flag & 1`.
    pub unknown_int: Option<u32>,
    pub selector: Selector,
    pub frames: Vec<StackFrame>,
    /// Present when there is at least one frame.
    pub trailing: Option<u8>,
}

/// Which suspended-stack table an active script is parked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SuspendedIn {
    First,
    Second,
}

/// A running VM thread. Active script ids are always 32 bits wide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveScript {
    pub eid: Eid,
    pub kind: u8,
    pub data: Option<ActiveScriptData>,
    /// Set once both the active scripts and suspended stacks are loaded.
    pub suspended: Option<SuspendedIn>,
}

impl ActiveScript {
    pub(crate) fn read_header(c: &mut ByteCursor<'_>, ctx: &mut ReadContext<'_>) -> Result<(Eid, Self)> {
        let eid = ctx.read_eid32(c)?;
        let kind = c.read_u8()?;
        ctx.registry.define(eid, EidKind::ActiveScript);
        Ok((
            eid,
            Self {
                eid,
                kind,
                data: None,
                suspended: None,
            },
        ))
    }

    pub(crate) fn read_body(&mut self, c: &mut ByteCursor<'_>, ctx: &mut ReadContext<'_>) -> Result<()> {
        expect_body_eid(c, ctx, "active script body", self.eid)?;
        let major = c.read_u8()?;
        let minor = c.read_u8()?;
        let attached = Variable::read(c, ctx)?;
        let flag = c.read_u8()?;
        let unknown_byte = c.read_u8()?;
        let unknown_int = if flag & 0x01 != 0 {
            Some(c.read_u32()?)
        } else {
            None
        };
        let selector = Selector::read(c, ctx)?;

        let frame_count = c.read_u32()? as usize;
        let mut frames = Vec::with_capacity(frame_count.min(c.remaining()));
        for i in 0..frame_count {
            let frame = StackFrame::read(c, ctx).map_err(|e| Error::Entry {
                table: "stack frames",
                index: i,
                total: frame_count,
                source: Box::new(e),
            })?;
            frames.push(frame);
        }
        let trailing = if frame_count > 0 {
            Some(c.read_u8()?)
        } else {
            None
        };

        self.data = Some(ActiveScriptData {
            major,
            minor,
            attached,
            flag,
            unknown_byte,
            unknown_int,
            selector,
            frames,
            trailing,
        });
        Ok(())
    }

    pub fn frames(&self) -> &[StackFrame] {
        self.data.as_ref().map_or(&[], |d| &d.frames)
    }
}

impl Instance for ActiveScript {
    const TABLE: &'static str = "active scripts";

    fn eid(&self) -> Eid {
        self.eid
    }

    fn write_header(&self, out: &mut ByteSink, _layout: &Layout) -> Result<()> {
        self.eid.write(out);
        out.write_u8(self.kind);
        Ok(())
    }

    fn header_size(&self, _layout: &Layout) -> usize {
        self.eid.byte_size() + 1
    }

    fn write_body(&self, out: &mut ByteSink, layout: &Layout) -> Result<()> {
        let data = self.data.as_ref().ok_or(Error::Truncated)?;
        self.eid.write(out);
        out.write_u8(data.major);
        out.write_u8(data.minor);
        data.attached.write(out, layout)?;
        out.write_u8(data.flag);
        out.write_u8(data.unknown_byte);
        if let Some(v) = data.unknown_int {
            out.write_u32(v);
        }
        data.selector.write(out, layout)?;
        out.write_u32(data.frames.len() as u32);
        data.frames.write(out, layout)?;
        if !data.frames.is_empty() {
            out.write_u8(data.trailing.unwrap_or(0));
        }
        Ok(())
    }

    fn body_size(&self, layout: &Layout) -> usize {
        self.data.as_ref().map_or(0, |data| {
            self.eid.byte_size()
                + 2
                + data.attached.byte_size(layout)
                + 2
                + data.unknown_int.map_or(0, |_| 4)
                + data.selector.byte_size(layout)
                + 4
                + data.frames.byte_size(layout)
                + if data.frames.is_empty() { 0 } else { 1 }
        })
    }

    fn has_body(&self) -> bool {
        self.data.is_some()
    }
}

/// A queued call: an event or function waiting to be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageData {
    pub unknown: u8,
    pub script_name: TString,
    pub event: TString,
    pub receiver: Variable,
    pub variables: Vec<Variable>,
}

impl MessageData {
    pub fn read(c: &mut ByteCursor<'_>, ctx: &mut ReadContext<'_>) -> Result<Self> {
        let unknown = c.read_u8()?;
        let script_name = ctx.read_tstring(c)?;
        let event = ctx.read_tstring(c)?;
        let receiver = Variable::read(c, ctx)?;
        let count = c.read_u32()? as usize;
        let variables = read_variables(c, ctx, count)?;
        Ok(Self {
            unknown,
            script_name,
            event,
            receiver,
            variables,
        })
    }
}

impl Element for MessageData {
    fn write(&self, out: &mut ByteSink, layout: &Layout) -> Result<()> {
        out.write_u8(self.unknown);
        self.script_name.write(out, layout)?;
        self.event.write(out, layout)?;
        self.receiver.write(out, layout)?;
        out.write_u32(self.variables.len() as u32);
        self.variables.write(out, layout)
    }

    fn byte_size(&self, layout: &Layout) -> usize {
        1 + 2 * layout.index_bytes()
            + self.receiver.byte_size(layout)
            + 4
            + self.variables.byte_size(layout)
    }
}

fn read_optional_message(c: &mut ByteCursor<'_>, ctx: &mut ReadContext<'_>) -> Result<(u8, Option<MessageData>)> {
    let flag = c.read_u8()?;
    let message = if flag != 0 {
        Some(MessageData::read(c, ctx)?)
    } else {
        None
    };
    Ok((flag, message))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionMessage {
    pub unknown: u8,
    pub eid: Eid,
    pub flag: u8,
    pub message: Option<MessageData>,
}

impl FunctionMessage {
    pub fn read(c: &mut ByteCursor<'_>, ctx: &mut ReadContext<'_>) -> Result<Self> {
        let unknown = c.read_u8()?;
        let eid = ctx.read_eid32(c)?;
        let (flag, message) = read_optional_message(c, ctx)?;
        Ok(Self {
            unknown,
            eid,
            flag,
            message,
        })
    }
}

impl Element for FunctionMessage {
    fn write(&self, out: &mut ByteSink, layout: &Layout) -> Result<()> {
        out.write_u8(self.unknown);
        self.eid.write(out);
        out.write_u8(self.flag);
        if let Some(m) = &self.message {
            m.write(out, layout)?;
        }
        Ok(())
    }

    fn byte_size(&self, layout: &Layout) -> usize {
        1 + self.eid.byte_size() + 1 + self.message.as_ref().map_or(0, |m| m.byte_size(layout))
    }
}

/// A thread parked while it waits on a latent call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspendedStack {
    pub eid: Eid,
    pub flag: u8,
    pub message: Option<MessageData>,
}

impl SuspendedStack {
    pub fn read(c: &mut ByteCursor<'_>, ctx: &mut ReadContext<'_>) -> Result<(Eid, Self)> {
        let eid = ctx.read_eid32(c)?;
        let (flag, message) = read_optional_message(c, ctx)?;
        Ok((eid, Self { eid, flag, message }))
    }
}

impl Element for SuspendedStack {
    fn write(&self, out: &mut ByteSink, layout: &Layout) -> Result<()> {
        self.eid.write(out);
        out.write_u8(self.flag);
        if let Some(m) = &self.message {
            m.write(out, layout)?;
        }
        Ok(())
    }

    fn byte_size(&self, layout: &Layout) -> usize {
        self.eid.byte_size() + 1 + self.message.as_ref().map_or(0, |m| m.byte_size(layout))
    }
}
