//! Opcode operands and the instruction stream of a suspended function.

use serde::Serialize;

use crate::cursor::{ByteCursor, ByteSink};
use crate::error::{FormatError, Result};
use crate::layout::{Element, Layout};
use crate::scalar::Real;

use super::context::ReadContext;
use super::strings::{StringTable, TString};
use super::value::Variable;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Parameter {
    Null,
    Identifier(TString),
    Str(TString),
    Int(i32),
    Float(Real),
    Bool(u8),
    Variant(Box<Variable>),
    Struct(TString),
    Unknown(TString),
}

impl Parameter {
    pub fn read(
        c: &mut ByteCursor<'_>,
        ctx: &mut ReadContext<'_>,
    ) -> std::result::Result<Self, FormatError> {
        let tag = c.read_u8()?;
        Ok(match tag {
            0 => Parameter::Null,
            1 => Parameter::Identifier(ctx.read_tstring(c)?),
            2 => Parameter::Str(ctx.read_tstring(c)?),
            3 => Parameter::Int(c.read_i32()?),
            4 => Parameter::Float(Real(c.read_f32()?)),
            5 => Parameter::Bool(c.read_u8()?),
            6 => Parameter::Variant(Box::new(Variable::read(c, ctx)?)),
            7 => Parameter::Struct(ctx.read_tstring(c)?),
            8 => Parameter::Unknown(ctx.read_tstring(c)?),
            _ => {
                return Err(FormatError::IllegalTag {
                    kind: "parameter type",
                    tag: tag as u32,
                })
            }
        })
    }

    pub fn tag(&self) -> u8 {
        match self {
            Parameter::Null => 0,
            Parameter::Identifier(_) => 1,
            Parameter::Str(_) => 2,
            Parameter::Int(_) => 3,
            Parameter::Float(_) => 4,
            Parameter::Bool(_) => 5,
            Parameter::Variant(_) => 6,
            Parameter::Struct(_) => 7,
            Parameter::Unknown(_) => 8,
        }
    }

    pub fn render(&self, strings: &StringTable) -> String {
        match self {
            Parameter::Null => "none".to_string(),
            Parameter::Identifier(s) | Parameter::Struct(s) | Parameter::Unknown(s) => strings.text(*s),
            Parameter::Str(s) => format!("{:?}", strings.text(*s)),
            Parameter::Int(v) => v.to_string(),
            Parameter::Float(v) => v.to_string(),
            Parameter::Bool(v) => (*v != 0).to_string(),
            Parameter::Variant(v) => v.render(strings),
        }
    }
}

impl Element for Parameter {
    fn write(&self, out: &mut ByteSink, layout: &Layout) -> Result<()> {
        out.write_u8(self.tag());
        match self {
            Parameter::Null => {}
            Parameter::Identifier(s)
            | Parameter::Str(s)
            | Parameter::Struct(s)
            | Parameter::Unknown(s) => s.write(out, layout)?,
            Parameter::Int(v) => out.write_i32(*v),
            Parameter::Float(v) => out.write_f32(v.0),
            Parameter::Bool(v) => out.write_u8(*v),
            Parameter::Variant(v) => v.write(out, layout)?,
        }
        Ok(())
    }

    fn byte_size(&self, layout: &Layout) -> usize {
        1 + match self {
            Parameter::Null => 0,
            Parameter::Identifier(_)
            | Parameter::Str(_)
            | Parameter::Struct(_)
            | Parameter::Unknown(_) => layout.index_bytes(),
            Parameter::Int(_) | Parameter::Float(_) => 4,
            Parameter::Bool(_) => 1,
            Parameter::Variant(v) => v.byte_size(layout),
        }
    }
}

/// How many parameters follow an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    /// `n` fixed parameters, then an integer count parameter, then that many
    /// more.
    Varargs(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::FromRepr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    Iadd,
    Fadd,
    Isub,
    Fsub,
    Imul,
    Fmul,
    Idiv,
    Fdiv,
    Imod,
    Not,
    Ineg,
    Fneg,
    Assign,
    Cast,
    CmpEq,
    CmpLt,
    CmpLe,
    CmpGt,
    CmpGe,
    Jmp,
    Jmpt,
    Jmpf,
    CallMethod,
    CallParent,
    CallStatic,
    Return,
    Strcat,
    PropGet,
    PropSet,
    ArrCreate,
    ArrLength,
    ArrGet,
    ArrSet,
    ArrFindElement,
    ArrRFindElement,
    Is,
    StructCreate,
    StructGet,
    StructSet,
    ArrFindStruct,
    ArrRFindStruct,
    ArrAdd,
    ArrInsert,
    ArrRemoveLast,
    ArrRemove,
    ArrClear,
}

impl Opcode {
    pub fn arity(self) -> Arity {
        use Opcode::*;
        match self {
            Nop => Arity::Fixed(0),
            Iadd | Fadd | Isub | Fsub | Imul | Fmul | Idiv | Fdiv | Imod => Arity::Fixed(3),
            Not | Ineg | Fneg | Assign | Cast => Arity::Fixed(2),
            CmpEq | CmpLt | CmpLe | CmpGt | CmpGe => Arity::Fixed(3),
            Jmp => Arity::Fixed(1),
            Jmpt | Jmpf => Arity::Fixed(2),
            CallMethod => Arity::Varargs(3),
            CallParent => Arity::Varargs(2),
            CallStatic => Arity::Varargs(3),
            Return => Arity::Fixed(1),
            Strcat | PropGet | PropSet => Arity::Fixed(3),
            ArrCreate | ArrLength => Arity::Fixed(2),
            ArrGet | ArrSet => Arity::Fixed(3),
            ArrFindElement | ArrRFindElement => Arity::Fixed(4),
            Is => Arity::Fixed(3),
            StructCreate => Arity::Fixed(1),
            StructGet | StructSet => Arity::Fixed(3),
            ArrFindStruct | ArrRFindStruct => Arity::Fixed(5),
            ArrAdd | ArrInsert => Arity::Fixed(3),
            ArrRemoveLast => Arity::Fixed(1),
            ArrRemove => Arity::Fixed(3),
            ArrClear => Arity::Fixed(1),
        }
    }
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpcodeData {
    pub opcode: Opcode,
    /// Every parameter in stream order, including the count parameter of a
    /// varargs opcode.
    pub params: Vec<Parameter>,
}

impl OpcodeData {
    pub fn read(
        c: &mut ByteCursor<'_>,
        ctx: &mut ReadContext<'_>,
    ) -> std::result::Result<Self, FormatError> {
        let code = c.read_u8()?;
        let opcode = Opcode::from_repr(code).ok_or(FormatError::IllegalTag {
            kind: "opcode",
            tag: code as u32,
        })?;

        let mut params = Vec::new();
        let (fixed, varargs) = match opcode.arity() {
            Arity::Fixed(n) => (n, false),
            Arity::Varargs(n) => (n, true),
        };
        for _ in 0..fixed {
            params.push(Parameter::read(c, ctx)?);
        }
        if varargs {
            let count = Parameter::read(c, ctx)?;
            let n = match count {
                Parameter::Int(n) if n >= 0 => n as usize,
                ref other => {
                    return Err(FormatError::Mismatch {
                        what: "varargs count parameter",
                        expected: "non-negative integer".to_string(),
                        found: format!("{:?}", other),
                    })
                }
            };
            params.push(count);
            for _ in 0..n {
                params.push(Parameter::read(c, ctx)?);
            }
        }
        Ok(Self { opcode, params })
    }

    pub fn render(&self, strings: &StringTable) -> String {
        let mut s = self.opcode.to_string();
        for p in &self.params {
            s.push(' ');
            s.push_str(&p.render(strings));
        }
        s
    }
}

impl Element for OpcodeData {
    fn write(&self, out: &mut ByteSink, layout: &Layout) -> Result<()> {
        out.write_u8(self.opcode as u8);
        self.params.write(out, layout)
    }

    fn byte_size(&self, layout: &Layout) -> usize {
        1 + self.params.byte_size(layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::game::Game;
    use crate::registry::IdRegistry;
    use crate::wstring::WString;

    fn with_ctx<T>(f: impl FnOnce(&mut ReadContext<'_>) -> T) -> T {
        let mut strings = StringTable::new();
        strings.intern(WString::from("self"));
        strings.intern(WString::from("OnInit"));
        strings.intern(WString::from("::temp0"));
        let mut reg = IdRegistry::new(Game::SkyrimSe.eid_width());
        let mut diagnostics = Diagnostics::new();
        let mut ctx = ReadContext::new(Layout::new(Game::SkyrimSe), &strings, &mut reg, &mut diagnostics);
        f(&mut ctx)
    }

    #[test]
    fn opcode_table_matches_codes() {
        assert_eq!(Opcode::from_repr(0), Some(Opcode::Nop));
        assert_eq!(Opcode::from_repr(23), Some(Opcode::CallMethod));
        assert_eq!(Opcode::from_repr(35), Some(Opcode::ArrRFindElement));
        assert_eq!(Opcode::from_repr(46), Some(Opcode::ArrClear));
        assert_eq!(Opcode::from_repr(47), None);
        assert_eq!(Opcode::CallParent.arity(), Arity::Varargs(2));
        assert_eq!(Opcode::ArrFindStruct.arity(), Arity::Fixed(5));
        assert_eq!(Opcode::CmpEq.to_string(), "CMP_EQ");
    }

    #[test]
    fn fixed_arity_instruction() {
        // IADD ::temp0, int 1, int 2
        let bytes = hex::decode("01010200030100000003 02000000".replace(' ', "")).unwrap();
        let op = with_ctx(|ctx| OpcodeData::read(&mut ByteCursor::new(&bytes), ctx).unwrap());
        assert_eq!(op.opcode, Opcode::Iadd);
        assert_eq!(op.params.len(), 3);
        assert_eq!(op.params[1], Parameter::Int(1));

        let layout = Layout::new(Game::SkyrimSe);
        assert_eq!(op.byte_size(&layout), bytes.len());
        let mut out = ByteSink::new();
        op.write(&mut out, &layout).unwrap();
        assert_eq!(out.as_slice(), &bytes[..]);
    }

    #[test]
    fn varargs_instruction_reads_counted_tail() {
        // CALLMETHOD OnInit self ::temp0 [count 2] int 7 bool 1
        let bytes = hex::decode("17 010100 010000 010200 0302000000 0307000000 0501".replace(' ', "")).unwrap();
        let op = with_ctx(|ctx| OpcodeData::read(&mut ByteCursor::new(&bytes), ctx).unwrap());
        assert_eq!(op.opcode, Opcode::CallMethod);
        assert_eq!(op.params.len(), 6);
        assert_eq!(op.params[3], Parameter::Int(2));
        assert_eq!(op.params[5], Parameter::Bool(1));
        assert_eq!(op.byte_size(&Layout::new(Game::SkyrimSe)), bytes.len());
    }

    #[test]
    fn negative_varargs_count_is_rejected() {
        let bytes = hex::decode("18 010000 010100 03ffffffff".replace(' ', "")).unwrap();
        let err = with_ctx(|ctx| OpcodeData::read(&mut ByteCursor::new(&bytes), ctx).unwrap_err());
        assert!(matches!(err, FormatError::Mismatch { .. }));
    }

    #[test]
    fn illegal_parameter_tag() {
        let err = with_ctx(|ctx| Parameter::read(&mut ByteCursor::new(&[9]), ctx).unwrap_err());
        assert_eq!(
            err,
            FormatError::IllegalTag {
                kind: "parameter type",
                tag: 9
            }
        );
    }
}
