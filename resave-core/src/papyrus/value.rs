//! Papyrus variables: the tagged values held by instances, arrays and stack
//! frames.

use serde::Serialize;

use crate::cursor::{ByteCursor, ByteSink};
use crate::error::{FormatError, Result};
use crate::ids::Eid;
use crate::layout::{Element, Layout};
use crate::registry::Referent;
use crate::scalar::Real;

use super::context::ReadContext;
use super::strings::{StringTable, TString};

/// Variants may nest; this bounds the recursion on hostile input.
const MAX_VARIANT_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::FromRepr)]
#[repr(u8)]
pub enum VarType {
    Null = 0,
    Ref = 1,
    Str = 2,
    Int = 3,
    Float = 4,
    Bool = 5,
    Variant = 6,
    Struct = 7,
    RefArray = 11,
    StrArray = 12,
    IntArray = 13,
    FloatArray = 14,
    BoolArray = 15,
    VariantArray = 16,
    StructArray = 17,
}

impl VarType {
    pub fn read(c: &mut ByteCursor<'_>) -> std::result::Result<Self, FormatError> {
        let tag = c.read_u8()?;
        Self::from_repr(tag).ok_or(FormatError::IllegalTag {
            kind: "variable type",
            tag: tag as u32,
        })
    }

    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_array(self) -> bool {
        self as u8 >= VarType::RefArray as u8
    }

    /// Whether a value of this type carries a type-name index.
    pub fn has_type_name(self) -> bool {
        matches!(
            self,
            VarType::Ref | VarType::Struct | VarType::RefArray | VarType::StructArray
        )
    }

    /// The array type whose elements are of this type.
    pub fn array_of(self) -> Option<VarType> {
        Some(match self {
            VarType::Ref => VarType::RefArray,
            VarType::Str => VarType::StrArray,
            VarType::Int => VarType::IntArray,
            VarType::Float => VarType::FloatArray,
            VarType::Bool => VarType::BoolArray,
            VarType::Variant => VarType::VariantArray,
            VarType::Struct => VarType::StructArray,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Variable {
    Null,
    /// An object reference. `referent` is what the id resolved to while the
    /// variable was being read.
    Ref {
        type_name: TString,
        eid: Eid,
        referent: Referent,
    },
    Str(TString),
    Int(i32),
    Float(Real),
    /// Stored as 32 bits; the raw value is kept.
    Bool(u32),
    Variant(Box<Variable>),
    Struct {
        type_name: TString,
        eid: Eid,
        referent: Referent,
    },
    /// A handle to an array. `type_name` is present for ref and struct arrays.
    Array {
        ty: VarType,
        type_name: Option<TString>,
        eid: Eid,
        referent: Referent,
    },
}

impl Variable {
    pub fn read(
        c: &mut ByteCursor<'_>,
        ctx: &mut ReadContext<'_>,
    ) -> std::result::Result<Self, FormatError> {
        Self::read_nested(c, ctx, 0)
    }

    fn read_nested(
        c: &mut ByteCursor<'_>,
        ctx: &mut ReadContext<'_>,
        depth: usize,
    ) -> std::result::Result<Self, FormatError> {
        let ty = VarType::read(c)?;
        Ok(match ty {
            VarType::Null => Variable::Null,
            VarType::Ref => {
                let type_name = ctx.read_tstring(c)?;
                let eid = ctx.read_eid(c)?;
                Variable::Ref {
                    type_name,
                    eid,
                    referent: ctx.registry.resolve(eid),
                }
            }
            VarType::Str => Variable::Str(ctx.read_tstring(c)?),
            VarType::Int => Variable::Int(c.read_i32()?),
            VarType::Float => Variable::Float(Real(c.read_f32()?)),
            VarType::Bool => Variable::Bool(c.read_u32()?),
            VarType::Variant => {
                if depth >= MAX_VARIANT_DEPTH {
                    return Err(FormatError::Unsupported {
                        what: "variant nesting depth",
                        value: depth as u64,
                    });
                }
                Variable::Variant(Box::new(Self::read_nested(c, ctx, depth + 1)?))
            }
            VarType::Struct => {
                let type_name = ctx.read_tstring(c)?;
                let eid = ctx.read_eid(c)?;
                Variable::Struct {
                    type_name,
                    eid,
                    referent: ctx.registry.resolve(eid),
                }
            }
            array => {
                let type_name = if array.has_type_name() {
                    Some(ctx.read_tstring(c)?)
                } else {
                    None
                };
                let eid = ctx.read_eid(c)?;
                Variable::Array {
                    ty: array,
                    type_name,
                    eid,
                    referent: ctx.registry.resolve_array(eid),
                }
            }
        })
    }

    pub fn var_type(&self) -> VarType {
        match self {
            Variable::Null => VarType::Null,
            Variable::Ref { .. } => VarType::Ref,
            Variable::Str(_) => VarType::Str,
            Variable::Int(_) => VarType::Int,
            Variable::Float(_) => VarType::Float,
            Variable::Bool(_) => VarType::Bool,
            Variable::Variant(_) => VarType::Variant,
            Variable::Struct { .. } => VarType::Struct,
            Variable::Array { ty, .. } => *ty,
        }
    }

    /// The handle held by a reference-typed variable.
    pub fn eid(&self) -> Option<Eid> {
        match self {
            Variable::Ref { eid, .. } | Variable::Struct { eid, .. } | Variable::Array { eid, .. } => {
                Some(*eid)
            }
            Variable::Variant(inner) => inner.eid(),
            _ => None,
        }
    }

    pub fn referent(&self) -> Option<Referent> {
        match self {
            Variable::Ref { referent, .. }
            | Variable::Struct { referent, .. }
            | Variable::Array { referent, .. } => Some(*referent),
            Variable::Variant(inner) => inner.referent(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Variable::Null)
    }

    /// Human-readable form, with names looked up in `strings`.
    pub fn render(&self, strings: &StringTable) -> String {
        fn handle(eid: &Eid, referent: &Referent) -> String {
            match referent {
                Referent::Undefined => format!("{} (undefined)", eid),
                Referent::Null => "none".to_string(),
                _ => eid.to_string(),
            }
        }

        match self {
            Variable::Null => "null".to_string(),
            Variable::Ref {
                type_name,
                eid,
                referent,
            } => format!("({}) {}", strings.text(*type_name), handle(eid, referent)),
            Variable::Str(s) => format!("{:?}", strings.text(*s)),
            Variable::Int(v) => v.to_string(),
            Variable::Float(v) => v.to_string(),
            Variable::Bool(v) => (*v != 0).to_string(),
            Variable::Variant(inner) => format!("variant[{}]", inner.render(strings)),
            Variable::Struct {
                type_name,
                eid,
                referent,
            } => format!("struct ({}) {}", strings.text(*type_name), handle(eid, referent)),
            Variable::Array {
                ty,
                type_name,
                eid,
                referent,
            } => match type_name {
                Some(t) => format!("{}<{}> {}", ty, strings.text(*t), handle(eid, referent)),
                None => format!("{} {}", ty, handle(eid, referent)),
            },
        }
    }
}

impl Element for Variable {
    fn write(&self, out: &mut ByteSink, layout: &Layout) -> Result<()> {
        out.write_u8(self.var_type().code());
        match self {
            Variable::Null => {}
            Variable::Ref { type_name, eid, .. } | Variable::Struct { type_name, eid, .. } => {
                type_name.write(out, layout)?;
                eid.write(out);
            }
            Variable::Str(s) => s.write(out, layout)?,
            Variable::Int(v) => out.write_i32(*v),
            Variable::Float(v) => out.write_f32(v.0),
            Variable::Bool(v) => out.write_u32(*v),
            Variable::Variant(inner) => inner.write(out, layout)?,
            Variable::Array { type_name, eid, .. } => {
                if let Some(t) = type_name {
                    t.write(out, layout)?;
                }
                eid.write(out);
            }
        }
        Ok(())
    }

    fn byte_size(&self, layout: &Layout) -> usize {
        1 + match self {
            Variable::Null => 0,
            Variable::Ref { eid, .. } | Variable::Struct { eid, .. } => {
                layout.index_bytes() + eid.byte_size()
            }
            Variable::Str(_) => layout.index_bytes(),
            Variable::Int(_) | Variable::Float(_) | Variable::Bool(_) => 4,
            Variable::Variant(inner) => inner.byte_size(layout),
            Variable::Array { type_name, eid, .. } => {
                type_name.map_or(0, |_| layout.index_bytes()) + eid.byte_size()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::game::Game;
    use crate::registry::{EidKind, IdRegistry};
    use crate::wstring::WString;

    fn strings() -> StringTable {
        let mut t = StringTable::new();
        t.intern(WString::from("Actor"));
        t.intern(WString::from("hello"));
        t
    }

    fn read_all(bytes: &[u8], registry: &mut IdRegistry) -> Vec<Variable> {
        let strings = strings();
        let mut diagnostics = Diagnostics::new();
        let mut ctx = ReadContext::new(Layout::new(Game::SkyrimSe), &strings, registry, &mut diagnostics);
        let mut c = ByteCursor::new(bytes);
        let mut out = Vec::new();
        while !c.is_empty() {
            out.push(Variable::read(&mut c, &mut ctx).unwrap());
        }
        out
    }

    #[test]
    fn scalars_and_sizes() {
        // null, int 5, str #1, float 1.0, bool 1, variant[int 2]
        let bytes = hex::decode("00030500000002010004000080 3f05010000000603 02000000".replace(' ', "")).unwrap();
        let mut reg = IdRegistry::new(Game::SkyrimSe.eid_width());
        let vars = read_all(&bytes, &mut reg);
        assert_eq!(
            vars,
            vec![
                Variable::Null,
                Variable::Int(5),
                Variable::Str(TString::new(1)),
                Variable::Float(Real(1.0)),
                Variable::Bool(1),
                Variable::Variant(Box::new(Variable::Int(2))),
            ]
        );

        let layout = Layout::new(Game::SkyrimSe);
        let mut out = ByteSink::new();
        vars.write(&mut out, &layout).unwrap();
        assert_eq!(out.as_slice(), &bytes[..]);
        assert_eq!(vars.byte_size(&layout), bytes.len());
    }

    #[test]
    fn references_resolve_at_construction() {
        let mut reg = IdRegistry::new(Game::SkyrimSe.eid_width());
        let defined = reg.intern_eid(0x10);
        reg.define(defined, EidKind::ScriptInstance);

        // ref Actor 0x10, ref Actor 0x20, ref Actor 0
        let bytes = hex::decode("010000100000000100002000000001000000000000").unwrap();
        let vars = read_all(&bytes, &mut reg);
        let referents: Vec<_> = vars.iter().map(|v| v.referent().unwrap()).collect();
        assert_eq!(
            referents,
            vec![Referent::ScriptInstance, Referent::Undefined, Referent::Null]
        );
        assert_eq!(vars[1].render(&strings()), "(Actor) 00000020 (undefined)");
    }

    #[test]
    fn arrays_carry_type_name_only_when_typed() {
        let mut reg = IdRegistry::new(Game::SkyrimSe.eid_width());
        // int array 0x30, ref array Actor 0x31
        let bytes = hex::decode("0d300000000b000031000000").unwrap();
        let vars = read_all(&bytes, &mut reg);
        assert!(matches!(vars[0], Variable::Array { ty: VarType::IntArray, type_name: None, .. }));
        assert!(matches!(vars[1], Variable::Array { ty: VarType::RefArray, type_name: Some(_), .. }));
        assert_eq!(vars.byte_size(&Layout::new(Game::SkyrimSe)), bytes.len());
    }

    #[test]
    fn unknown_tag_names_the_tag() {
        let strings = strings();
        let mut reg = IdRegistry::new(Game::SkyrimSe.eid_width());
        let mut diagnostics = Diagnostics::new();
        let mut ctx = ReadContext::new(Layout::new(Game::SkyrimSe), &strings, &mut reg, &mut diagnostics);
        let err = Variable::read(&mut ByteCursor::new(&[9]), &mut ctx).unwrap_err();
        assert_eq!(
            err,
            FormatError::IllegalTag {
                kind: "variable type",
                tag: 9
            }
        );
    }

    #[test]
    fn variant_depth_is_bounded() {
        let strings = strings();
        let mut reg = IdRegistry::new(Game::SkyrimSe.eid_width());
        let mut diagnostics = Diagnostics::new();
        let mut ctx = ReadContext::new(Layout::new(Game::SkyrimSe), &strings, &mut reg, &mut diagnostics);
        let bytes = vec![6u8; 100];
        assert!(matches!(
            Variable::read(&mut ByteCursor::new(&bytes), &mut ctx),
            Err(FormatError::Unsupported { .. })
        ));
    }
}
