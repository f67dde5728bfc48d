use crate::cursor::{ByteCursor, ByteSink};
use crate::diagnostics::Diagnostic;
use crate::error::Result;
use crate::layout::{Element, Layout};

use super::context::ReadContext;
use super::strings::{StringTable, TString};
use super::table::{Link, OrderedMap};
use super::value::Variable;

/// A name and a type name. Used for script members and for function
/// parameters and locals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberDesc {
    pub name: TString,
    pub type_name: TString,
}

impl MemberDesc {
    pub fn read(c: &mut ByteCursor<'_>, ctx: &mut ReadContext<'_>) -> Result<Self> {
        Ok(Self {
            name: ctx.read_tstring(c)?,
            type_name: ctx.read_tstring(c)?,
        })
    }
}

impl Element for MemberDesc {
    fn write(&self, out: &mut ByteSink, layout: &Layout) -> Result<()> {
        self.name.write(out, layout)?;
        self.type_name.write(out, layout)
    }

    fn byte_size(&self, layout: &Layout) -> usize {
        2 * layout.index_bytes()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub name: TString,
    pub parent_name: TString,
    pub members: Vec<MemberDesc>,
    pub parent: Link,
}

impl Script {
    pub fn read(c: &mut ByteCursor<'_>, ctx: &mut ReadContext<'_>) -> Result<(TString, Self)> {
        let name = ctx.read_tstring(c)?;
        let parent_name = ctx.read_tstring(c)?;
        let count = c.read_u32()? as usize;
        let mut members = Vec::with_capacity(count.min(c.remaining()));
        for _ in 0..count {
            members.push(MemberDesc::read(c, ctx)?);
        }
        Ok((
            name,
            Self {
                name,
                parent_name,
                members,
                parent: Link::Pending,
            },
        ))
    }
}

impl Element for Script {
    fn write(&self, out: &mut ByteSink, layout: &Layout) -> Result<()> {
        self.name.write(out, layout)?;
        self.parent_name.write(out, layout)?;
        out.write_u32(self.members.len() as u32);
        self.members.write(out, layout)
    }

    fn byte_size(&self, layout: &Layout) -> usize {
        2 * layout.index_bytes() + 4 + self.members.byte_size(layout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructMember {
    pub name: TString,
    pub type_name: TString,
    pub flags: u32,
    pub default: Variable,
    pub doc: TString,
}

impl Element for StructMember {
    fn write(&self, out: &mut ByteSink, layout: &Layout) -> Result<()> {
        self.name.write(out, layout)?;
        self.type_name.write(out, layout)?;
        out.write_u32(self.flags);
        self.default.write(out, layout)?;
        self.doc.write(out, layout)
    }

    fn byte_size(&self, layout: &Layout) -> usize {
        3 * layout.index_bytes() + 4 + self.default.byte_size(layout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDef {
    pub name: TString,
    pub members: Vec<StructMember>,
}

impl StructDef {
    pub fn read(c: &mut ByteCursor<'_>, ctx: &mut ReadContext<'_>) -> Result<(TString, Self)> {
        let name = ctx.read_tstring(c)?;
        let count = c.read_u32()? as usize;
        let mut members = Vec::with_capacity(count.min(c.remaining()));
        for _ in 0..count {
            members.push(StructMember {
                name: ctx.read_tstring(c)?,
                type_name: ctx.read_tstring(c)?,
                flags: c.read_u32()?,
                default: Variable::read(c, ctx)?,
                doc: ctx.read_tstring(c)?,
            });
        }
        Ok((name, Self { name, members }))
    }
}

impl Element for StructDef {
    fn write(&self, out: &mut ByteSink, layout: &Layout) -> Result<()> {
        self.name.write(out, layout)?;
        out.write_u32(self.members.len() as u32);
        self.members.write(out, layout)
    }

    fn byte_size(&self, layout: &Layout) -> usize {
        layout.index_bytes() + 4 + self.members.byte_size(layout)
    }
}

/// Bind every script's parent name to a loaded script, or mark it undefined.
/// Returns how many parents were undefined.
pub fn resolve_parents(
    scripts: &mut OrderedMap<TString, Script>,
    strings: &StringTable,
    mut diagnose: impl FnMut(Diagnostic),
) -> usize {
    let defined: Vec<bool> = scripts
        .values()
        .map(|s| scripts.contains_key(&s.parent_name))
        .collect();

    let mut undefined = 0;
    for (script, parent_defined) in scripts.values_mut().zip(defined) {
        script.parent = if strings.is_blank(script.parent_name) {
            Link::Absent
        } else if parent_defined {
            Link::Defined
        } else {
            undefined += 1;
            diagnose(Diagnostic::UndefinedDefinition {
                table: "scripts",
                name: strings.text(script.parent_name),
            });
            Link::Undefined
        };
    }
    undefined
}

/// Link of a named definition in `map`.
pub(crate) fn link_to<V>(map: &OrderedMap<TString, V>, name: TString) -> Link {
    if map.contains_key(&name) {
        Link::Defined
    } else {
        Link::Undefined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wstring::WString;

    #[test]
    fn parents_resolve_or_flag() {
        let mut strings = StringTable::new();
        let empty = strings.intern(WString::from(""));
        let base = strings.intern(WString::from("Base"));
        let child = strings.intern(WString::from("Child"));
        let orphan = strings.intern(WString::from("Orphan"));
        let missing = strings.intern(WString::from("Missing"));

        let mut scripts = OrderedMap::new();
        for (name, parent_name) in [(base, empty), (child, base), (orphan, missing)] {
            scripts.insert(
                name,
                Script {
                    name,
                    parent_name,
                    members: vec![],
                    parent: Link::Pending,
                },
            );
        }

        let mut diags = vec![];
        let undefined = resolve_parents(&mut scripts, &strings, |d| diags.push(d));
        assert_eq!(undefined, 1);
        assert_eq!(scripts.get(&base).unwrap().parent, Link::Absent);
        assert_eq!(scripts.get(&child).unwrap().parent, Link::Defined);
        assert_eq!(scripts.get(&orphan).unwrap().parent, Link::Undefined);
        assert_eq!(
            diags,
            vec![Diagnostic::UndefinedDefinition {
                table: "scripts",
                name: "Missing".to_string()
            }]
        );
    }
}
