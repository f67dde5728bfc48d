//! The Papyrus VM heap snapshot stored in global data entry 1001.
//!
//! Decoding runs in a fixed stage order. Every table's headers are read
//! before any body, so that variables met in a body can be resolved against
//! every object the snapshot defines. After each stage the cursor's movement
//! is checked against the size the decoded stage computes for itself.
//!
//! A failed stage never aborts the load: the snapshot keeps everything read
//! up to the failure and is marked `truncated`, which the writer refuses.

pub mod active;
pub mod context;
pub mod definition;
pub mod instance;
pub mod parameter;
pub mod strings;
pub mod table;
pub mod value;

use std::collections::HashSet;

use itertools::Itertools;
use tracing::{instrument, trace};

use crate::cursor::{ByteCursor, ByteSink};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{Context, Error, ListResult, Partial, Result};
use crate::game::Game;
use crate::ids::Eid;
use crate::layout::{Element, Layout};
use crate::registry::IdRegistry;

use self::active::{ActiveScript, FunctionMessage, SuspendedIn, SuspendedStack};
use self::context::ReadContext;
use self::definition::{link_to, resolve_parents, Script, StructDef};
use self::instance::{ArrayInfo, Instance, Reference, ScriptInstance, StructInstance};
use self::strings::{StringTable, TString};
use self::table::{read_bodies, read_list, read_table, Link, OrderedMap};

pub use self::value::{VarType, Variable};

/// The scalars and id lists after the suspended stacks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trailer {
    pub unknown1: u32,
    /// Present when `unknown1` is non-zero.
    pub unknown2: Option<u32>,
    pub unknown_ids: Vec<Eid>,
    pub unbinds: Vec<(Eid, u32)>,
    /// Fallout 4 only.
    pub save_file_version: Option<u16>,
    /// Everything after the last known field.
    pub tail: Vec<u8>,
}

impl Trailer {
    fn byte_size(&self, layout: &Layout) -> usize {
        let eid = layout.eid_bytes();
        4 + self.unknown2.map_or(0, |_| 4)
            + 4
            + self.unknown_ids.len() * eid
            + 4
            + self.unbinds.len() * (eid + 4)
            + self.save_file_version.map_or(0, |_| 2)
            + self.tail.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Papyrus {
    pub game: Game,
    pub header: u16,
    pub strings: StringTable,
    pub scripts: OrderedMap<TString, Script>,
    pub structs: OrderedMap<TString, StructDef>,
    pub script_instances: OrderedMap<Eid, ScriptInstance>,
    pub references: OrderedMap<Eid, Reference>,
    pub struct_instances: OrderedMap<Eid, StructInstance>,
    pub arrays: OrderedMap<Eid, ArrayInfo>,
    pub runtime: u32,
    pub active_scripts: OrderedMap<Eid, ActiveScript>,
    pub function_messages: Vec<FunctionMessage>,
    pub suspended_stacks1: OrderedMap<Eid, SuspendedStack>,
    pub suspended_stacks2: OrderedMap<Eid, SuspendedStack>,
    pub trailer: Trailer,
    /// A stage failed; the tables hold what was read before it.
    pub truncated: bool,
    /// A string index pointed past the string table.
    pub string_table_bug: bool,
    /// Description of the failure that truncated the snapshot.
    pub failure: Option<String>,
}

/// Keep whatever a table reader produced and turn a partial result into a
/// table-tagged error.
fn settle<T>(slot: &mut T, result: ListResult<T>, table: &'static str) -> Result<()> {
    match result {
        Ok(value) => {
            *slot = value;
            Ok(())
        }
        Err(Partial {
            value,
            index,
            total,
            error,
        }) => {
            *slot = value;
            Err(Error::Entry {
                table,
                index,
                total,
                source: Box::new(error),
            })
        }
    }
}

fn table_size<K, V>(map: &OrderedMap<K, V>, layout: &Layout) -> usize
where
    K: Copy + Eq + std::hash::Hash,
    V: Element,
{
    4 + map.values().map(|v| v.byte_size(layout)).sum::<usize>()
}

fn headers_size<K, V>(map: &OrderedMap<K, V>, layout: &Layout) -> usize
where
    K: Copy + Eq + std::hash::Hash,
    V: Instance,
{
    4 + map.values().map(|v| v.header_size(layout)).sum::<usize>()
}

fn bodies_size<K, V>(map: &OrderedMap<K, V>, layout: &Layout) -> usize
where
    K: Copy + Eq + std::hash::Hash,
    V: Instance,
{
    map.values().map(|v| v.body_size(layout)).sum()
}

fn write_table<K, V>(out: &mut ByteSink, layout: &Layout, map: &OrderedMap<K, V>) -> Result<()>
where
    K: Copy + Eq + std::hash::Hash,
    V: Element,
{
    out.write_u32(map.len() as u32);
    for v in map.values() {
        v.write(out, layout)?;
    }
    Ok(())
}

fn write_headers<K, V>(out: &mut ByteSink, layout: &Layout, map: &OrderedMap<K, V>) -> Result<()>
where
    K: Copy + Eq + std::hash::Hash,
    V: Instance,
{
    out.write_u32(map.len() as u32);
    for v in map.values() {
        v.write_header(out, layout)?;
    }
    Ok(())
}

fn write_bodies<K, V>(out: &mut ByteSink, layout: &Layout, map: &OrderedMap<K, V>) -> Result<()>
where
    K: Copy + Eq + std::hash::Hash,
    V: Instance,
{
    for v in map.values() {
        v.write_body(out, layout)?;
    }
    Ok(())
}

fn read_count(c: &mut ByteCursor<'_>, what: &'static str) -> Result<usize> {
    Ok(c.read_u32().context(what)? as usize)
}

impl Papyrus {
    pub fn new(game: Game) -> Self {
        Self {
            game,
            header: 0,
            strings: StringTable::new(),
            scripts: OrderedMap::new(),
            structs: OrderedMap::new(),
            script_instances: OrderedMap::new(),
            references: OrderedMap::new(),
            struct_instances: OrderedMap::new(),
            arrays: OrderedMap::new(),
            runtime: 0,
            active_scripts: OrderedMap::new(),
            function_messages: Vec::new(),
            suspended_stacks1: OrderedMap::new(),
            suspended_stacks2: OrderedMap::new(),
            trailer: Trailer::default(),
            truncated: false,
            string_table_bug: false,
            failure: None,
        }
    }

    /// Decode a snapshot. Never fails outright: a failure leaves a truncated
    /// snapshot holding everything read before it.
    #[instrument(skip_all, level = "debug", fields(game = %game, len = data.len()))]
    pub fn read(
        data: &[u8],
        game: Game,
        registry: &mut IdRegistry,
        diagnostics: &mut Diagnostics,
    ) -> Self {
        let mut snapshot = Self::new(game);
        let mut c = ByteCursor::new(data);
        let result = snapshot.read_stages(&mut c, registry, diagnostics);
        snapshot.link(diagnostics);
        if let Err(e) = result {
            snapshot.fail(e, c.position());
        }
        snapshot
    }

    fn fail(&mut self, e: Error, at: usize) {
        self.truncated = true;
        self.string_table_bug |= e.is_string_table_bug();
        log::error!("papyrus snapshot truncated at 0x{:X}: {}", at, e);
        if self.string_table_bug {
            log::warn!("the save shows the string table bug");
        }
        self.failure = Some(e.to_string());
    }

    /// The layout values in this snapshot are encoded with.
    pub fn layout(&self) -> Layout {
        Layout::new(self.game).with_index_width(self.strings.index_width())
    }

    fn read_stages(
        &mut self,
        c: &mut ByteCursor<'_>,
        registry: &mut IdRegistry,
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        let game = self.game;

        c.set_mark();
        self.header = c.read_u16().context("papyrus header")?;
        c.checkpoint("papyrus header", 2)?;

        self.strings = StringTable::read(c).context("string table")?;
        c.checkpoint("string table", self.strings.byte_size())?;
        trace!(strings = self.strings.len(), large = self.strings.is_large());

        let layout = self.layout();
        let mut ctx = ReadContext::new(layout, &self.strings, registry, diagnostics);

        // definitions
        let n = read_count(c, "script count")?;
        settle(
            &mut self.scripts,
            read_table(c, &mut ctx, "scripts", n, Script::read),
            "scripts",
        )?;
        c.checkpoint("scripts", table_size(&self.scripts, &layout))?;

        if game.has_structs() {
            let n = read_count(c, "struct count")?;
            settle(
                &mut self.structs,
                read_table(c, &mut ctx, "structs", n, StructDef::read),
                "structs",
            )?;
            c.checkpoint("structs", table_size(&self.structs, &layout))?;
        }
        trace!(scripts = self.scripts.len(), structs = self.structs.len());

        // headers
        let n = read_count(c, "script instance count")?;
        settle(
            &mut self.script_instances,
            read_table(c, &mut ctx, ScriptInstance::TABLE, n, ScriptInstance::read_header),
            ScriptInstance::TABLE,
        )?;
        c.checkpoint("script instance headers", headers_size(&self.script_instances, &layout))?;

        let n = read_count(c, "reference count")?;
        settle(
            &mut self.references,
            read_table(c, &mut ctx, Reference::TABLE, n, Reference::read_header),
            Reference::TABLE,
        )?;
        c.checkpoint("reference headers", headers_size(&self.references, &layout))?;

        if game.has_structs() {
            let n = read_count(c, "struct instance count")?;
            settle(
                &mut self.struct_instances,
                read_table(c, &mut ctx, StructInstance::TABLE, n, StructInstance::read_header),
                StructInstance::TABLE,
            )?;
            c.checkpoint("struct instance headers", headers_size(&self.struct_instances, &layout))?;
        }

        let n = read_count(c, "array count")?;
        settle(
            &mut self.arrays,
            read_table(c, &mut ctx, ArrayInfo::TABLE, n, ArrayInfo::read_header),
            ArrayInfo::TABLE,
        )?;
        c.checkpoint("array headers", headers_size(&self.arrays, &layout))?;

        self.runtime = c.read_u32().context("vm runtime")?;
        c.checkpoint("vm runtime", 4)?;

        let n = read_count(c, "active script count")?;
        settle(
            &mut self.active_scripts,
            read_table(c, &mut ctx, ActiveScript::TABLE, n, ActiveScript::read_header),
            ActiveScript::TABLE,
        )?;
        c.checkpoint("active script headers", headers_size(&self.active_scripts, &layout))?;
        trace!(
            script_instances = self.script_instances.len(),
            references = self.references.len(),
            arrays = self.arrays.len(),
            active_scripts = self.active_scripts.len(),
            "headers read"
        );

        // bodies, in header order
        read_bodies(c, &mut ctx, &mut self.script_instances, |c, ctx, _, v| v.read_body(c, ctx))
            .map_err(|p| p.into_error(ScriptInstance::TABLE))?;
        c.checkpoint("script instance bodies", bodies_size(&self.script_instances, &layout))?;

        read_bodies(c, &mut ctx, &mut self.references, |c, ctx, _, v| v.read_body(c, ctx))
            .map_err(|p| p.into_error(Reference::TABLE))?;
        c.checkpoint("reference bodies", bodies_size(&self.references, &layout))?;

        if game.has_structs() {
            read_bodies(c, &mut ctx, &mut self.struct_instances, |c, ctx, _, v| {
                v.read_body(c, ctx)
            })
            .map_err(|p| p.into_error(StructInstance::TABLE))?;
            c.checkpoint("struct instance bodies", bodies_size(&self.struct_instances, &layout))?;
        }

        read_bodies(c, &mut ctx, &mut self.arrays, |c, ctx, _, v| v.read_body(c, ctx))
            .map_err(|p| p.into_error(ArrayInfo::TABLE))?;
        c.checkpoint("array bodies", bodies_size(&self.arrays, &layout))?;

        read_bodies(c, &mut ctx, &mut self.active_scripts, |c, ctx, _, v| v.read_body(c, ctx))
            .map_err(|p| p.into_error(ActiveScript::TABLE))?;
        c.checkpoint("active script bodies", bodies_size(&self.active_scripts, &layout))?;
        trace!("bodies read");

        // queued calls and suspended stacks
        let n = read_count(c, "function message count")?;
        settle(
            &mut self.function_messages,
            read_list(c, &mut ctx, n, FunctionMessage::read),
            "function messages",
        )?;
        c.checkpoint(
            "function messages",
            4 + self.function_messages.byte_size(&layout),
        )?;

        let n = read_count(c, "suspended stack count")?;
        settle(
            &mut self.suspended_stacks1,
            read_table(c, &mut ctx, "suspended stacks 1", n, SuspendedStack::read),
            "suspended stacks 1",
        )?;
        c.checkpoint("suspended stacks 1", table_size(&self.suspended_stacks1, &layout))?;

        let n = read_count(c, "suspended stack count")?;
        settle(
            &mut self.suspended_stacks2,
            read_table(c, &mut ctx, "suspended stacks 2", n, SuspendedStack::read),
            "suspended stacks 2",
        )?;
        c.checkpoint("suspended stacks 2", table_size(&self.suspended_stacks2, &layout))?;

        // trailer
        let t = &mut self.trailer;
        t.unknown1 = c.read_u32().context("trailer")?;
        if t.unknown1 != 0 {
            t.unknown2 = Some(c.read_u32().context("trailer")?);
        }
        let n = read_count(c, "unknown id count")?;
        for _ in 0..n {
            t.unknown_ids.push(ctx.read_eid(c).context("unknown ids")?);
        }
        let n = read_count(c, "unbind count")?;
        for _ in 0..n {
            let eid = ctx.read_eid(c).context("unbind queue")?;
            let v = c.read_u32().context("unbind queue")?;
            t.unbinds.push((eid, v));
        }
        if game.is_fallout4() {
            t.save_file_version = Some(c.read_u16().context("save file version")?);
        }
        t.tail = c.read_rest().to_vec();
        c.checkpoint("trailer", t.byte_size(&layout))?;
        trace!(tail = t.tail.len(), "trailer read");

        Ok(())
    }

    /// Post-load pass: bind definitions by name and park active scripts in
    /// their suspended-stack tables.
    fn link(&mut self, diagnostics: &mut Diagnostics) {
        let mut undefined = HashSet::new();

        resolve_parents(&mut self.scripts, &self.strings, |d| diagnostics.push(d));

        for inst in self.script_instances.values_mut() {
            inst.definition = link_to(&self.scripts, inst.script_name);
            if inst.definition.is_undefined() {
                undefined.insert(("script instances", inst.script_name));
            }
        }
        for r in self.references.values_mut() {
            r.definition = link_to(&self.scripts, r.type_name);
            if r.definition.is_undefined() {
                undefined.insert(("references", r.type_name));
            }
        }
        for s in self.struct_instances.values_mut() {
            s.definition = link_to(&self.structs, s.struct_name);
            if s.definition.is_undefined() {
                undefined.insert(("struct instances", s.struct_name));
            }
        }

        for (table, name) in undefined.into_iter().sorted() {
            diagnostics.push(Diagnostic::UndefinedDefinition {
                table,
                name: self.strings.text(name),
            });
        }

        for (eid, active) in self.active_scripts.iter_mut() {
            active.suspended = if self.suspended_stacks1.contains_key(eid) {
                Some(SuspendedIn::First)
            } else if self.suspended_stacks2.contains_key(eid) {
                Some(SuspendedIn::Second)
            } else {
                None
            };
        }
    }

    /// Serialize the snapshot. Refused when the snapshot is truncated.
    pub fn write(&self, out: &mut ByteSink) -> Result<()> {
        if self.truncated {
            return Err(Error::Truncated);
        }
        let layout = self.layout();
        let game = self.game;

        out.set_mark();
        out.write_u16(self.header);
        out.checkpoint("papyrus header", 2)?;
        self.strings.write(out)?;
        out.checkpoint("string table", self.strings.byte_size())?;

        write_table(out, &layout, &self.scripts)?;
        out.checkpoint("scripts", table_size(&self.scripts, &layout))?;
        if game.has_structs() {
            write_table(out, &layout, &self.structs)?;
            out.checkpoint("structs", table_size(&self.structs, &layout))?;
        }

        write_headers(out, &layout, &self.script_instances)?;
        out.checkpoint("script instance headers", headers_size(&self.script_instances, &layout))?;
        write_headers(out, &layout, &self.references)?;
        out.checkpoint("reference headers", headers_size(&self.references, &layout))?;
        if game.has_structs() {
            write_headers(out, &layout, &self.struct_instances)?;
            out.checkpoint("struct instance headers", headers_size(&self.struct_instances, &layout))?;
        }
        write_headers(out, &layout, &self.arrays)?;
        out.checkpoint("array headers", headers_size(&self.arrays, &layout))?;
        out.write_u32(self.runtime);
        out.checkpoint("vm runtime", 4)?;
        write_headers(out, &layout, &self.active_scripts)?;
        out.checkpoint("active script headers", headers_size(&self.active_scripts, &layout))?;

        write_bodies(out, &layout, &self.script_instances)?;
        out.checkpoint("script instance bodies", bodies_size(&self.script_instances, &layout))?;
        write_bodies(out, &layout, &self.references)?;
        out.checkpoint("reference bodies", bodies_size(&self.references, &layout))?;
        if game.has_structs() {
            write_bodies(out, &layout, &self.struct_instances)?;
            out.checkpoint("struct instance bodies", bodies_size(&self.struct_instances, &layout))?;
        }
        write_bodies(out, &layout, &self.arrays)?;
        out.checkpoint("array bodies", bodies_size(&self.arrays, &layout))?;
        write_bodies(out, &layout, &self.active_scripts)?;
        out.checkpoint("active script bodies", bodies_size(&self.active_scripts, &layout))?;

        out.write_u32(self.function_messages.len() as u32);
        self.function_messages.write(out, &layout)?;
        out.checkpoint(
            "function messages",
            4 + self.function_messages.byte_size(&layout),
        )?;
        write_table(out, &layout, &self.suspended_stacks1)?;
        out.checkpoint("suspended stacks 1", table_size(&self.suspended_stacks1, &layout))?;
        write_table(out, &layout, &self.suspended_stacks2)?;
        out.checkpoint("suspended stacks 2", table_size(&self.suspended_stacks2, &layout))?;

        let t = &self.trailer;
        out.write_u32(t.unknown1);
        if t.unknown1 != 0 {
            out.write_u32(t.unknown2.unwrap_or(0));
        }
        out.write_u32(t.unknown_ids.len() as u32);
        for eid in &t.unknown_ids {
            eid.write(out);
        }
        out.write_u32(t.unbinds.len() as u32);
        for (eid, v) in &t.unbinds {
            eid.write(out);
            out.write_u32(*v);
        }
        if game.is_fallout4() {
            out.write_u16(t.save_file_version.unwrap_or(0));
        }
        out.write_bytes(&t.tail);
        out.checkpoint("trailer", t.byte_size(&layout))?;
        Ok(())
    }

    /// Serialized size, computed from the decoded values.
    pub fn byte_size(&self) -> usize {
        let layout = self.layout();
        let structs = self.game.has_structs();
        2 + self.strings.byte_size()
            + table_size(&self.scripts, &layout)
            + if structs { table_size(&self.structs, &layout) } else { 0 }
            + headers_size(&self.script_instances, &layout)
            + headers_size(&self.references, &layout)
            + if structs { headers_size(&self.struct_instances, &layout) } else { 0 }
            + headers_size(&self.arrays, &layout)
            + 4
            + headers_size(&self.active_scripts, &layout)
            + bodies_size(&self.script_instances, &layout)
            + bodies_size(&self.references, &layout)
            + if structs { bodies_size(&self.struct_instances, &layout) } else { 0 }
            + bodies_size(&self.arrays, &layout)
            + bodies_size(&self.active_scripts, &layout)
            + 4
            + self.function_messages.byte_size(&layout)
            + table_size(&self.suspended_stacks1, &layout)
            + table_size(&self.suspended_stacks2, &layout)
            + self.trailer.byte_size(&layout)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = ByteSink::with_capacity(self.byte_size());
        self.write(&mut out)?;
        Ok(out.into_inner())
    }

    /// Script definition by name.
    pub fn script(&self, name: &str) -> Option<&Script> {
        let key = self.strings.find(name.as_bytes())?;
        self.scripts.get(&key)
    }

    /// Script instances whose definition is missing from the snapshot.
    pub fn unattached_instances(&self) -> impl Iterator<Item = &ScriptInstance> {
        self.script_instances
            .values()
            .filter(|i| i.definition == Link::Undefined)
    }

    /// Number of variables in the snapshot that hold an id no table defines.
    pub fn undefined_reference_count(&self) -> usize {
        let bodies = self
            .script_instances
            .values()
            .flat_map(|i| i.variables().iter())
            .chain(
                self.references
                    .values()
                    .filter_map(|r| r.data.as_ref())
                    .flat_map(|d| d.variables.iter()),
            )
            .chain(
                self.struct_instances
                    .values()
                    .filter_map(|s| s.data.as_ref())
                    .flat_map(|d| d.variables.iter()),
            )
            .chain(self.arrays.values().flat_map(|a| a.elements().iter()));
        bodies
            .filter(|v| v.referent() == Some(crate::registry::Referent::Undefined))
            .count()
    }
}
