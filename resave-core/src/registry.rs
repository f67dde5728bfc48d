//! Session-scoped identifier interning and resolution.
//!
//! One [`IdRegistry`] exists per load. Every decoder that meets an EID or a
//! RefID goes through it, so the same raw value always produces the same
//! canonical handle, and the header phase of the Papyrus snapshot records in
//! it which table defines each EID. Variables then resolve their referent
//! through [`IdRegistry::resolve`] while they are being constructed.
//!
//! The registry is `!Sync`.

use std::cell::Cell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::marker::PhantomData;

use bitflags::bitflags;
use serde::Serialize;

use crate::cursor::ByteCursor;
use crate::error::FormatError;
use crate::ids::{Eid, EidWidth, RefId};

/// Which table defines an EID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
pub enum EidKind {
    ScriptInstance,
    Reference,
    StructInstance,
    Array,
    ActiveScript,
}

impl EidKind {
    fn flag(self) -> EidKinds {
        match self {
            EidKind::ScriptInstance => EidKinds::SCRIPT_INSTANCE,
            EidKind::Reference => EidKinds::REFERENCE,
            EidKind::StructInstance => EidKinds::STRUCT_INSTANCE,
            EidKind::Array => EidKinds::ARRAY,
            EidKind::ActiveScript => EidKinds::ACTIVE_SCRIPT,
        }
    }
}

bitflags! {
    /// Every table that defines an EID.
    #[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Default)]
    pub struct EidKinds: u8 {
        const SCRIPT_INSTANCE = 1 << 0;
        const REFERENCE = 1 << 1;
        const STRUCT_INSTANCE = 1 << 2;
        const ARRAY = 1 << 3;
        /// Active scripts number their threads apart from the heap tables.
        const ACTIVE_SCRIPT = 1 << 4;
    }
}

/// Where a reference-typed value points, as far as this load can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Referent {
    /// The id was zero: an explicit "none".
    Null,
    /// The id is not defined by any table. Legal, and final.
    Undefined,
    ScriptInstance,
    Reference,
    StructInstance,
    Array,
}

impl Referent {
    pub fn is_found(self) -> bool {
        !matches!(self, Referent::Null | Referent::Undefined)
    }
}

/// Where a RefID has been seen.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefIdUse {
    pub change_form: bool,
    pub papyrus: bool,
    pub global_data: bool,
}

#[derive(Debug, Clone, Copy)]
struct EidEntry {
    eid: Eid,
    defined: EidKinds,
}

#[derive(Debug)]
pub struct IdRegistry {
    width: EidWidth,
    eids: HashMap<(u64, EidWidth), EidEntry>,
    ref_ids: HashMap<u32, (RefId, RefIdUse)>,
    duplicate_definitions: usize,
    _not_sync: PhantomData<Cell<()>>,
}

impl IdRegistry {
    pub fn new(width: EidWidth) -> Self {
        Self {
            width,
            eids: HashMap::new(),
            ref_ids: HashMap::new(),
            duplicate_definitions: 0,
            _not_sync: PhantomData,
        }
    }

    /// Default EID width for this session.
    pub fn eid_width(&self) -> EidWidth {
        self.width
    }

    /// Canonical EID for a raw value at the session width.
    pub fn intern_eid(&mut self, raw: u64) -> Eid {
        self.intern_eid_with(raw, self.width)
    }

    /// Canonical EID for a raw value that is always stored as 32 bits
    /// (active scripts and suspended stacks).
    pub fn intern_eid32(&mut self, raw: u32) -> Eid {
        self.intern_eid_with(raw as u64, EidWidth::W32)
    }

    fn intern_eid_with(&mut self, raw: u64, width: EidWidth) -> Eid {
        self.eids
            .entry((raw, width))
            .or_insert_with(|| EidEntry {
                eid: Eid::new(raw, width),
                defined: EidKinds::empty(),
            })
            .eid
    }

    pub fn read_eid(&mut self, cursor: &mut ByteCursor<'_>) -> Result<Eid, FormatError> {
        let raw = Eid::read_raw(cursor, self.width)?;
        Ok(self.intern_eid(raw))
    }

    pub fn read_eid32(&mut self, cursor: &mut ByteCursor<'_>) -> Result<Eid, FormatError> {
        let raw = cursor.read_u32()?;
        Ok(self.intern_eid32(raw))
    }

    /// Record that `eid` is defined by a table of `kind`. Every defining
    /// table is kept. Returns `false` if a heap table already defined it.
    pub fn define(&mut self, eid: Eid, kind: EidKind) -> bool {
        let entry = self
            .eids
            .entry((eid.raw(), eid.width()))
            .or_insert(EidEntry { eid, defined: EidKinds::empty() });
        let heap = entry.defined - EidKinds::ACTIVE_SCRIPT;
        let fresh = kind == EidKind::ActiveScript || heap.is_empty();
        if !fresh {
            self.duplicate_definitions += 1;
            log::warn!("EID {} defined twice ({:?} then {})", eid, heap, kind);
        }
        entry.defined |= kind.flag();
        fresh
    }

    /// Every table that defines `eid`.
    pub fn kinds_of(&self, eid: Eid) -> EidKinds {
        self.eids
            .get(&(eid.raw(), eid.width()))
            .map_or(EidKinds::empty(), |e| e.defined)
    }

    /// Resolve an object reference: script instance, then world reference,
    /// then struct instance. Zero is [`Referent::Null`]; anything else that is
    /// not defined is [`Referent::Undefined`].
    pub fn resolve(&self, eid: Eid) -> Referent {
        if eid.is_zero() {
            return Referent::Null;
        }
        let kinds = self.kinds_of(eid);
        if kinds.contains(EidKinds::SCRIPT_INSTANCE) {
            Referent::ScriptInstance
        } else if kinds.contains(EidKinds::REFERENCE) {
            Referent::Reference
        } else if kinds.contains(EidKinds::STRUCT_INSTANCE) {
            Referent::StructInstance
        } else {
            Referent::Undefined
        }
    }

    /// Resolve an array handle.
    pub fn resolve_array(&self, eid: Eid) -> Referent {
        if eid.is_zero() {
            return Referent::Null;
        }
        if self.kinds_of(eid).contains(EidKinds::ARRAY) {
            Referent::Array
        } else {
            Referent::Undefined
        }
    }

    pub fn eid_count(&self) -> usize {
        self.eids.len()
    }

    pub fn duplicate_definitions(&self) -> usize {
        self.duplicate_definitions
    }

    /// Canonical RefID for a raw 24-bit value.
    pub fn intern_ref_id(&mut self, raw: u32) -> RefId {
        let r = RefId::new(raw);
        match self.ref_ids.entry(r.raw()) {
            Entry::Occupied(e) => e.get().0,
            Entry::Vacant(e) => e.insert((r, RefIdUse::default())).0,
        }
    }

    pub fn read_ref_id(&mut self, cursor: &mut ByteCursor<'_>) -> Result<RefId, FormatError> {
        let raw = cursor.read_u24_be()?;
        Ok(self.intern_ref_id(raw))
    }

    pub(crate) fn note_ref_id(&mut self, r: RefId, mark: impl FnOnce(&mut RefIdUse)) {
        if let Some((_, uses)) = self.ref_ids.get_mut(&r.raw()) {
            mark(uses);
        }
    }

    pub fn ref_id_use(&self, r: RefId) -> Option<RefIdUse> {
        self.ref_ids.get(&r.raw()).map(|(_, u)| *u)
    }

    pub fn ref_id_count(&self) -> usize {
        self.ref_ids.len()
    }
}
