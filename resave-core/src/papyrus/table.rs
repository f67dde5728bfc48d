//! Order-preserving keyed tables and the two-phase readers that fill them.

use std::collections::HashMap;
use std::hash::Hash;

use serde::Serialize;

use crate::cursor::ByteCursor;
use crate::diagnostics::Diagnostic;
use crate::error::{ListResult, Partial, Result};
use crate::ids::Eid;

use super::context::ReadContext;
use super::strings::{StringTable, TString};

/// Entries in file order, with a key index for lookups.
///
/// Every entry is kept, so writing reproduces the file even when it has
/// duplicate keys; lookups by key see the last entry with that key.
#[derive(Debug, Clone)]
pub struct OrderedMap<K, V> {
    entries: Vec<(K, V)>,
    index: HashMap<K, usize>,
}

impl<K: Copy + Eq + Hash, V> Default for OrderedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + Eq + Hash, V> OrderedMap<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            entries: Vec::with_capacity(n),
            index: HashMap::with_capacity(n),
        }
    }

    /// Append an entry. Returns the position of an earlier entry with the
    /// same key, which lookups no longer see.
    pub fn insert(&mut self, key: K, value: V) -> Option<usize> {
        let at = self.entries.len();
        self.entries.push((key, value));
        self.index.insert(key, at)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        match self.index.get(key) {
            Some(&i) => Some(&mut self.entries[i].1),
            None => None,
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Remove every entry with `key`.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let at = self.index.remove(key)?;
        let (_, value) = self.entries.remove(at);
        self.entries.retain(|(k, _)| k != key);
        self.reindex();
        Some(value)
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, (k, _)) in self.entries.iter().enumerate() {
            self.index.insert(*k, i);
        }
    }

    /// Number of entries, counting duplicates.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct keys.
    pub fn key_count(&self) -> usize {
        self.index.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.entries.iter_mut().map(|(k, v)| (&*k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.entries.iter_mut().map(|(_, v)| v)
    }

    pub(crate) fn as_slice(&self) -> &[(K, V)] {
        &self.entries
    }
}

impl<K: PartialEq, V: PartialEq> PartialEq for OrderedMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<K: Eq, V: Eq> Eq for OrderedMap<K, V> {}

/// A table key, described for diagnostics.
pub(crate) trait TableKey: Copy + Eq + Hash {
    fn describe(self, strings: &StringTable) -> String;
}

impl TableKey for TString {
    fn describe(self, strings: &StringTable) -> String {
        strings.text(self)
    }
}

impl TableKey for Eid {
    fn describe(self, _: &StringTable) -> String {
        self.to_string()
    }
}

/// A non-owning link from an instance or definition to a definition by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Link {
    /// The resolution pass has not run.
    Pending,
    /// No definition was named (an empty parent name).
    Absent,
    /// The named definition exists in the snapshot.
    Defined,
    /// The named definition does not exist. Legal, but flagged.
    Undefined,
}

impl Link {
    pub fn is_undefined(self) -> bool {
        self == Link::Undefined
    }
}

/// Read `count` keyed entries into an [`OrderedMap`]. Duplicate keys are
/// reported as diagnostics. On failure the entries read so far are returned
/// in a [`Partial`].
pub(crate) fn read_table<K, V>(
    c: &mut ByteCursor<'_>,
    ctx: &mut ReadContext<'_>,
    table: &'static str,
    count: usize,
    mut read_one: impl FnMut(&mut ByteCursor<'_>, &mut ReadContext<'_>) -> Result<(K, V)>,
) -> ListResult<OrderedMap<K, V>>
where
    K: TableKey,
{
    let mut map = OrderedMap::with_capacity(count.min(c.remaining()));
    for index in 0..count {
        match read_one(c, ctx) {
            Ok((key, value)) => {
                if map.insert(key, value).is_some() {
                    let key = key.describe(ctx.strings);
                    ctx.diagnose(Diagnostic::DuplicateKey { table, key, index });
                }
            }
            Err(error) => {
                return Err(Partial {
                    value: map,
                    index,
                    total: count,
                    error,
                })
            }
        }
    }
    Ok(map)
}

/// Run the body phase over every entry of `map` in header order.
pub(crate) fn read_bodies<K, V>(
    c: &mut ByteCursor<'_>,
    ctx: &mut ReadContext<'_>,
    map: &mut OrderedMap<K, V>,
    mut read_body: impl FnMut(&mut ByteCursor<'_>, &mut ReadContext<'_>, &K, &mut V) -> Result<()>,
) -> ListResult<()>
where
    K: TableKey,
{
    let total = map.len();
    for (index, (key, value)) in map.iter_mut().enumerate() {
        if let Err(error) = read_body(c, ctx, key, value) {
            return Err(Partial {
                value: (),
                index,
                total,
                error,
            });
        }
    }
    Ok(())
}

/// Read a u32 count followed by that many unkeyed entries.
pub(crate) fn read_list<T>(
    c: &mut ByteCursor<'_>,
    ctx: &mut ReadContext<'_>,
    count: usize,
    mut read_one: impl FnMut(&mut ByteCursor<'_>, &mut ReadContext<'_>) -> Result<T>,
) -> ListResult<Vec<T>> {
    let mut out = Vec::with_capacity(count.min(c.remaining()));
    for index in 0..count {
        match read_one(c, ctx) {
            Ok(v) => out.push(v),
            Err(error) => {
                return Err(Partial {
                    value: out,
                    index,
                    total: count,
                    error,
                })
            }
        }
    }
    Ok(out)
}
