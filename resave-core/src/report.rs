//! Serialized size of every table of a save.

use rayon::prelude::*;
use serde::Serialize;

use crate::layout::{Element, Layout};
use crate::papyrus::instance::Instance;
use crate::papyrus::table::OrderedMap;
use crate::papyrus::Papyrus;
use crate::save::{GlobalData, SaveFile};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSize {
    pub name: &'static str,
    pub entries: usize,
    pub bytes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SizeReport {
    pub tables: Vec<TableSize>,
}

/// Sum `size` over `items`, in parallel once there are at least `threshold`.
fn sum_sizes<T, F>(items: &[T], threshold: usize, size: F) -> usize
where
    T: Sync,
    F: Fn(&T) -> usize + Sync + Send,
{
    if items.len() >= threshold {
        items.par_iter().map(size).sum()
    } else {
        items.iter().map(size).sum()
    }
}

impl SizeReport {
    fn push(&mut self, name: &'static str, entries: usize, bytes: usize) {
        self.tables.push(TableSize {
            name,
            entries,
            bytes,
        });
    }

    fn push_elements<K, V>(&mut self, name: &'static str, map: &OrderedMap<K, V>, layout: &Layout, threshold: usize)
    where
        K: Copy + Eq + std::hash::Hash + Sync,
        V: Element + Sync,
    {
        let bytes = sum_sizes(map.as_slice(), threshold, |(_, v)| v.byte_size(layout));
        self.push(name, map.len(), bytes);
    }

    fn push_instances<K, V>(&mut self, name: &'static str, map: &OrderedMap<K, V>, layout: &Layout, threshold: usize)
    where
        K: Copy + Eq + std::hash::Hash + Sync,
        V: Instance + Sync,
    {
        let bytes = sum_sizes(map.as_slice(), threshold, |(_, v)| {
            v.header_size(layout) + v.body_size(layout)
        });
        self.push(name, map.len(), bytes);
    }

    pub fn of_papyrus(p: &Papyrus, threshold: usize) -> Self {
        let layout = p.layout();
        let mut report = Self::default();
        report.push("strings", p.strings.len(), p.strings.byte_size());
        report.push_elements("scripts", &p.scripts, &layout, threshold);
        if p.game.has_structs() {
            report.push_elements("structs", &p.structs, &layout, threshold);
        }
        report.push_instances("script instances", &p.script_instances, &layout, threshold);
        report.push_instances("references", &p.references, &layout, threshold);
        if p.game.has_structs() {
            report.push_instances("struct instances", &p.struct_instances, &layout, threshold);
        }
        report.push_instances("arrays", &p.arrays, &layout, threshold);
        report.push_instances("active scripts", &p.active_scripts, &layout, threshold);
        report.push(
            "function messages",
            p.function_messages.len(),
            sum_sizes(&p.function_messages, threshold, |m| m.byte_size(&layout)),
        );
        report.push_elements("suspended stacks 1", &p.suspended_stacks1, &layout, threshold);
        report.push_elements("suspended stacks 2", &p.suspended_stacks2, &layout, threshold);
        report
    }

    pub fn of_save(save: &SaveFile, threshold: usize) -> Self {
        let mut report = Self::default();
        let globals = |entries: &[GlobalData]| sum_sizes(entries, threshold, GlobalData::byte_size);
        report.push("global data table 1", save.table1.len(), globals(&save.table1));
        report.push("global data table 2", save.table2.len(), globals(&save.table2));
        report.push(
            "change forms",
            save.change_forms.len(),
            sum_sizes(save.change_forms.entries(), threshold, |e| e.byte_size()),
        );
        report.push("global data table 3", save.table3.len(), globals(&save.table3));
        if let Some(p) = save.papyrus() {
            report.tables.extend(Self::of_papyrus(p, threshold).tables);
        }
        report
    }

    pub fn get(&self, name: &str) -> Option<&TableSize> {
        self.tables.iter().find(|t| t.name == name)
    }
}
