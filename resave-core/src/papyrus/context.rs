use crate::cursor::ByteCursor;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::FormatError;
use crate::ids::{Eid, RefId};
use crate::layout::Layout;
use crate::registry::IdRegistry;

use super::strings::{StringTable, TString};

/// State threaded through every Papyrus decoder of one load.
pub struct ReadContext<'r> {
    pub layout: Layout,
    pub strings: &'r StringTable,
    pub registry: &'r mut IdRegistry,
    pub diagnostics: &'r mut Diagnostics,
}

impl<'r> ReadContext<'r> {
    pub fn new(
        layout: Layout,
        strings: &'r StringTable,
        registry: &'r mut IdRegistry,
        diagnostics: &'r mut Diagnostics,
    ) -> Self {
        Self {
            layout,
            strings,
            registry,
            diagnostics,
        }
    }

    pub fn read_tstring(&self, c: &mut ByteCursor<'_>) -> Result<TString, FormatError> {
        TString::read(c, self.layout.index_width, self.strings.len())
    }

    /// An EID at the session width.
    pub fn read_eid(&mut self, c: &mut ByteCursor<'_>) -> Result<Eid, FormatError> {
        self.registry.read_eid(c)
    }

    /// An EID stored as 32 bits regardless of the session width.
    pub fn read_eid32(&mut self, c: &mut ByteCursor<'_>) -> Result<Eid, FormatError> {
        self.registry.read_eid32(c)
    }

    pub fn read_ref_id(&mut self, c: &mut ByteCursor<'_>) -> Result<RefId, FormatError> {
        let r = self.registry.read_ref_id(c)?;
        self.registry.note_ref_id(r, |u| u.papyrus = true);
        Ok(r)
    }

    pub fn diagnose(&mut self, d: Diagnostic) {
        self.diagnostics.push(d);
    }
}
