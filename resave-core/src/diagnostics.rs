use serde::Serialize;

/// Something legal but suspicious noticed during a load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Diagnostic {
    /// Two entries of an ordered table share a key; lookups see the later one.
    DuplicateKey {
        table: &'static str,
        key: String,
        index: usize,
    },
    /// An instance or definition names a definition that was never loaded.
    UndefinedDefinition { table: &'static str, name: String },
    /// A typed body could not be decoded and is kept as raw bytes.
    RawFallback { what: String, reason: String },
    /// A change form entry was corrupt; `skipped` bytes were kept verbatim.
    ChangeFormResync {
        index: usize,
        offset: usize,
        skipped: usize,
    },
    /// The stored global data table 3 count differs from the entries present.
    Table3CountBias { stored: u32, actual: u32 },
}

/// Collected diagnostics of one load. Each entry is also logged as it arrives.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, d: Diagnostic) {
        match &d {
            Diagnostic::DuplicateKey { table, key, index } => {
                log::warn!("{}: duplicate key {} at index {}, last one wins", table, key, index)
            }
            Diagnostic::UndefinedDefinition { table, name } => {
                log::debug!("{}: undefined definition {}", table, name)
            }
            Diagnostic::RawFallback { what, reason } => {
                log::warn!("{} kept raw: {}", what, reason)
            }
            Diagnostic::ChangeFormResync { index, offset, skipped } => log::warn!(
                "change form {} at 0x{:X} is corrupt, {} bytes kept verbatim",
                index,
                offset,
                skipped
            ),
            Diagnostic::Table3CountBias { stored, actual } => {
                log::info!("global data table 3 stores count {} for {} entries", stored, actual)
            }
        }
        self.entries.push(d);
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn duplicates(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(|d| matches!(d, Diagnostic::DuplicateKey { .. }))
    }
}
