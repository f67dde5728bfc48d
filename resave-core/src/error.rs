use std::fmt::Display;

/// An illegal or unexpected value in the byte stream.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("illegal {kind} tag 0x{tag:02X}")]
    IllegalTag { kind: &'static str, tag: u32 },

    #[error("unexpected end of data reading {what} at 0x{offset:X}: need {need} bytes, {remaining} remaining")]
    UnexpectedEof {
        what: &'static str,
        offset: usize,
        need: usize,
        remaining: usize,
    },

    /// A string-table index past the end of the table. This is how the
    /// string-table bug (STB) shows up in a save.
    #[error("string index {index} out of range (table has {len} entries)")]
    StringIndex { index: u32, len: usize },

    #[error("bad magic {found:?}")]
    Magic { found: String },

    #[error("unsupported {what}: {value}")]
    Unsupported { what: &'static str, value: u64 },

    #[error("{what}: expected {expected}, found {found}")]
    Mismatch {
        what: &'static str,
        expected: String,
        found: String,
    },

    #[error("{what} does not fit its length prefix ({len} bytes)")]
    TooLong { what: &'static str, len: usize },
}

/// The accounting invariant was violated: a section consumed a different
/// number of bytes than the format says it should have.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("position mismatch in {section} at 0x{offset:X}: declared {declared} bytes, consumed {actual}")]
pub struct PositionMismatch {
    pub section: String,
    pub offset: usize,
    pub declared: usize,
    pub actual: usize,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("{algorithm} inflate produced {actual} bytes, declared {declared}")]
    SizeMismatch {
        algorithm: &'static str,
        declared: usize,
        actual: usize,
    },

    #[error("{algorithm} stream is corrupt: {message}")]
    Corrupt {
        algorithm: &'static str,
        message: String,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Position(#[from] PositionMismatch),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// One entry of a table failed; the table itself may have been kept partially.
    #[error("{table}: entry {index} of {total} failed: {source}")]
    Entry {
        table: &'static str,
        index: usize,
        total: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },

    #[error("save is truncated, refusing to write it")]
    Truncated,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Binrw(#[from] binrw::Error),
}

impl Error {
    /// The innermost error, with all context and entry wrappers removed.
    pub fn root(&self) -> &Error {
        match self {
            Error::Entry { source, .. } | Error::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_position_mismatch(&self) -> bool {
        matches!(self.root(), Error::Position(_))
    }

    pub fn is_string_table_bug(&self) -> bool {
        matches!(self.root(), Error::Format(FormatError::StringIndex { .. }))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Attach a description of what was being decoded to an error.
pub trait Context<T> {
    fn context<C: Display>(self, context: C) -> Result<T>;

    fn with_context<C: Display, F: FnOnce() -> C>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> Context<T> for std::result::Result<T, E> {
    fn context<C: Display>(self, context: C) -> Result<T> {
        self.map_err(|e| Error::Context {
            context: context.to_string(),
            source: Box::new(e.into()),
        })
    }

    fn with_context<C: Display, F: FnOnce() -> C>(self, f: F) -> Result<T> {
        self.map_err(|e| Error::Context {
            context: f().to_string(),
            source: Box::new(e.into()),
        })
    }
}

/// A table that failed part way through. `value` holds every entry that was
/// read before entry `index` (of `total`) failed with `error`.
#[derive(Debug)]
pub struct Partial<T> {
    pub value: T,
    pub index: usize,
    pub total: usize,
    pub error: Error,
}

impl<T> Partial<T> {
    /// Give up on the partial value and keep the error, tagged with the table name.
    pub fn into_error(self, table: &'static str) -> Error {
        Error::Entry {
            table,
            index: self.index,
            total: self.total,
            source: Box::new(self.error),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Partial<U> {
        Partial {
            value: f(self.value),
            index: self.index,
            total: self.total,
            error: self.error,
        }
    }
}

pub type ListResult<T> = std::result::Result<T, Partial<T>>;
