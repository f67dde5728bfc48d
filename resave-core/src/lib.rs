//! Reading and writing of Skyrim (LE/SE) and Fallout 4 savegames.
//!
//! The container, its compressed body, the change forms and the Papyrus VM
//! snapshot are decoded into an editable graph and written back byte for byte.

#![allow(clippy::uninlined_format_args)]

pub mod changeform;
pub mod codec;
pub mod config;
pub mod cursor;
pub mod diagnostics;
pub mod error;
pub mod game;
pub mod ids;
pub mod layout;
pub mod papyrus;
pub mod registry;
pub mod report;
pub mod save;
pub mod scalar;
pub mod wstring;

#[cfg(test)]
#[path = "../tests/common/mod.rs"]
mod test_util;

pub use changeform::{ChangeForm, ChangeFormData, ChangeFormStore, ChangeFormType};
pub use codec::Compression;
pub use config::LoadOptions;
pub use diagnostics::{Diagnostic, Diagnostics};
pub use error::{CodecError, Error, FormatError, PositionMismatch, Result};
pub use game::Game;
pub use ids::{Eid, EidWidth, RefId};
pub use papyrus::Papyrus;
pub use registry::{IdRegistry, Referent};
pub use report::SizeReport;
pub use save::{load, save, LoadResult, SaveFile, SaveResult};
pub use wstring::WString;
