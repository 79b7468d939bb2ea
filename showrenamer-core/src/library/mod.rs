//! Library layout: canonical file names, show/season folder resolution, the
//! rename/move executor and undo of logged operations.

pub mod executor;
pub mod naming;
pub mod show_directory;
pub mod undo;

pub use executor::{FileExecutor, MoveMethod, Relocation};
pub use naming::{compute_new_name, sanitize_component};
pub use show_directory::{ShowDirectoryResolver, name_variants};
pub use undo::{UndoReport, UndoStep, plan_undo};
