//! Views a front end drives: a side-by-side diff and the status tree.

mod diff;
mod status;

pub use diff::{DiffView, open_conflict};
pub use status::{Confirm, StageOutcome, StatusView, StatusViewOptions};

use crate::git::ProcessError;
use crate::linemap::EditError;
use crate::patch::{PatchError, SelectionError};
use crate::status::StatusError;
use error_set::error_set;

error_set! {
    /// Errors from view operations
    ViewError := {
        #[display("Cannot {operation} from this diff")]
        WrongSource { operation: &'static str },
        #[display("Save or discard buffer edits before staging")]
        PendingEdits,
        #[display("Failed to access {path}: {message}")]
        IoFailed { path: String, message: String },
        PatchError(PatchError),
        SelectionError(SelectionError),
        ProcessError(ProcessError),
        EditError(EditError),
        StatusError(StatusError),
    }
}
