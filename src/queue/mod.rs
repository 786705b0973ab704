//! Offline submission queue.
//!
//! Checklists completed without connectivity are saved here as
//! `pending_sync` and pushed by the [`Drainer`] once the backend is reachable.

mod drainer;
mod store;
pub mod types;

pub use drainer::{DrainReport, Drainer, RetryPolicy};
pub use store::SubmissionStore;
pub use types::{ChecklistItem, PendingSubmission, SubmissionDraft};
