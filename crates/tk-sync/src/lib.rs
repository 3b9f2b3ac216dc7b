//! Propagation of treatment records and therapy schedules across stores.
//!
//! The local [`RecordStore`] is authoritative. The remote log and the health
//! store hold denormalized copies and are notified best-effort: their
//! failures are logged and reported, never fatal. After any change to the
//! carbohydrate or insulin history the [`RecomputeTrigger`] asks the dosing
//! engine to run again.
//!
//! ```text
//! ScheduleEditor ──save──▶ RecordStore ──(task)──▶ RemoteLog
//!
//! SyncCoordinator::delete_record
//!   resolve ─▶ authenticate (insulin) ─▶ notify collaborators (parallel)
//!           ─▶ delete locally ─▶ recompute (carb, insulin) ─▶ done
//! ```

mod collaborators;
mod coordinator;
mod editor;
mod error;
mod recompute;
mod store;

pub use collaborators::{
    Authenticator, Collaborator, CollaboratorFailure, Collaborators, HealthStore, RemoteLog,
};
pub use coordinator::{
    AdditionReport, DeletionEvent, DeletionOutcome, DeletionReport, DeletionState, FailureReason,
    SyncCoordinator,
};
pub use editor::{SaveOutcome, ScheduleEditor, UploadHandle, UploadStatus};
pub use error::{AuthError, CollaboratorError, EngineError, StoreError, SyncError};
pub use recompute::{DosingEngine, RecomputeTrigger};
pub use store::{RecordStore, SqliteStore};
