//! CLI subcommand implementations.

pub mod profile;
pub mod records;
pub mod status;

use std::sync::Arc;

use tk_core::GlucoseUnit;
use tk_sync::{RecomputeTrigger, SqliteStore, SyncCoordinator};

use crate::engine::{ConfirmFlag, RecomputeMarker};

/// Builds a coordinator over `store` with the local engine and prompt.
///
/// `confirmed` answers the authentication prompt for insulin deletions.
pub fn coordinator(store: &SqliteStore, confirmed: bool) -> SyncCoordinator {
    let engine = Arc::new(RecomputeMarker::new(store.clone()));
    SyncCoordinator::new(
        Arc::new(store.clone()),
        Arc::new(ConfirmFlag(confirmed)),
        Arc::new(RecomputeTrigger::new(engine)),
    )
}

/// Formats a glucose quantity already converted to `unit`.
pub(crate) fn format_glucose(value: f64, unit: GlucoseUnit) -> String {
    match unit {
        GlucoseUnit::MgDl => format!("{value:.0}"),
        GlucoseUnit::MmolL => format!("{value:.1}"),
    }
}
