//! Local stand-ins for the dosing engine and the authentication prompt.

use async_trait::async_trait;
use chrono::Utc;
use tk_sync::{AuthError, Authenticator, DosingEngine, EngineError, SqliteStore};

/// Records each recompute request in the database.
///
/// The dosing algorithm itself runs elsewhere; it picks up the
/// `last_recompute_at` marker as its signal to re-read the history.
pub struct RecomputeMarker {
    store: SqliteStore,
}

impl RecomputeMarker {
    pub const fn new(store: SqliteStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DosingEngine for RecomputeMarker {
    async fn recompute(&self) -> Result<(), EngineError> {
        let now = Utc::now();
        self.store
            .with_database(move |db| db.mark_recompute(now))
            .await
            .map_err(|err| EngineError(err.to_string()))
    }
}

/// Authorizes insulin deletions when `--yes` was passed.
pub struct ConfirmFlag(pub bool);

#[async_trait]
impl Authenticator for ConfirmFlag {
    async fn authenticate(&self, reason: &str) -> Result<bool, AuthError> {
        if !self.0 {
            tracing::debug!(reason, "confirmation flag not given");
        }
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn marker_stores_recompute_time() {
        let store = SqliteStore::open_in_memory().unwrap();
        let marker = RecomputeMarker::new(store.clone());

        marker.recompute().await.unwrap();

        let last = store
            .with_database(|db| db.last_recompute())
            .await
            .unwrap();
        assert!(last.is_some());
    }

    #[tokio::test]
    async fn confirm_flag_gates_authentication() {
        assert!(ConfirmFlag(true).authenticate("delete").await.unwrap());
        assert!(!ConfirmFlag(false).authenticate("delete").await.unwrap());
    }
}
