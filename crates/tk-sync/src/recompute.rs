//! Coalescing trigger for the external dosing engine.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::error::EngineError;

/// The external dosing/determination algorithm.
#[async_trait]
pub trait DosingEngine: Send + Sync {
    /// Re-runs the algorithm against the current history.
    async fn recompute(&self) -> Result<(), EngineError>;
}

#[derive(Debug, Default)]
struct Inflight {
    requested: u64,
    abort: Option<AbortHandle>,
}

/// Asks the dosing engine to recompute after history changes.
///
/// A new request supersedes the one in flight instead of queuing behind it,
/// so at most one recompute is pending at any time. Every caller resolves
/// once a recompute started no earlier than its own request has settled.
pub struct RecomputeTrigger {
    engine: Arc<dyn DosingEngine>,
    inflight: Mutex<Inflight>,
    completed: Arc<watch::Sender<u64>>,
}

impl RecomputeTrigger {
    pub fn new(engine: Arc<dyn DosingEngine>) -> Self {
        let (completed, _) = watch::channel(0);
        Self {
            engine,
            inflight: Mutex::new(Inflight::default()),
            completed: Arc::new(completed),
        }
    }

    /// Requests a recompute and waits for it to settle.
    ///
    /// Never fails: engine errors are logged and the call resolves anyway.
    pub async fn request_recompute(&self) {
        let generation = self.start();
        let mut completed = self.completed.subscribe();
        if completed.wait_for(|done| *done >= generation).await.is_err() {
            tracing::warn!(generation, "recompute trigger closed before settling");
        }
    }

    /// The newest generation that has settled.
    pub fn completed_generation(&self) -> u64 {
        *self.completed.borrow()
    }

    fn start(&self) -> u64 {
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        inflight.requested += 1;
        let generation = inflight.requested;
        if let Some(previous) = inflight.abort.take() {
            tracing::debug!(generation, "superseding in-flight recompute");
            previous.abort();
        }

        let engine = Arc::clone(&self.engine);
        let run = tokio::spawn(async move { engine.recompute().await });
        inflight.abort = Some(run.abort_handle());

        let completed = Arc::clone(&self.completed);
        tokio::spawn(async move {
            match run.await {
                Ok(Ok(())) => tracing::debug!(generation, "recompute finished"),
                Ok(Err(err)) => tracing::warn!(generation, error = %err, "recompute failed"),
                Err(err) if err.is_cancelled() => {
                    tracing::debug!(generation, "recompute superseded");
                    return;
                }
                Err(err) => tracing::warn!(generation, error = %err, "recompute panicked"),
            }
            completed.send_if_modified(|done| {
                if generation > *done {
                    *done = generation;
                    true
                } else {
                    false
                }
            });
        });
        generation
    }
}
