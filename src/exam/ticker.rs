use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Registry of per-exam countdown tasks.
///
/// At most one ticker runs per exam id. The ticker task is keyed by the
/// exam, not by any connection, so it keeps counting while clients drop
/// and rejoin. A tick loop that reaches its natural end must not stop
/// itself here; the finalize path calls `stop` afterwards, and aborting
/// an already-finished task is harmless.
pub struct TickerStore {
    active: Arc<RwLock<HashMap<String, JoinHandle<()>>>>,
}

impl TickerStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            active: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Spawn a ticker for an exam unless one is already registered.
    /// Returns false if a ticker for this exam already exists.
    pub async fn start<F>(&self, exam_id: &str, tick: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut active = self.active.write().await;
        if active.contains_key(exam_id) {
            tracing::debug!(exam_id = %exam_id, "Ticker already running, ignoring start");
            return false;
        }

        let handle = tokio::spawn(tick);
        active.insert(exam_id.to_string(), handle);

        tracing::info!(exam_id = %exam_id, "Countdown ticker started");
        true
    }

    /// Abort and forget the ticker for an exam.
    /// Returns false if no ticker was registered.
    pub async fn stop(&self, exam_id: &str) -> bool {
        let handle = {
            let mut active = self.active.write().await;
            active.remove(exam_id)
        };

        match handle {
            Some(handle) => {
                handle.abort();
                tracing::info!(exam_id = %exam_id, "Countdown ticker stopped");
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self, exam_id: &str) -> bool {
        let active = self.active.read().await;
        active.contains_key(exam_id)
    }
}
