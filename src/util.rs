use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::error;

const WATCHTOWER_CONFIG: &str = "WATCHTOWER_CONFIG";

const DEFAULT_CONFIG: &str = "./watchtower.json";

pub fn get_config_path() -> String {
    std::env::var(WATCHTOWER_CONFIG).unwrap_or_else(|_| DEFAULT_CONFIG.to_string())
}

const WATCHTOWER_LOG: &str = "WATCHTOWER_LOG";

pub fn get_log_level() -> Option<String> {
    std::env::var(WATCHTOWER_LOG).ok()
}

/// Join handle of an actor task, shared by all clones of the actor's handle
///
/// Lets `shutdown` wait until the task has actually exited.
#[derive(Clone, Default)]
pub struct TaskSlot(Arc<Mutex<Option<JoinHandle<()>>>>);

impl TaskSlot {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self(Arc::new(Mutex::new(Some(handle))))
    }

    /// Wait for the task to finish; later calls return immediately
    pub async fn join(&self) {
        let handle = self.0.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
            && !e.is_cancelled()
        {
            error!("actor task panicked: {e}");
        }
    }
}
