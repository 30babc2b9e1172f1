//! Scoped persistence of the recorded session

use std::sync::Arc;

use tracing::{error, info};

use crate::config::Mode;
use crate::storage::SessionStore;
use crate::Result;

/// Persists the session exactly once when recording ends
///
/// Call [`finish`](Self::finish) on every graceful path to surface write
/// errors. If the guard is dropped unfinished (early return or panic), the
/// session is persisted from `Drop` and any error is logged.
/// In replay mode the guard is inert.
#[must_use = "dropping the guard persists the session immediately"]
pub struct PersistGuard {
    store: Arc<SessionStore>,
    armed: bool,
}

impl PersistGuard {
    /// Create a guard for `store`, armed only in record mode
    pub fn new(mode: Mode, store: Arc<SessionStore>) -> Self {
        Self {
            store,
            armed: mode.is_record(),
        }
    }

    /// Whether dropping the guard would write the session
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Persist now and disarm
    ///
    /// # Errors
    ///
    /// Returns `Storage` error if the session file cannot be written
    pub fn finish(mut self) -> Result<()> {
        if !std::mem::take(&mut self.armed) {
            return Ok(());
        }

        info!("Saving {} recorded exchanges", self.store.len());
        self.store.persist()
    }
}

impl Drop for PersistGuard {
    fn drop(&mut self) {
        if !std::mem::take(&mut self.armed) {
            return;
        }

        info!("Recording interrupted, saving session");
        if let Err(e) = self.store.persist() {
            error!("Failed to persist session: {}", e);
        }
    }
}
