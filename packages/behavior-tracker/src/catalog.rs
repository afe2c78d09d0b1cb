//! Active event catalog and its refresh guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::error;

use crate::transport::TrackerTransport;
use crate::types::EventDefinition;

/// Result of a refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Catalog replaced with `count` definitions
    Refreshed { count: usize },
    /// Another refresh was in flight; nothing fetched
    Skipped,
    /// Fetch failed; previous catalog kept
    Failed,
}

/// The current set of active definitions.
///
/// The list is swapped wholesale on every successful fetch, never patched,
/// so a definition removed upstream just stops matching. Readers take an
/// `Arc` snapshot and never hold the lock across an await.
#[derive(Debug, Default)]
pub struct EventCatalog {
    definitions: RwLock<Arc<Vec<EventDefinition>>>,
    refreshing: AtomicBool,
}

impl EventCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<Vec<EventDefinition>> {
        self.definitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn replace(&self, definitions: Vec<EventDefinition>) {
        let mut slot = self
            .definitions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Arc::new(definitions);
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    /// Claim the refresh slot. `None` while another refresh holds it.
    pub fn try_begin_refresh(&self) -> Option<RefreshGuard<'_>> {
        self.refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RefreshGuard { catalog: self })
    }

    /// Refetch and swap. Overlapping calls are dropped, not queued.
    pub async fn refresh(&self, transport: &dyn TrackerTransport) -> RefreshOutcome {
        let Some(_guard) = self.try_begin_refresh() else {
            return RefreshOutcome::Skipped;
        };

        match transport.fetch_active_events().await {
            Ok(definitions) => {
                let count = definitions.len();
                self.replace(definitions);
                RefreshOutcome::Refreshed { count }
            }
            Err(e) => {
                error!(error = %e, status = ?e.status(), "Failed to refresh events");
                RefreshOutcome::Failed
            }
        }
    }
}

/// RAII guard for the refreshing flag.
///
/// Clears the flag on drop, so a refresh future that is cancelled or panics
/// never leaves the catalog stuck in "refreshing".
pub struct RefreshGuard<'a> {
    catalog: &'a EventCatalog,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.catalog.refreshing.store(false, Ordering::Release);
    }
}
