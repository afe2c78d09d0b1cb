//! Lazy engine loading.
//!
//! Sits outside the engine: decides whether the engine has to be loaded at
//! all, loads it if needed and initializes it. A load failure leaves the
//! page non-instrumented and is only logged.

use std::sync::OnceLock;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::config::PageGlobals;
use crate::error::Result;
use crate::tracker::BehaviorTracker;

/// Where an engine comes from when the page does not have one yet.
#[async_trait]
pub trait EngineSource: Send + Sync {
    async fn load(&self, script_src: &str) -> Result<BehaviorTracker>;
}

#[async_trait]
impl<F> EngineSource for F
where
    F: Fn(&str) -> Result<BehaviorTracker> + Send + Sync,
{
    async fn load(&self, script_src: &str) -> Result<BehaviorTracker> {
        self(script_src)
    }
}

/// The page's engine slot. At most one engine is ever installed.
#[derive(Default)]
pub struct EngineSlot {
    engine: OnceLock<BehaviorTracker>,
}

impl EngineSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&BehaviorTracker> {
        self.engine.get()
    }

    /// Install `engine` unless one is already there; returns the installed one.
    pub fn install(&self, engine: BehaviorTracker) -> &BehaviorTracker {
        self.engine.get_or_init(|| engine)
    }
}

/// Loads (if needed) and initializes the page's engine.
pub struct TrackerLoader {
    globals: PageGlobals,
}

impl TrackerLoader {
    pub fn new(globals: PageGlobals) -> Self {
        Self { globals }
    }

    pub fn script_src(&self) -> String {
        self.globals.script_src()
    }

    /// Initialize the installed engine, or load one from `source` first.
    /// The page globals seen by the loader are handed to `init` as
    /// call-time overrides. Returns `None` when the engine could not be loaded.
    pub async fn load<'a>(
        &self,
        slot: &'a EngineSlot,
        source: &dyn EngineSource,
    ) -> Option<&'a BehaviorTracker> {
        let overrides = self.globals.as_overrides();
        let verbose = overrides.debug.unwrap_or(false);

        let engine = match slot.get() {
            Some(engine) => {
                if verbose {
                    debug!("Initializing installed tracker");
                }
                engine
            }
            None => {
                let script_src = self.script_src();
                if verbose {
                    debug!(%script_src, "Loading tracker");
                }
                match source.load(&script_src).await {
                    Ok(engine) => slot.install(engine),
                    Err(e) => {
                        error!(%script_src, error = %e, "Failed to load tracker script");
                        return None;
                    }
                }
            }
        };

        engine.init(overrides).await;
        Some(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerOverrides;
    use crate::error::TrackerError;
    use crate::page::BrowserPage;
    use crate::testing::MockTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn engine(mock: &MockTransport) -> BehaviorTracker {
        let page = Arc::new(BrowserPage::open("https://shop.test/").unwrap());
        BehaviorTracker::builder(page)
            .transport(Arc::new(mock.clone()))
            .globals(PageGlobals {
                overrides: TrackerOverrides::new().with_auto_refresh_ms(0),
                ..Default::default()
            })
            .build()
    }

    #[tokio::test]
    async fn test_installed_engine_initialized_without_loading() {
        let mock = MockTransport::new();
        let slot = EngineSlot::new();
        slot.install(engine(&mock));

        let loads = AtomicUsize::new(0);
        let source = |_: &str| -> Result<BehaviorTracker> {
            loads.fetch_add(1, Ordering::SeqCst);
            Err(TrackerError::EngineLoad("should not load".into()))
        };

        let loaded = TrackerLoader::new(PageGlobals::default())
            .load(&slot, &source)
            .await;

        assert!(loaded.unwrap().is_initialized());
        assert_eq!(loads.load(Ordering::SeqCst), 0);
        assert_eq!(mock.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_engine_loaded_from_script_src() {
        let mock = MockTransport::new();
        let slot = EngineSlot::new();
        let requested = std::sync::Mutex::new(Vec::new());
        let source = |src: &str| -> Result<BehaviorTracker> {
            requested.lock().unwrap().push(src.to_string());
            Ok(engine(&mock))
        };
        let globals = PageGlobals {
            script_src: Some("/static/tracker.js".into()),
            ..Default::default()
        };

        let loaded = TrackerLoader::new(globals).load(&slot, &source).await;

        assert!(loaded.is_some());
        assert!(slot.get().unwrap().is_initialized());
        assert_eq!(*requested.lock().unwrap(), vec!["/static/tracker.js".to_string()]);
    }

    #[tokio::test]
    async fn test_installed_engine_picks_up_loader_globals() {
        let mock = MockTransport::new();
        let slot = EngineSlot::new();
        let page = Arc::new(BrowserPage::open("https://shop.test/").unwrap());
        slot.install(
            BehaviorTracker::builder(page)
                .transport(Arc::new(mock.clone()))
                .build(),
        );
        let source = |_: &str| -> Result<BehaviorTracker> {
            Err(TrackerError::EngineLoad("should not load".into()))
        };
        let globals = PageGlobals {
            overrides: TrackerOverrides::new()
                .with_cooldown_ms(42)
                .with_auto_refresh_ms(0),
            api_base: Some("https://api.test".into()),
            ..Default::default()
        };

        let engine = TrackerLoader::new(globals).load(&slot, &source).await.unwrap();

        let config = engine.config().unwrap();
        assert_eq!(config.api_base_url, "https://api.test");
        assert_eq!(config.cooldown, Duration::from_millis(42));
        assert_eq!(config.auto_refresh, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_load_failure_leaves_page_uninstrumented() {
        let slot = EngineSlot::new();
        let source = |_: &str| -> Result<BehaviorTracker> {
            Err(TrackerError::EngineLoad("404".into()))
        };

        let loaded = TrackerLoader::new(PageGlobals::default())
            .load(&slot, &source)
            .await;

        assert!(loaded.is_none());
        assert!(slot.get().is_none());
    }
}
