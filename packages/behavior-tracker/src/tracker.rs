//! The engine: bootstrap, refresh, dispatch and delivery.
//!
//! ```text
//! init()
//!   ├─► config::resolve()          (globals + call-time overrides)
//!   ├─► transport.fetch_active_events() ─► catalog.replace()
//!   ├─► watchers::page_view::register() ─┐
//!   ├─► watchers::click::register()     ─┤ on trigger
//!   │                                    ▼
//!   │                          dispatch() ─► cooldown ─► transport.deliver()
//!   └─► refresh timer ─► refresh_events() (every auto_refresh)
//! ```
//!
//! One [`BehaviorTracker`] per page. Clones share the same state.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use chrono::Utc;
use reqwest::Url;
use tokio::runtime::Handle;
use tokio::sync::OnceCell;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::catalog::{EventCatalog, RefreshOutcome};
use crate::config::{self, PageGlobals, TrackerConfig, TrackerOverrides};
use crate::cooldown::{Admission, CooldownGate};
use crate::error::{Result, TrackerError};
use crate::page::{ClickTarget, HostPage};
use crate::transport::{HttpTransport, TrackerTransport};
use crate::types::{EventDefinition, EventId, EventProperties, OutboundEvent, TriggerType};
use crate::watchers::{self, click_matches, page_view_matches};

/// What happened to one `send_event` call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// POST accepted by the collect endpoint
    Delivered,
    /// Same id fired inside the cooldown window; nothing sent
    Suppressed,
    /// `init` has not resolved a configuration yet; nothing sent
    NotReady,
}

/// Everything `init` derives from the configuration.
struct Settings {
    config: Arc<TrackerConfig>,
    transport: Arc<dyn TrackerTransport>,
    cooldown: CooldownGate,
    runtime: Handle,
}

struct Inner {
    page: Arc<dyn HostPage>,
    globals: PageGlobals,
    transport: Option<Arc<dyn TrackerTransport>>,
    settings: OnceLock<Settings>,
    ready: OnceCell<bool>,
    initialized: AtomicBool,
    catalog: EventCatalog,
    tasks: TaskTracker,
}

/// Behavioral event tracker bound to one host page.
#[derive(Clone)]
pub struct BehaviorTracker {
    inner: Arc<Inner>,
}

/// Non-owning handle held by page listeners, so the page never keeps the
/// engine alive on its own.
#[derive(Clone)]
pub(crate) struct WeakTracker(Weak<Inner>);

impl WeakTracker {
    pub(crate) fn upgrade(&self) -> Option<BehaviorTracker> {
        self.0.upgrade().map(|inner| BehaviorTracker { inner })
    }
}

/// Builder for [`BehaviorTracker`].
pub struct TrackerBuilder {
    page: Arc<dyn HostPage>,
    globals: PageGlobals,
    transport: Option<Arc<dyn TrackerTransport>>,
}

impl TrackerBuilder {
    /// Page globals feeding the configuration.
    pub fn globals(mut self, globals: PageGlobals) -> Self {
        self.globals = globals;
        self
    }

    /// Use `transport` instead of building an [`HttpTransport`] from config.
    pub fn transport(mut self, transport: Arc<dyn TrackerTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> BehaviorTracker {
        BehaviorTracker {
            inner: Arc::new(Inner {
                page: self.page,
                globals: self.globals,
                transport: self.transport,
                settings: OnceLock::new(),
                ready: OnceCell::new(),
                initialized: AtomicBool::new(false),
                catalog: EventCatalog::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }
}

impl BehaviorTracker {
    pub fn builder(page: Arc<dyn HostPage>) -> TrackerBuilder {
        TrackerBuilder {
            page,
            globals: PageGlobals::default(),
            transport: None,
        }
    }

    /// Tracker with default globals and the HTTP transport.
    pub fn new(page: Arc<dyn HostPage>) -> Self {
        Self::builder(page).build()
    }

    // =========================================================================
    // Bootstrap
    // =========================================================================

    /// Initialize once. Later and concurrent calls wait for the first one and
    /// return its result without fetching or binding again.
    ///
    /// Returns whether the initial catalog fetch succeeded. A failed fetch
    /// still leaves the engine initialized with an empty catalog.
    pub async fn init(&self, overrides: TrackerOverrides) -> bool {
        if let Some(loaded) = self.inner.ready.get() {
            self.log_debug(|| debug!("Tracker already initialized, skipping init"));
            return *loaded;
        }
        *self
            .inner
            .ready
            .get_or_init(|| self.bootstrap(overrides))
            .await
    }

    async fn bootstrap(&self, overrides: TrackerOverrides) -> bool {
        let config = Arc::new(config::resolve(&self.inner.globals, overrides));

        let transport = match self.transport_for(&config) {
            Ok(transport) => transport,
            Err(e) => {
                error!(error = %e, "Failed to initialize tracker transport");
                self.inner.initialized.store(true, Ordering::Release);
                return false;
            }
        };

        let settings = Settings {
            cooldown: CooldownGate::new(config.cooldown),
            config: config.clone(),
            transport,
            runtime: Handle::current(),
        };
        if self.inner.settings.set(settings).is_err() {
            warn!("Tracker settings were already set");
        }

        let loaded = self.fetch_and_replace().await;
        self.inner.initialized.store(true, Ordering::Release);

        watchers::page_view::register(self);
        watchers::click::register(self);

        if !config.auto_refresh.is_zero() {
            self.spawn_refresh_timer(config.auto_refresh);
        }

        self.log_debug(|| {
            info!(
                events = self.inner.catalog.snapshot().len(),
                refresh_ms = config.auto_refresh.as_millis() as u64,
                cooldown_ms = config.cooldown.as_millis() as u64,
                "Behavior tracker initialized"
            )
        });
        loaded
    }

    fn transport_for(&self, config: &TrackerConfig) -> Result<Arc<dyn TrackerTransport>> {
        if let Some(transport) = &self.inner.transport {
            return Ok(transport.clone());
        }

        let location = self.inner.page.location();
        let mut http = HttpTransport::new(config)?.with_page_origin(origin_of(&location));
        if let Some(jar) = self.inner.page.cookie_jar() {
            http = http.with_cookie_jar(jar);
        }
        Ok(Arc::new(http))
    }

    async fn fetch_and_replace(&self) -> bool {
        let Some(settings) = self.settings() else {
            return false;
        };
        match settings.transport.fetch_active_events().await {
            Ok(definitions) => {
                self.log_debug(|| debug!(count = definitions.len(), "Fetched active events"));
                self.inner.catalog.replace(definitions);
                true
            }
            Err(e) => {
                error!(error = %e, status = ?e.status(), "Failed to initialize tracker");
                false
            }
        }
    }

    // Page-lifetime timer. Each tick starts a refresh without waiting for the
    // previous one, so an overlapping tick is dropped by the catalog guard.
    fn spawn_refresh_timer(&self, period: Duration) {
        let Some(settings) = self.settings() else {
            return;
        };
        let weak = self.downgrade();
        let runtime = settings.runtime.clone();

        settings.runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(tracker) = weak.upgrade() else {
                    break;
                };
                runtime.spawn(async move {
                    tracker.refresh_events().await;
                });
            }
        });
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    /// Refetch the catalog unless a refresh is already in flight.
    pub async fn refresh_events(&self) -> RefreshOutcome {
        let Some(settings) = self.settings() else {
            return RefreshOutcome::Skipped;
        };
        let outcome = self.inner.catalog.refresh(settings.transport.as_ref()).await;
        if let RefreshOutcome::Refreshed { count } = outcome {
            self.log_debug(|| debug!(count, "Refreshed active events"));
        }
        outcome
    }

    /// Current catalog snapshot.
    pub fn catalog(&self) -> Arc<Vec<EventDefinition>> {
        self.inner.catalog.snapshot()
    }

    // =========================================================================
    // Triggers
    // =========================================================================

    /// Evaluate page-view definitions against the current location.
    pub fn handle_page_view(&self) {
        let location = self.inner.page.location();
        let catalog = self.inner.catalog.snapshot();
        let matched = page_view_matches(&catalog, &location);
        if matched.is_empty() {
            return;
        }

        let referrer = self.inner.page.referrer();
        for definition in matched {
            self.dispatch(
                definition,
                EventProperties {
                    page_url: location.to_string(),
                    referrer: referrer.clone(),
                    click: None,
                },
            );
        }
    }

    /// Evaluate click definitions against a clicked element.
    pub fn handle_click(&self, target: &dyn ClickTarget) {
        let catalog = self.inner.catalog.snapshot();
        let matched = click_matches(&catalog, target);
        if matched.is_empty() {
            return;
        }

        let page_url = self.inner.page.location().to_string();
        let referrer = self.inner.page.referrer();
        for (definition, click) in matched {
            self.dispatch(
                definition,
                EventProperties {
                    page_url: page_url.clone(),
                    referrer: referrer.clone(),
                    click: Some(click),
                },
            );
        }
    }

    /// Deliver in the background. Errors end here, logged.
    pub fn dispatch(&self, definition: EventDefinition, properties: EventProperties) {
        let tracker = self.clone();
        self.spawn_tracked(async move {
            match tracker.send_event(&definition, properties).await {
                Ok(_) => {}
                Err(TrackerError::MalformedDefinition { event_id }) => {
                    tracker.log_debug(|| debug!(%event_id, "Skip sending event: invalid definition"));
                }
                Err(e) => {
                    error!(event_id = %definition.id, error = %e, "Failed to send behavior event");
                }
            }
        });
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    /// Cooldown-gate, compose and POST one occurrence.
    ///
    /// The cooldown stamp is taken before the request, so a failed delivery
    /// still counts against the window and is never retried.
    pub async fn send_event(
        &self,
        definition: &EventDefinition,
        properties: EventProperties,
    ) -> Result<DeliveryOutcome> {
        let Some(trigger_type) = definition.trigger_type.clone() else {
            return Err(TrackerError::MalformedDefinition {
                event_id: definition.id.clone(),
            });
        };
        let Some(settings) = self.settings() else {
            return Ok(DeliveryOutcome::NotReady);
        };

        if let Admission::CoolingDown { remaining } = settings.cooldown.try_admit(&definition.id) {
            self.log_debug(|| {
                debug!(
                    event_id = %definition.id,
                    remaining_ms = remaining.as_millis() as u64,
                    "Skip sending event due to cooldown"
                )
            });
            return Ok(DeliveryOutcome::Suppressed);
        }

        let event = self.compose(definition, trigger_type, properties, &settings.config).await;
        settings.transport.deliver(&event).await?;

        self.log_debug(|| debug!(event_id = %event.event_id, "Sent behavior event"));
        Ok(DeliveryOutcome::Delivered)
    }

    async fn compose(
        &self,
        definition: &EventDefinition,
        trigger_type: TriggerType,
        properties: EventProperties,
        config: &TrackerConfig,
    ) -> OutboundEvent {
        let page_url = if properties.page_url.is_empty() {
            self.inner.page.location().to_string()
        } else {
            properties.page_url.clone()
        };
        let referrer = properties
            .referrer
            .clone()
            .or_else(|| self.inner.page.referrer());

        OutboundEvent {
            event_id: definition.id.clone(),
            event_name: definition.name.clone(),
            trigger_type,
            occurred_at: Utc::now(),
            page_url,
            referrer,
            user_id: config.user_id_provider.resolve().await,
            session_id: config.session_id_provider.resolve().await,
            properties,
        }
    }

    // =========================================================================
    // State
    // =========================================================================

    /// True once the first catalog fetch attempt has finished.
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    pub fn config(&self) -> Option<Arc<TrackerConfig>> {
        self.settings().map(|s| s.config.clone())
    }

    /// When `id` was last admitted by the cooldown gate.
    pub fn last_fired(&self, id: &EventId) -> Option<Instant> {
        self.settings().and_then(|s| s.cooldown.last_fired(id))
    }

    /// Wait for every in-flight delivery and deferred navigation check,
    /// including work they spawn while being waited on.
    pub async fn flush(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }

    pub(crate) fn page(&self) -> &Arc<dyn HostPage> {
        &self.inner.page
    }

    pub(crate) fn downgrade(&self) -> WeakTracker {
        WeakTracker(Arc::downgrade(&self.inner))
    }

    /// Run `task` on the engine's runtime, tracked by [`flush`](Self::flush).
    /// Safe to call from page callbacks running outside the runtime.
    pub(crate) fn spawn_tracked<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.settings() {
            Some(settings) => {
                self.inner.tasks.spawn_on(task, &settings.runtime);
            }
            None => warn!("Dropping tracker task scheduled before init"),
        }
    }

    fn settings(&self) -> Option<&Settings> {
        self.inner.settings.get()
    }

    fn log_debug(&self, emit: impl FnOnce()) {
        if self.settings().is_some_and(|s| s.config.debug) {
            emit();
        }
    }
}

fn origin_of(location: &Url) -> Url {
    let mut origin = location.clone();
    origin.set_path("/");
    origin.set_query(None);
    origin.set_fragment(None);
    origin
}
