//! Behavioral event tracker.
//!
//! Client-embedded collection and trigger-matching engine. It learns the
//! operator-defined "trackable events" from the events endpoint, watches the
//! host page for page views and clicks that match them, applies a per-event
//! cooldown and posts matched occurrences to the collect endpoint. Nothing it
//! does can fail the host page: every error ends in a log line.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use behavior_tracker::{BehaviorTracker, BrowserPage, PageGlobals, TrackerOverrides};
//!
//! let page = Arc::new(BrowserPage::open("https://shop.example/")?);
//! let tracker = BehaviorTracker::builder(page.clone())
//!     .globals(PageGlobals::from_env())
//!     .build();
//!
//! tracker.init(TrackerOverrides::new().with_debug(true)).await;
//!
//! // Host router reports navigation
//! page.push_state("/thanks")?;
//! ```
//!
//! # Modules
//!
//! - [`config`] - Configuration resolution (defaults, page globals, overrides)
//! - [`credential`] - Token / user id / session id providers
//! - [`transport`] - HTTP transport for the two endpoints
//! - [`catalog`] - Active event catalog with refresh guard
//! - [`cooldown`] - Per-event cooldown gate
//! - [`matching`] - Wildcard URL matching
//! - [`page`] - Host page abstraction and click targets
//! - [`watchers`] - Page-view and click watchers
//! - [`tracker`] - The engine
//! - [`loader`] - Lazy engine loading
//! - [`testing`] - Mock transport for tests

pub mod catalog;
pub mod config;
pub mod cooldown;
pub mod credential;
pub mod error;
pub mod loader;
pub mod matching;
pub mod page;
pub mod testing;
pub mod tracker;
pub mod transport;
pub mod types;
pub mod watchers;

pub use catalog::{EventCatalog, RefreshOutcome};
pub use config::{CredentialsMode, PageGlobals, TrackerConfig, TrackerOverrides};
pub use cooldown::{Admission, CooldownGate};
pub use credential::Credential;
pub use error::{Result, TrackerError};
pub use loader::{EngineSlot, EngineSource, TrackerLoader};
pub use matching::matches_url;
pub use page::{BrowserPage, ClickTarget, ElementInfo, HostPage, NavigationKind};
pub use tracker::{BehaviorTracker, DeliveryOutcome, TrackerBuilder};
pub use transport::{HttpTransport, TrackerTransport};
pub use types::{
    ClickProperties, EventDefinition, EventId, EventProperties, OutboundEvent, TriggerPayload,
    TriggerType,
};
