//! Configuration resolution.
//!
//! Precedence, highest first:
//!
//! 1. call-time overrides passed to [`BehaviorTracker::init`](crate::BehaviorTracker::init)
//! 2. the page-global override object ([`PageGlobals::overrides`])
//! 3. individual page-global variables ([`PageGlobals`] fields)
//! 4. built-in defaults
//!
//! Resolution is pure: no network, no page access, no errors. Malformed
//! override shapes fall back to defaults with a warning.

use std::env;
use std::time::Duration;

use dotenvy::dotenv;
use serde::Deserialize;
use tracing::warn;

use crate::credential::Credential;

pub const DEFAULT_EVENTS_ENDPOINT: &str = "/api/v1/events/active";
pub const DEFAULT_COLLECT_ENDPOINT: &str = "/api/v1/behavior/events";
pub const DEFAULT_SCRIPT_SRC: &str = "/js/behavior-tracker.js";
pub const DEFAULT_AUTO_REFRESH_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_COOLDOWN_MS: u64 = 1500;

/// Fetch credentials mode for both endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialsMode {
    /// Send cookies to any origin
    Include,
    /// Send cookies only to the page's own origin
    SameOrigin,
}

impl CredentialsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialsMode::Include => "include",
            CredentialsMode::SameOrigin => "same-origin",
        }
    }
}

/// Fully resolved, immutable engine configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub api_base_url: String,
    pub events_endpoint: String,
    pub collect_endpoint: String,
    /// Zero disables periodic catalog refresh.
    pub auto_refresh: Duration,
    pub cooldown: Duration,
    pub debug: bool,
    pub with_credentials: bool,
    pub token_provider: Credential,
    pub user_id_provider: Credential,
    pub session_id_provider: Credential,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            events_endpoint: DEFAULT_EVENTS_ENDPOINT.to_string(),
            collect_endpoint: DEFAULT_COLLECT_ENDPOINT.to_string(),
            auto_refresh: Duration::from_millis(DEFAULT_AUTO_REFRESH_MS),
            cooldown: Duration::from_millis(DEFAULT_COOLDOWN_MS),
            debug: false,
            with_credentials: true,
            token_provider: Credential::Absent,
            user_id_provider: Credential::Absent,
            session_id_provider: Credential::Absent,
        }
    }
}

impl TrackerConfig {
    pub fn credentials_mode(&self) -> CredentialsMode {
        if self.with_credentials {
            CredentialsMode::Include
        } else {
            CredentialsMode::SameOrigin
        }
    }
}

/// Partial configuration. Used both for call-time overrides and for the
/// page-global override object. Providers cannot come from JSON, so they are
/// skipped by serde and set through the builder methods.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerOverrides {
    pub api_base_url: Option<String>,
    pub collect_endpoint: Option<String>,
    pub events_endpoint: Option<String>,
    pub auto_refresh_ms: Option<u64>,
    pub cooldown_ms: Option<u64>,
    pub debug: Option<bool>,
    pub with_credentials: Option<bool>,
    pub script_src: Option<String>,

    #[serde(skip)]
    pub token_provider: Credential,
    #[serde(skip)]
    pub user_id_provider: Credential,
    #[serde(skip)]
    pub session_id_provider: Credential,
}

impl TrackerOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an override object leniently. Anything that is not a well-formed
    /// object yields empty overrides.
    pub fn from_json(value: &serde_json::Value) -> Self {
        if !value.is_object() {
            warn!(kind = %json_kind(value), "Ignoring tracker overrides: not an object");
            return Self::default();
        }
        match serde_json::from_value(value.clone()) {
            Ok(overrides) => overrides,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed tracker overrides");
                Self::default()
            }
        }
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub fn with_collect_endpoint(mut self, path: impl Into<String>) -> Self {
        self.collect_endpoint = Some(path.into());
        self
    }

    pub fn with_events_endpoint(mut self, path: impl Into<String>) -> Self {
        self.events_endpoint = Some(path.into());
        self
    }

    pub fn with_auto_refresh_ms(mut self, ms: u64) -> Self {
        self.auto_refresh_ms = Some(ms);
        self
    }

    pub fn with_cooldown_ms(mut self, ms: u64) -> Self {
        self.cooldown_ms = Some(ms);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    pub fn with_credentials(mut self, include: bool) -> Self {
        self.with_credentials = Some(include);
        self
    }

    pub fn with_token_provider(mut self, token: Credential) -> Self {
        self.token_provider = token;
        self
    }

    pub fn with_user_id_provider(mut self, user_id: Credential) -> Self {
        self.user_id_provider = user_id;
        self
    }

    pub fn with_session_id_provider(mut self, session_id: Credential) -> Self {
        self.session_id_provider = session_id;
        self
    }
}

/// Page-supplied globals: the override object plus the individual override
/// variables a page template may set.
#[derive(Debug, Clone, Default)]
pub struct PageGlobals {
    pub overrides: TrackerOverrides,
    pub api_base: Option<String>,
    pub collect_endpoint: Option<String>,
    pub token: Option<String>,
    pub token_provider: Credential,
    pub user_id: Option<String>,
    pub user_id_provider: Credential,
    pub session_id: Option<String>,
    pub session_id_provider: Credential,
    pub debug: Option<bool>,
    pub script_src: Option<String>,
}

impl PageGlobals {
    /// Load globals from environment variables (and `.env` if present).
    pub fn from_env() -> Self {
        let _ = dotenv();

        let overrides = env::var("AXON_TRACKER_OVERRIDES")
            .ok()
            .and_then(|raw| match serde_json::from_str::<serde_json::Value>(&raw) {
                Ok(value) => Some(TrackerOverrides::from_json(&value)),
                Err(e) => {
                    warn!(error = %e, "AXON_TRACKER_OVERRIDES is not valid JSON");
                    None
                }
            })
            .unwrap_or_default();

        let debug = env::var("AXON_TRACKER_DEBUG").ok().and_then(|raw| {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => {
                    warn!(value = %raw, "Ignoring unparseable AXON_TRACKER_DEBUG");
                    None
                }
            }
        });

        Self {
            overrides,
            api_base: env::var("AXON_TRACKER_API_BASE").ok(),
            collect_endpoint: env::var("AXON_TRACKER_COLLECT_ENDPOINT").ok(),
            token: env::var("AXON_TRACKER_TOKEN").ok(),
            user_id: env::var("AXON_USER_ID").ok(),
            session_id: env::var("AXON_SESSION_ID").ok(),
            debug,
            script_src: env::var("AXON_TRACKER_SCRIPT_SRC").ok(),
            ..Default::default()
        }
    }

    /// Where the lazy loader fetches the engine from.
    pub fn script_src(&self) -> String {
        first_non_empty([self.overrides.script_src.as_ref(), self.script_src.as_ref()])
            .unwrap_or_else(|| DEFAULT_SCRIPT_SRC.to_string())
    }

    /// All page-level sources folded into one override set. The override
    /// object beats the individual variables and unset stays unset.
    /// `eventsEndpoint` is never taken from the page.
    pub fn as_overrides(&self) -> TrackerOverrides {
        let page = &self.overrides;
        TrackerOverrides {
            api_base_url: first_non_empty([page.api_base_url.as_ref(), self.api_base.as_ref()]),
            collect_endpoint: first_non_empty([
                page.collect_endpoint.as_ref(),
                self.collect_endpoint.as_ref(),
            ]),
            events_endpoint: None,
            auto_refresh_ms: page.auto_refresh_ms,
            cooldown_ms: page.cooldown_ms,
            debug: page.debug.or(self.debug),
            with_credentials: page.with_credentials,
            script_src: first_non_empty([page.script_src.as_ref(), self.script_src.as_ref()]),
            token_provider: page
                .token_provider
                .clone()
                .or(self.token_provider.clone())
                .or(Credential::from(self.token.clone())),
            user_id_provider: page
                .user_id_provider
                .clone()
                .or(self.user_id_provider.clone())
                .or(Credential::from(self.user_id.clone())),
            session_id_provider: page
                .session_id_provider
                .clone()
                .or(self.session_id_provider.clone())
                .or(Credential::from(self.session_id.clone())),
        }
    }
}

/// Merge every configuration source into one [`TrackerConfig`].
pub fn resolve(globals: &PageGlobals, call_time: TrackerOverrides) -> TrackerConfig {
    let defaults = TrackerConfig::default();
    let page = globals.as_overrides();

    TrackerConfig {
        api_base_url: first_non_empty([
            call_time.api_base_url.as_ref(),
            page.api_base_url.as_ref(),
        ])
        .unwrap_or(defaults.api_base_url),
        collect_endpoint: first_non_empty([
            call_time.collect_endpoint.as_ref(),
            page.collect_endpoint.as_ref(),
        ])
        .unwrap_or(defaults.collect_endpoint),
        events_endpoint: first_non_empty([call_time.events_endpoint.as_ref()])
            .unwrap_or(defaults.events_endpoint),
        auto_refresh: call_time
            .auto_refresh_ms
            .or(page.auto_refresh_ms)
            .map(Duration::from_millis)
            .unwrap_or(defaults.auto_refresh),
        cooldown: call_time
            .cooldown_ms
            .or(page.cooldown_ms)
            .map(Duration::from_millis)
            .unwrap_or(defaults.cooldown),
        debug: call_time.debug.or(page.debug).unwrap_or(defaults.debug),
        with_credentials: call_time
            .with_credentials
            .or(page.with_credentials)
            .unwrap_or(defaults.with_credentials),
        token_provider: call_time.token_provider.or(page.token_provider),
        user_id_provider: call_time.user_id_provider.or(page.user_id_provider),
        session_id_provider: call_time.session_id_provider.or(page.session_id_provider),
    }
}

fn first_non_empty<const N: usize>(candidates: [Option<&String>; N]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .find(|s| !s.is_empty())
        .cloned()
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
