//! Wire types for the two endpoints the tracker talks to.
//!
//! [`EventDefinition`] comes from the events endpoint and is read-only to the
//! engine. [`OutboundEvent`] is built fresh for every delivery.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

// =============================================================================
// Event Definitions (GET events endpoint)
// =============================================================================

/// Opaque definition identifier. The backend uses numeric ids, but the engine
/// never interprets them, so strings are accepted too and echoed back as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventId {
    Number(i64),
    Text(String),
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventId::Number(n) => write!(f, "{}", n),
            EventId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for EventId {
    fn from(n: i64) -> Self {
        EventId::Number(n)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        EventId::Text(s.to_string())
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        EventId::Text(s)
    }
}

/// Condition kind for a definition.
///
/// Only `PAGE_VIEW` and `CLICK` are evaluated in the page. The backend also
/// knows server-side triggers (e.g. `PURCHASE`); those are kept verbatim so
/// they round-trip, but no watcher ever matches them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TriggerType {
    PageView,
    Click,
    Other(String),
}

impl TriggerType {
    pub fn as_str(&self) -> &str {
        match self {
            TriggerType::PageView => "PAGE_VIEW",
            TriggerType::Click => "CLICK",
            TriggerType::Other(s) => s,
        }
    }
}

impl From<String> for TriggerType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "PAGE_VIEW" => TriggerType::PageView,
            "CLICK" => TriggerType::Click,
            _ => TriggerType::Other(s),
        }
    }
}

impl From<TriggerType> for String {
    fn from(t: TriggerType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trigger-specific condition. `urlPattern` for page views, `selector` for
/// clicks; anything else the backend stores is preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// An operator-defined trackable event, as served by the events endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDefinition {
    pub id: EventId,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// `None` (or an empty string on the wire) marks a malformed entry.
    #[serde(default, deserialize_with = "blank_as_none")]
    pub trigger_type: Option<TriggerType>,

    #[serde(default)]
    pub trigger_payload: Option<TriggerPayload>,
}

impl EventDefinition {
    /// Page-view definition; `None` pattern matches every URL.
    pub fn page_view(
        id: impl Into<EventId>,
        name: impl Into<String>,
        url_pattern: Option<&str>,
    ) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            description: None,
            trigger_type: Some(TriggerType::PageView),
            trigger_payload: Some(TriggerPayload {
                url_pattern: url_pattern.map(str::to_string),
                ..Default::default()
            }),
        }
    }

    /// Click definition matched against `selector`.
    pub fn click(id: impl Into<EventId>, name: impl Into<String>, selector: &str) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            description: None,
            trigger_type: Some(TriggerType::Click),
            trigger_payload: Some(TriggerPayload {
                selector: Some(selector.to_string()),
                ..Default::default()
            }),
        }
    }

    pub fn is_trigger(&self, kind: &TriggerType) -> bool {
        self.trigger_type.as_ref() == Some(kind)
    }

    /// URL pattern, treating an empty string as unset.
    pub fn url_pattern(&self) -> Option<&str> {
        self.trigger_payload
            .as_ref()
            .and_then(|p| p.url_pattern.as_deref())
            .filter(|p| !p.is_empty())
    }

    /// CSS selector, treating an empty string as unset.
    pub fn selector(&self) -> Option<&str> {
        self.trigger_payload
            .as_ref()
            .and_then(|p| p.selector.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// Decode an events-endpoint body. A `null` body is an empty catalog.
///
/// Entries are decoded one by one: an entry that does not fit
/// [`EventDefinition`] is logged and skipped so the rest of the catalog
/// stays usable. Only a body that is not a list at all is an error.
pub fn parse_catalog(body: &[u8]) -> serde_json::Result<Vec<EventDefinition>> {
    let entries: Option<Vec<serde_json::Value>> = serde_json::from_slice(body)?;

    Ok(entries
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value(entry) {
            Ok(definition) => Some(definition),
            Err(e) => {
                warn!(index, error = %e, "Skipping malformed event definition");
                None
            }
        })
        .collect())
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<TriggerType>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()).map(TriggerType::from))
}

// =============================================================================
// Outbound Events (POST collect endpoint)
// =============================================================================

/// One matched occurrence, as posted to the collect endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEvent {
    pub event_id: EventId,
    pub event_name: Option<String>,
    pub trigger_type: TriggerType,
    #[serde(serialize_with = "iso_millis")]
    pub occurred_at: DateTime<Utc>,
    pub page_url: String,
    pub referrer: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub properties: EventProperties,
}

/// Free-form properties bag. Page views carry the location fields only;
/// clicks add the matched element's metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventProperties {
    pub page_url: String,
    pub referrer: Option<String>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub click: Option<ClickProperties>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickProperties {
    pub selector: String,
    pub element_text: String,
    pub element_tag: String,
    pub element_id: Option<String>,
}

/// `Date.prototype.toISOString` shape: millisecond precision, `Z` suffix.
fn iso_millis<S>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Millis, true))
}
