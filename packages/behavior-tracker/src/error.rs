//! Typed errors for the behavior tracker.
//!
//! Uses `thiserror` for library errors (not `anyhow`). None of these ever
//! reach host page code from a watcher: they are logged at the task boundary
//! and dropped.

use thiserror::Error;

use crate::types::EventId;

/// Errors that can occur while fetching the catalog or delivering events.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Network-level failure (connection refused, DNS, TLS, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Connection-level failure reported by a non-reqwest transport
    #[error("network error: {0}")]
    Network(String),

    /// Endpoint answered with a non-2xx status
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    /// Endpoint could not be turned into an absolute URL
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// Response body was not the expected JSON shape
    #[error("JSON decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Catalog entry without a trigger type
    #[error("malformed event definition: {event_id}")]
    MalformedDefinition { event_id: EventId },

    /// CSS selector from the catalog could not be parsed
    #[error("invalid selector: {selector}")]
    InvalidSelector { selector: String },

    /// The engine could not be loaded by the lazy loader
    #[error("engine load failed: {0}")]
    EngineLoad(String),
}

impl TrackerError {
    /// HTTP status carried by the error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            TrackerError::Status { status, .. } => Some(*status),
            TrackerError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Result type alias for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;
