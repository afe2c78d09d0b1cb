//! Test doubles.
//!
//! [`MockTransport`] records every call and can be scripted to fail or to
//! hold catalog fetches open, which is how overlap and failure paths are
//! exercised without a server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::{Result, TrackerError};
use crate::transport::TrackerTransport;
use crate::types::{EventDefinition, OutboundEvent};

#[derive(Debug, Clone)]
enum Failure {
    Status(u16),
    Network(String),
}

impl Failure {
    fn to_error(&self, url: &str) -> TrackerError {
        match self {
            Failure::Status(status) => TrackerError::Status {
                status: *status,
                url: url.to_string(),
            },
            Failure::Network(message) => TrackerError::Network(message.clone()),
        }
    }
}

/// Recording transport with a canned catalog.
///
/// Clones share state, so a test can keep one handle and give another to
/// the tracker.
#[derive(Clone, Default)]
pub struct MockTransport {
    catalog: Arc<RwLock<Vec<EventDefinition>>>,
    fetch_calls: Arc<AtomicUsize>,
    fetch_failure: Arc<RwLock<Option<Failure>>>,
    fetch_gate: Arc<RwLock<Option<Arc<Semaphore>>>>,
    delivered: Arc<RwLock<Vec<OutboundEvent>>>,
    delivery_attempts: Arc<AtomicUsize>,
    delivery_failure: Arc<RwLock<Option<Failure>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog returned by fetches (builder pattern).
    pub fn with_catalog(self, definitions: Vec<EventDefinition>) -> Self {
        self.set_catalog(definitions);
        self
    }

    /// Replace the catalog served by later fetches.
    pub fn set_catalog(&self, definitions: Vec<EventDefinition>) {
        *self.catalog.write().unwrap() = definitions;
    }

    /// Number of catalog fetches started (including ones still held open).
    pub fn fetch_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Events the collect endpoint accepted.
    pub fn delivered(&self) -> Vec<OutboundEvent> {
        self.delivered.read().unwrap().clone()
    }

    /// POSTs attempted, successful or not.
    pub fn delivery_attempts(&self) -> usize {
        self.delivery_attempts.load(Ordering::SeqCst)
    }

    pub fn fail_fetches_with_status(&self, status: u16) {
        *self.fetch_failure.write().unwrap() = Some(Failure::Status(status));
    }

    pub fn fail_deliveries_with_status(&self, status: u16) {
        *self.delivery_failure.write().unwrap() = Some(Failure::Status(status));
    }

    pub fn fail_deliveries_with_network_error(&self) {
        *self.delivery_failure.write().unwrap() =
            Some(Failure::Network("connection reset".to_string()));
    }

    /// Clear all scripted failures.
    pub fn recover(&self) {
        *self.fetch_failure.write().unwrap() = None;
        *self.delivery_failure.write().unwrap() = None;
    }

    /// Make subsequent fetches block until [`release_fetches`](Self::release_fetches).
    pub fn hold_fetches(&self) {
        *self.fetch_gate.write().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let held fetches (and later ones) complete.
    pub fn release_fetches(&self) {
        if let Some(gate) = self.fetch_gate.write().unwrap().take() {
            gate.add_permits(1);
        }
    }
}

#[async_trait]
impl TrackerTransport for MockTransport {
    async fn fetch_active_events(&self) -> Result<Vec<EventDefinition>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.fetch_gate.read().unwrap().clone();
        if let Some(gate) = gate {
            // A permit is returned on drop, so one release lets every waiter through.
            let _permit = gate.acquire().await;
        }

        if let Some(failure) = self.fetch_failure.read().unwrap().clone() {
            return Err(failure.to_error("mock://events"));
        }
        Ok(self.catalog.read().unwrap().clone())
    }

    async fn deliver(&self, event: &OutboundEvent) -> Result<()> {
        self.delivery_attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(failure) = self.delivery_failure.read().unwrap().clone() {
            return Err(failure.to_error("mock://collect"));
        }
        self.delivered.write().unwrap().push(event.clone());
        Ok(())
    }
}
