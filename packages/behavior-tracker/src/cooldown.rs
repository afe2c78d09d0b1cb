//! Per-event cooldown.
//!
//! The stamp is written optimistically when an event is admitted, before any
//! network call, and a suppressed attempt never moves it. A burst of triggers
//! inside one window therefore yields exactly one delivery and does not
//! extend the window.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::types::EventId;

/// Outcome of a cooldown check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    CoolingDown { remaining: Duration },
}

/// Timestamp map keyed by definition id.
#[derive(Debug)]
pub struct CooldownGate {
    window: Duration,
    last_fired: DashMap<EventId, Instant>,
}

impl CooldownGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired: DashMap::new(),
        }
    }

    /// Check and stamp in one step. The entry lock makes concurrent triggers
    /// for the same id race-free: at most one of them is admitted per window.
    pub fn try_admit(&self, id: &EventId) -> Admission {
        let now = Instant::now();
        match self.last_fired.entry(id.clone()) {
            Entry::Occupied(mut stamped) => {
                let elapsed = now.saturating_duration_since(*stamped.get());
                if elapsed < self.window {
                    return Admission::CoolingDown {
                        remaining: self.window - elapsed,
                    };
                }
                stamped.insert(now);
                Admission::Admitted
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                Admission::Admitted
            }
        }
    }

    pub fn last_fired(&self, id: &EventId) -> Option<Instant> {
        self.last_fired.get(id).map(|stamp| *stamp)
    }
}
