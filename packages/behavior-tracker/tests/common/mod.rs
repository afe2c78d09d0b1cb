//! Shared setup for tracker integration tests.

use std::sync::Arc;

use behavior_tracker::testing::MockTransport;
use behavior_tracker::{BehaviorTracker, BrowserPage, EventDefinition, TrackerOverrides};

pub const PAGE_URL: &str = "https://shop.test/";

/// Overrides with the refresh timer off, so paused-clock tests stay deterministic.
pub fn quiet() -> TrackerOverrides {
    TrackerOverrides::new().with_auto_refresh_ms(0)
}

/// Page at [`PAGE_URL`], a mock transport serving `catalog`, and an
/// uninitialized tracker wired to both.
pub fn setup(catalog: Vec<EventDefinition>) -> (Arc<BrowserPage>, MockTransport, BehaviorTracker) {
    let page = Arc::new(BrowserPage::open(PAGE_URL).unwrap());
    let mock = MockTransport::new().with_catalog(catalog);
    let tracker = BehaviorTracker::builder(page.clone())
        .transport(Arc::new(mock.clone()))
        .build();
    (page, mock, tracker)
}
