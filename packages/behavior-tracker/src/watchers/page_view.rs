//! PAGE_VIEW detection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reqwest::Url;

use crate::matching::matches_url;
use crate::page::{path_and_query, NavigationKind};
use crate::tracker::BehaviorTracker;
use crate::types::{EventDefinition, TriggerType};

/// Page-view definitions matching `location`, in catalog order.
///
/// Both `pathname + search` and `pathname` alone are tried, so a pattern
/// written without a query string still matches a URL that carries one.
pub fn page_view_matches(catalog: &[EventDefinition], location: &Url) -> Vec<EventDefinition> {
    let full_path = path_and_query(location);
    let path_only = location.path();

    catalog
        .iter()
        .filter(|def| def.is_trigger(&TriggerType::PageView))
        .filter(|def| {
            matches_url(def.url_pattern(), &full_path) || matches_url(def.url_pattern(), path_only)
        })
        .cloned()
        .collect()
}

/// Subscribe to navigation and run the initial check.
///
/// `load` is handled once. History notifications are deferred one scheduler
/// tick so the host finishes updating the location before evaluation.
pub(crate) fn register(tracker: &BehaviorTracker) {
    let weak = tracker.downgrade();
    let load_seen = Arc::new(AtomicBool::new(false));

    tracker.page().on_navigation(Arc::new(move |kind| {
        let Some(tracker) = weak.upgrade() else {
            return;
        };
        match kind {
            NavigationKind::Load => {
                if !load_seen.swap(true, Ordering::AcqRel) {
                    tracker.handle_page_view();
                }
            }
            NavigationKind::PopState | NavigationKind::PushState | NavigationKind::ReplaceState => {
                let deferred = tracker.clone();
                tracker.spawn_tracked(async move {
                    tokio::task::yield_now().await;
                    deferred.handle_page_view();
                });
            }
        }
    }));

    tracker.handle_page_view();
}
