//! CLICK detection.

use std::sync::Arc;

use tracing::warn;

use crate::page::ClickTarget;
use crate::tracker::BehaviorTracker;
use crate::types::{ClickProperties, EventDefinition, TriggerType};

/// Click definitions whose selector contains `target`, with the click
/// properties of the matched element. Definitions without a selector never
/// match; an unparseable selector is logged and skipped.
pub fn click_matches(
    catalog: &[EventDefinition],
    target: &dyn ClickTarget,
) -> Vec<(EventDefinition, ClickProperties)> {
    catalog
        .iter()
        .filter(|def| def.is_trigger(&TriggerType::Click))
        .filter_map(|def| {
            let selector = def.selector()?;
            match target.closest(selector) {
                Ok(Some(element)) => Some((
                    def.clone(),
                    ClickProperties {
                        selector: selector.to_string(),
                        element_text: element.text,
                        element_tag: element.tag_name,
                        element_id: element.id,
                    },
                )),
                Ok(None) => None,
                Err(e) => {
                    warn!(event_id = %def.id, error = %e, "Skipping click definition");
                    None
                }
            }
        })
        .collect()
}

/// One document-level click listener for the engine's lifetime.
pub(crate) fn register(tracker: &BehaviorTracker) {
    let weak = tracker.downgrade();
    tracker.page().on_click(Arc::new(move |target: &dyn ClickTarget| {
        if let Some(tracker) = weak.upgrade() {
            tracker.handle_click(target);
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::ElementInfo;
    use crate::error::{Result, TrackerError};

    /// Target whose ancestry is a list of (selector, element) pairs.
    struct FakeTarget(Vec<(&'static str, ElementInfo)>);

    impl ClickTarget for FakeTarget {
        fn closest(&self, selector: &str) -> Result<Option<ElementInfo>> {
            if selector.contains('[') && !selector.contains(']') {
                return Err(TrackerError::InvalidSelector { selector: selector.into() });
            }
            Ok(self
                .0
                .iter()
                .find(|(s, _)| *s == selector)
                .map(|(_, info)| info.clone()))
        }
    }

    #[test]
    fn test_every_matching_definition_is_reported() {
        let target = FakeTarget(vec![
            (".buy-btn", ElementInfo::new("button", Some("buy"), "Buy")),
            ("#product", ElementInfo::new("section", Some("product"), "Shoes Buy")),
        ]);
        let catalog = vec![
            EventDefinition::click("btn", "Button", ".buy-btn"),
            EventDefinition::click("section", "Section", "#product"),
            EventDefinition::click("other", "Other", ".cart"),
            EventDefinition::page_view("pv", "Page", None),
        ];

        let matched = click_matches(&catalog, &target);

        assert_eq!(matched.len(), 2);
        assert_eq!(matched[0].1.selector, ".buy-btn");
        assert_eq!(matched[0].1.element_tag, "BUTTON");
        assert_eq!(matched[1].1.element_id.as_deref(), Some("product"));
    }

    #[test]
    fn test_missing_or_invalid_selector_skipped() {
        let target = FakeTarget(vec![("a", ElementInfo::new("a", None, "link"))]);
        let mut no_selector = EventDefinition::click("none", "None", "a");
        no_selector.trigger_payload = None;
        let catalog = vec![
            no_selector,
            EventDefinition::click("bad", "Bad", "a["),
            EventDefinition::click("good", "Good", "a"),
        ];

        let matched = click_matches(&catalog, &target);

        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].0.id, crate::types::EventId::from("good"));
    }
}
