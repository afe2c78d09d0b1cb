//! Host page abstraction.
//!
//! The engine never touches a DOM directly. It reads the location and
//! referrer through [`HostPage`], subscribes to navigation notifications
//! (the host router reports `pushState`/`replaceState`/`popstate`), and
//! receives clicks as [`ClickTarget`]s it can walk up with `closest`.
//!
//! [`BrowserPage`] is an in-memory host page: an emitter the embedding
//! application drives from its router and input handling.

use std::sync::{Arc, RwLock};

use reqwest::cookie::Jar;
use reqwest::Url;
use scraper::{ElementRef, Selector};

use crate::error::{Result, TrackerError};

/// Longest element text carried in click properties.
pub const MAX_ELEMENT_TEXT: usize = 200;

/// Kinds of navigation notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationKind {
    /// First full load of the document
    Load,
    /// Back/forward navigation
    PopState,
    /// Programmatic history push
    PushState,
    /// Programmatic history replace
    ReplaceState,
}

pub type NavigationListener = Arc<dyn Fn(NavigationKind) + Send + Sync>;
pub type ClickListener = Arc<dyn Fn(&dyn ClickTarget) + Send + Sync>;

/// What the engine needs from the page it is embedded in.
pub trait HostPage: Send + Sync {
    /// Current URL (already updated when a navigation notification fires).
    fn location(&self) -> Url;

    /// `document.referrer`; `None` when empty.
    fn referrer(&self) -> Option<String>;

    /// Subscribe to navigation notifications for the page's lifetime.
    fn on_navigation(&self, listener: NavigationListener);

    /// Subscribe to document-level clicks for the page's lifetime.
    fn on_click(&self, listener: ClickListener);

    /// Cookies the page would send with credentialed requests.
    fn cookie_jar(&self) -> Option<Arc<Jar>> {
        None
    }
}

/// `pathname + search`, e.g. `/search?q=shoes`.
pub fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(query) if !query.is_empty() => format!("{}?{}", url.path(), query),
        _ => url.path().to_string(),
    }
}

// =============================================================================
// Click targets
// =============================================================================

/// Metadata of the element a click definition matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementInfo {
    /// Upper-case tag name, as `Element.tagName` reports it for HTML
    pub tag_name: String,
    pub id: Option<String>,
    /// Trimmed visible text, at most [`MAX_ELEMENT_TEXT`] characters
    pub text: String,
}

impl ElementInfo {
    pub fn new(tag_name: &str, id: Option<&str>, raw_text: &str) -> Self {
        Self {
            tag_name: tag_name.to_ascii_uppercase(),
            id: id.filter(|id| !id.is_empty()).map(str::to_string),
            text: sanitize_text(raw_text),
        }
    }
}

fn sanitize_text(raw: &str) -> String {
    raw.trim().chars().take(MAX_ELEMENT_TEXT).collect()
}

/// Something that was clicked.
pub trait ClickTarget {
    /// The target itself or its nearest ancestor matching `selector`.
    fn closest(&self, selector: &str) -> Result<Option<ElementInfo>>;
}

impl ClickTarget for ElementRef<'_> {
    fn closest(&self, selector: &str) -> Result<Option<ElementInfo>> {
        let parsed = Selector::parse(selector).map_err(|_| TrackerError::InvalidSelector {
            selector: selector.to_string(),
        })?;

        let found = std::iter::once(*self)
            .chain(self.ancestors().filter_map(ElementRef::wrap))
            .find(|el| parsed.matches(el));

        Ok(found.map(|el| {
            let mut text = String::new();
            push_visible_text(el, &mut text);
            ElementInfo::new(el.value().name(), el.value().id(), &text)
        }))
    }
}

// Text nodes under `el`, skipping subtrees that never render.
fn push_visible_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child) = ElementRef::wrap(child) {
            if !matches!(child.value().name(), "script" | "style" | "template") {
                push_visible_text(child, out);
            }
        }
    }
}

// =============================================================================
// In-memory page
// =============================================================================

/// Navigation and click emitter for hosts without a real browser.
pub struct BrowserPage {
    location: RwLock<Url>,
    referrer: RwLock<Option<String>>,
    navigation_listeners: RwLock<Vec<NavigationListener>>,
    click_listeners: RwLock<Vec<ClickListener>>,
    cookies: Option<Arc<Jar>>,
}

impl BrowserPage {
    pub fn new(location: Url) -> Self {
        Self {
            location: RwLock::new(location),
            referrer: RwLock::new(None),
            navigation_listeners: RwLock::new(Vec::new()),
            click_listeners: RwLock::new(Vec::new()),
            cookies: None,
        }
    }

    /// Page at `url`.
    pub fn open(url: &str) -> Result<Self> {
        let location = Url::parse(url).map_err(|_| TrackerError::InvalidUrl {
            url: url.to_string(),
        })?;
        Ok(Self::new(location))
    }

    pub fn with_referrer(self, referrer: impl Into<String>) -> Self {
        *self.referrer.write().unwrap_or_else(|p| p.into_inner()) = Some(referrer.into());
        self
    }

    pub fn with_cookie_jar(mut self, jar: Arc<Jar>) -> Self {
        self.cookies = Some(jar);
        self
    }

    /// Fire the one-time `load` notification.
    pub fn load(&self) {
        self.emit_navigation(NavigationKind::Load);
    }

    /// `history.pushState(…, url)` performed by the host router.
    pub fn push_state(&self, url: &str) -> Result<()> {
        self.set_location(url)?;
        self.emit_navigation(NavigationKind::PushState);
        Ok(())
    }

    /// `history.replaceState(…, url)` performed by the host router.
    pub fn replace_state(&self, url: &str) -> Result<()> {
        self.set_location(url)?;
        self.emit_navigation(NavigationKind::ReplaceState);
        Ok(())
    }

    /// Back/forward navigation landing on `url`.
    pub fn pop_state(&self, url: &str) -> Result<()> {
        self.set_location(url)?;
        self.emit_navigation(NavigationKind::PopState);
        Ok(())
    }

    /// Dispatch a click on `target` to every click listener.
    pub fn click(&self, target: &dyn ClickTarget) {
        let listeners = self
            .click_listeners
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        for listener in listeners {
            listener(target);
        }
    }

    pub fn navigation_listener_count(&self) -> usize {
        self.navigation_listeners
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    pub fn click_listener_count(&self) -> usize {
        self.click_listeners
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    fn set_location(&self, url: &str) -> Result<()> {
        let mut location = self.location.write().unwrap_or_else(|p| p.into_inner());
        let next = location.join(url).map_err(|_| TrackerError::InvalidUrl {
            url: url.to_string(),
        })?;
        *location = next;
        Ok(())
    }

    // Listeners are cloned out first so one may subscribe again while running.
    fn emit_navigation(&self, kind: NavigationKind) {
        let listeners = self
            .navigation_listeners
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        for listener in listeners {
            listener(kind);
        }
    }
}

impl HostPage for BrowserPage {
    fn location(&self) -> Url {
        self.location
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn referrer(&self) -> Option<String> {
        self.referrer
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .filter(|r| !r.is_empty())
    }

    fn on_navigation(&self, listener: NavigationListener) {
        self.navigation_listeners
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(listener);
    }

    fn on_click(&self, listener: ClickListener) {
        self.click_listeners
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(listener);
    }

    fn cookie_jar(&self) -> Option<Arc<Jar>> {
        self.cookies.clone()
    }
}
