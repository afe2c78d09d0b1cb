//! HTTP transport for the events and collect endpoints.
//!
//! [`TrackerTransport`] is the seam the engine talks through; [`HttpTransport`]
//! is the reqwest implementation and [`MockTransport`](crate::testing::MockTransport)
//! the recording one used in tests.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, COOKIE};
use reqwest::{Client, Url};
use tracing::{debug, warn};

use crate::config::{CredentialsMode, TrackerConfig};
use crate::credential::Credential;
use crate::error::{Result, TrackerError};
use crate::types::{parse_catalog, EventDefinition, OutboundEvent};

/// The two network contracts of the engine.
#[async_trait]
pub trait TrackerTransport: Send + Sync {
    /// GET the active catalog. Non-2xx is an error carrying the status.
    async fn fetch_active_events(&self) -> Result<Vec<EventDefinition>>;

    /// POST one matched occurrence. Non-2xx is an error carrying the status.
    async fn deliver(&self, event: &OutboundEvent) -> Result<()>;
}

/// Join `path` onto `base` the way the page script does: absolute URLs pass
/// through, an empty base leaves the path relative, and exactly one slash
/// separates the two.
pub fn resolve_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    if base.is_empty() {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.strip_suffix('/').unwrap_or(base),
        path.strip_prefix('/').unwrap_or(path)
    )
}

/// reqwest-backed transport.
///
/// Relative endpoints are resolved against the page origin, as a browser
/// would. Cookies come from an optional jar and are attached according to
/// the credentials mode: always for `include`, only for requests to the page
/// origin for `same-origin`.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    api_base_url: String,
    events_endpoint: String,
    collect_endpoint: String,
    credentials: CredentialsMode,
    token_provider: Credential,
    page_origin: Option<Url>,
    cookies: Option<Arc<Jar>>,
    debug: bool,
}

impl HttpTransport {
    pub fn new(config: &TrackerConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("behavior-tracker/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_base_url: config.api_base_url.clone(),
            events_endpoint: config.events_endpoint.clone(),
            collect_endpoint: config.collect_endpoint.clone(),
            credentials: config.credentials_mode(),
            token_provider: config.token_provider.clone(),
            page_origin: None,
            cookies: None,
            debug: config.debug,
        })
    }

    /// Origin used for relative endpoints and same-origin checks.
    pub fn with_page_origin(mut self, origin: Url) -> Self {
        self.page_origin = Some(origin);
        self
    }

    /// Cookie jar shared with the host page.
    pub fn with_cookie_jar(mut self, jar: Arc<Jar>) -> Self {
        self.cookies = Some(jar);
        self
    }

    /// Absolute URL for an endpoint path.
    pub fn endpoint_url(&self, path: &str) -> Result<Url> {
        let resolved = resolve_url(&self.api_base_url, path);
        let parsed = match Url::parse(&resolved) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.page_origin {
                Some(origin) => origin.join(&resolved),
                None => Err(url::ParseError::RelativeUrlWithoutBase),
            },
            Err(e) => Err(e),
        };
        parsed.map_err(|e| {
            self.log_debug(|| debug!(url = %resolved, error = %e, "Endpoint URL did not resolve"));
            TrackerError::InvalidUrl { url: resolved }
        })
    }

    /// `Authorization: Bearer <token>` when the provider yields a non-empty token.
    pub async fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let Some(token) = self.token_provider.resolve().await.filter(|t| !t.is_empty()) else {
            return headers;
        };
        match HeaderValue::from_str(&format!("Bearer {}", token)) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => warn!("Token contains characters not allowed in a header, sending without it"),
        }
        headers
    }

    fn cookie_header(&self, url: &Url) -> Option<HeaderValue> {
        let jar = self.cookies.as_ref()?;
        let allowed = match self.credentials {
            CredentialsMode::Include => true,
            CredentialsMode::SameOrigin => self
                .page_origin
                .as_ref()
                .is_some_and(|origin| origin.origin() == url.origin()),
        };
        if !allowed {
            return None;
        }
        jar.cookies(url)
    }

    fn log_debug(&self, emit: impl FnOnce()) {
        if self.debug {
            emit();
        }
    }

    async fn request_headers(&self, url: &Url) -> HeaderMap {
        let mut headers = self.auth_headers().await;
        if let Some(cookie) = self.cookie_header(url) {
            headers.insert(COOKIE, cookie);
        }
        headers
    }
}

#[async_trait]
impl TrackerTransport for HttpTransport {
    async fn fetch_active_events(&self) -> Result<Vec<EventDefinition>> {
        let url = self.endpoint_url(&self.events_endpoint)?;
        let headers = self.request_headers(&url).await;

        self.log_debug(|| {
            debug!(url = %url, credentials = self.credentials.as_str(), "Fetching active events")
        });
        let response = self.client.get(url.clone()).headers(headers).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TrackerError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.bytes().await?;
        Ok(parse_catalog(&body)?)
    }

    async fn deliver(&self, event: &OutboundEvent) -> Result<()> {
        let url = self.endpoint_url(&self.collect_endpoint)?;
        let mut headers = self.request_headers(&url).await;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let body = serde_json::to_vec(event)?;

        self.log_debug(|| debug!(url = %url, event_id = %event.event_id, "Posting behavior event"));
        let response = self
            .client
            .post(url.clone())
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TrackerError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;

    fn transport(config: TrackerConfig) -> HttpTransport {
        HttpTransport::new(&config).unwrap()
    }

    #[test]
    fn test_resolve_url() {
        assert_eq!(resolve_url("", "/api/v1/events/active"), "/api/v1/events/active");
        assert_eq!(
            resolve_url("https://api.test/", "/api/v1/events/active"),
            "https://api.test/api/v1/events/active"
        );
        assert_eq!(resolve_url("https://api.test", "collect"), "https://api.test/collect");
        assert_eq!(
            resolve_url("https://api.test", "https://other.test/collect"),
            "https://other.test/collect"
        );
        assert_eq!(resolve_url("https://api.test", ""), "");
    }

    #[test]
    fn test_relative_endpoint_uses_page_origin() {
        let t = transport(TrackerConfig::default())
            .with_page_origin(Url::parse("https://shop.test/products/1").unwrap());

        let url = t.endpoint_url("/api/v1/events/active").unwrap();
        assert_eq!(url.as_str(), "https://shop.test/api/v1/events/active");
    }

    #[test]
    fn test_relative_endpoint_without_origin_is_invalid() {
        let t = transport(TrackerConfig::default());
        let err = t.endpoint_url("/api/v1/events/active").unwrap_err();
        assert!(matches!(err, TrackerError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_auth_header_only_with_token() {
        let t = transport(TrackerConfig::default());
        assert!(t.auth_headers().await.get(AUTHORIZATION).is_none());

        let t = transport(TrackerConfig {
            token_provider: Credential::literal(""),
            ..Default::default()
        });
        assert!(t.auth_headers().await.get(AUTHORIZATION).is_none());

        let t = transport(TrackerConfig {
            token_provider: Credential::from_fn(|| Some("abc".into())),
            ..Default::default()
        });
        let headers = t.auth_headers().await;
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer abc");
    }

    #[test]
    fn test_cookies_follow_credentials_mode() {
        let page = Url::parse("https://shop.test/").unwrap();
        let jar = Arc::new(Jar::default());
        jar.add_cookie_str("sid=123", &page);
        jar.add_cookie_str("sid=999", &Url::parse("https://api.test/").unwrap());

        let same_origin = transport(TrackerConfig {
            with_credentials: false,
            ..Default::default()
        })
        .with_page_origin(page.clone())
        .with_cookie_jar(jar.clone());

        assert!(same_origin
            .cookie_header(&Url::parse("https://shop.test/api").unwrap())
            .is_some());
        assert!(same_origin
            .cookie_header(&Url::parse("https://api.test/collect").unwrap())
            .is_none());

        let include = transport(TrackerConfig::default())
            .with_page_origin(page)
            .with_cookie_jar(jar);
        assert!(include
            .cookie_header(&Url::parse("https://api.test/collect").unwrap())
            .is_some());
    }
}
