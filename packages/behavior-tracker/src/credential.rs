//! Identity and auth providers.
//!
//! The host can hand the tracker either a fixed value or a function that
//! produces one on demand (sync or async). Both are normalized into
//! [`Credential`] and resolved the same way at every call site.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

/// Zero-argument async provider.
pub type ProviderFn = Arc<dyn Fn() -> BoxFuture<'static, Option<String>> + Send + Sync>;

/// A token, user id or session id source.
#[derive(Clone, Default)]
pub enum Credential {
    /// No credential configured
    #[default]
    Absent,
    /// Fixed value
    Literal(String),
    /// Computed on every resolution
    Provider(ProviderFn),
}

impl Credential {
    pub fn literal(value: impl Into<String>) -> Self {
        Credential::Literal(value.into())
    }

    /// Wrap a synchronous provider.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        Credential::Provider(Arc::new(move || {
            let value = f();
            async move { value }.boxed()
        }))
    }

    /// Wrap an asynchronous provider.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<String>> + Send + 'static,
    {
        Credential::Provider(Arc::new(move || f().boxed()))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Credential::Absent)
    }

    /// Produce the current value, if any.
    pub async fn resolve(&self) -> Option<String> {
        match self {
            Credential::Absent => None,
            Credential::Literal(value) => Some(value.clone()),
            Credential::Provider(provider) => provider().await,
        }
    }

    /// First configured credential wins; `Absent` falls through.
    pub fn or(self, fallback: Credential) -> Credential {
        if self.is_absent() {
            fallback
        } else {
            self
        }
    }
}

impl From<Option<String>> for Credential {
    fn from(value: Option<String>) -> Self {
        value.map(Credential::Literal).unwrap_or_default()
    }
}

// Tokens end up in here, so never print the value.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Absent => f.write_str("Absent"),
            Credential::Literal(_) => f.write_str("Literal([REDACTED])"),
            Credential::Provider(_) => f.write_str("Provider(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_literal_and_absent() {
        assert_eq!(Credential::literal("tok").resolve().await.as_deref(), Some("tok"));
        assert_eq!(Credential::Absent.resolve().await, None);
        assert_eq!(Credential::from(None).resolve().await, None);
    }

    #[tokio::test]
    async fn test_provider_runs_on_every_resolve() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cred = Credential::from_fn(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Some(format!("session-{}", n))
        });

        assert_eq!(cred.resolve().await.as_deref(), Some("session-0"));
        assert_eq!(cred.resolve().await.as_deref(), Some("session-1"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_async_provider() {
        let cred = Credential::from_async(|| async {
            tokio::task::yield_now().await;
            Some("async-user".to_string())
        });
        assert_eq!(cred.resolve().await.as_deref(), Some("async-user"));
    }

    #[test]
    fn test_or_prefers_configured() {
        let picked = Credential::Absent.or(Credential::literal("b"));
        assert!(matches!(picked, Credential::Literal(ref v) if v == "b"));

        let picked = Credential::literal("a").or(Credential::literal("b"));
        assert!(matches!(picked, Credential::Literal(ref v) if v == "a"));
    }

    #[test]
    fn test_debug_redacts_literal() {
        let rendered = format!("{:?}", Credential::literal("secret-token"));
        assert!(!rendered.contains("secret-token"));
    }
}
