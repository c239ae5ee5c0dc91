// Browsing session boundary.
//
// BrowsingSession is the warmed-up browser identity (cookies, fingerprint)
// every network step goes through. SessionProvider opens one per run.
// SessionGuard owns it for the run: acquired lazily, released on every exit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

/// Transport-level failure of one request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The target answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        status: u16,
        url: String,
        /// Server-provided `Retry-After`, when present.
        retry_after: Option<Duration>,
    },
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connection(String),
    /// Malformed request or undecodable response. Never retried.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Raw response to a structured or rendered fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
    pub retry_after: Option<Duration>,
}

impl FetchResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            retry_after: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body of a 2xx response; any other status becomes a `TransportError`.
    pub fn into_body(self, url: &str) -> Result<String, TransportError> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(TransportError::Status {
                status: self.status,
                url: url.to_string(),
                retry_after: self.retry_after,
            })
        }
    }
}

/// Parse a `Retry-After` value given in seconds. HTTP-date values are ignored.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[async_trait]
pub trait BrowsingSession: Send + Sync {
    /// Navigate to `url` so any interstitial challenge is resolved and the
    /// session carries the resulting cookies.
    async fn warmup(&self, url: &str) -> Result<(), TransportError>;

    /// Issue an XHR-style JSON request with the session's identity.
    async fn fetch_structured(
        &self,
        url: &str,
        referer: Option<&str>,
    ) -> Result<FetchResponse, TransportError>;

    /// Navigate to `url` and return the rendered markup.
    async fn fetch_rendered(&self, url: &str) -> Result<FetchResponse, TransportError>;

    /// Release browser resources. Idempotent.
    async fn close(&self);
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn BrowsingSession>>;
}

/// Scoped ownership of one session for one run.
pub struct SessionGuard {
    provider: Arc<dyn SessionProvider>,
    session: Option<Arc<dyn BrowsingSession>>,
}

impl SessionGuard {
    pub fn new(provider: Arc<dyn SessionProvider>) -> Self {
        Self {
            provider,
            session: None,
        }
    }

    /// Open the session on first use; later calls return the same one.
    pub async fn acquire(&mut self) -> Result<Arc<dyn BrowsingSession>> {
        if let Some(session) = &self.session {
            return Ok(session.clone());
        }
        let session = self.provider.open().await?;
        debug!("Browsing session opened");
        self.session = Some(session.clone());
        Ok(session)
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Close the session if one was opened. Safe to call repeatedly.
    pub async fn release(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
            debug!("Browsing session released");
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        // Only reached when the run future was dropped before release().
        let Some(session) = self.session.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { session.close().await });
            }
            Err(_) => warn!("Browsing session dropped outside a runtime, not closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_body_passes_through() {
        assert_eq!(FetchResponse::ok("{}").into_body("u").unwrap(), "{}");
    }

    #[test]
    fn error_status_keeps_retry_after() {
        let err = FetchResponse::status(429)
            .with_retry_after(Duration::from_secs(7))
            .into_body("https://example.com/a")
            .unwrap_err();
        assert_eq!(
            err,
            TransportError::Status {
                status: 429,
                url: "https://example.com/a".into(),
                retry_after: Some(Duration::from_secs(7)),
            }
        );
        assert_eq!(err.status(), Some(429));
    }

    #[test]
    fn retry_after_seconds_only() {
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2026 07:28:00 GMT"), None);
    }
}
