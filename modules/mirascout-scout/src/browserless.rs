// Browsing session backed by a Browserless instance.
//
// Browserless is stateless between calls, so the session is a cookie jar:
// warmup navigates with puppeteer and keeps the resulting cookies, and every
// later request replays them. Structured requests run as an in-page fetch()
// from the referer so they carry the browser's own headers and TLS identity.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use browserless_client::{BrowserlessClient, BrowserlessError, ContentRequest, Cookie, WaitUntil};
use mirascout_common::ScoutConfig;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::session::{
    parse_retry_after, BrowsingSession, FetchResponse, SessionProvider, TransportError,
};

/// Milliseconds to let challenge scripts settle after the warmup navigation.
const WARMUP_SETTLE_MS: u64 = 3000;

const WARMUP_SCRIPT: &str = r#"
export default async function ({ page, context }) {
  const resp = await page.goto(context.url, { waitUntil: 'networkidle2' });
  await new Promise((r) => setTimeout(r, context.settleMs));
  const cookies = await page.cookies();
  return {
    data: { status: resp ? resp.status() : 0, cookies },
    type: 'application/json',
  };
}
"#;

const FETCH_SCRIPT: &str = r#"
export default async function ({ page, context }) {
  if (context.cookies.length) {
    await page.setCookie(...context.cookies);
  }
  await page.goto(context.referer, { waitUntil: 'domcontentloaded' });
  const result = await page.evaluate(async (url, referer) => {
    const headers = {
      'X-Requested-With': 'XMLHttpRequest',
      'Accept': 'application/json, text/javascript, */*; q=0.01',
    };
    if (referer) headers['Referer'] = referer;
    const resp = await fetch(url, { headers });
    return {
      status: resp.status,
      retryAfter: resp.headers.get('retry-after'),
      body: await resp.text(),
    };
  }, context.url, context.referer);
  const cookies = await page.cookies();
  return { data: { ...result, cookies }, type: 'application/json' };
}
"#;

#[derive(Debug, Deserialize)]
struct WarmupResult {
    status: u16,
    #[serde(default)]
    cookies: Vec<Cookie>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScriptFetch {
    status: u16,
    #[serde(default)]
    retry_after: Option<String>,
    #[serde(default)]
    body: String,
    #[serde(default)]
    cookies: Vec<Cookie>,
}

pub struct BrowserlessSessionProvider {
    client: Arc<BrowserlessClient>,
}

impl BrowserlessSessionProvider {
    pub fn new(config: &ScoutConfig) -> Result<Self> {
        let client = BrowserlessClient::new(
            &config.browserless_url,
            config.browserless_token.as_deref(),
            config.browserless_timeout,
        )
        .context("Failed to build Browserless client")?;
        Ok(Self {
            client: Arc::new(client),
        })
    }
}

#[async_trait]
impl SessionProvider for BrowserlessSessionProvider {
    async fn open(&self) -> Result<Arc<dyn BrowsingSession>> {
        Ok(Arc::new(BrowserlessSession {
            client: self.client.clone(),
            cookies: Mutex::new(Vec::new()),
        }))
    }
}

pub struct BrowserlessSession {
    client: Arc<BrowserlessClient>,
    cookies: Mutex<Vec<Cookie>>,
}

impl BrowserlessSession {
    fn cookies(&self) -> Vec<Cookie> {
        self.cookies.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn store_cookies(&self, cookies: Vec<Cookie>) {
        if cookies.is_empty() {
            return;
        }
        if let Ok(mut jar) = self.cookies.lock() {
            *jar = cookies;
        }
    }
}

#[async_trait]
impl BrowsingSession for BrowserlessSession {
    async fn warmup(&self, url: &str) -> Result<(), TransportError> {
        check_url(url)?;
        let result: WarmupResult = self
            .client
            .function(
                WARMUP_SCRIPT,
                json!({ "url": url, "settleMs": WARMUP_SETTLE_MS }),
            )
            .await
            .map_err(|e| transport_error(e, url))?;

        if result.status >= 400 {
            return Err(TransportError::Status {
                status: result.status,
                url: url.to_string(),
                retry_after: None,
            });
        }

        info!(
            url,
            status = result.status,
            cookies = result.cookies.len(),
            fetcher = "browserless",
            "Session warmed up"
        );
        self.store_cookies(result.cookies);
        Ok(())
    }

    async fn fetch_structured(
        &self,
        url: &str,
        referer: Option<&str>,
    ) -> Result<FetchResponse, TransportError> {
        check_url(url)?;
        let referer = referer.unwrap_or(url);
        let result: ScriptFetch = self
            .client
            .function(
                FETCH_SCRIPT,
                json!({ "url": url, "referer": referer, "cookies": self.cookies() }),
            )
            .await
            .map_err(|e| transport_error(e, url))?;

        debug!(url, status = result.status, bytes = result.body.len(), "Structured fetch");
        self.store_cookies(result.cookies);
        Ok(FetchResponse {
            status: result.status,
            body: result.body,
            retry_after: result.retry_after.as_deref().and_then(parse_retry_after),
        })
    }

    async fn fetch_rendered(&self, url: &str) -> Result<FetchResponse, TransportError> {
        check_url(url)?;
        let cookies = self.cookies();
        let content = self
            .client
            .content(&ContentRequest {
                url,
                cookies: &cookies,
                headers: &[],
                wait_until: WaitUntil::DomContentLoaded,
            })
            .await
            .map_err(|e| transport_error(e, url))?;

        debug!(url, status = content.status, bytes = content.html.len(), "Rendered fetch");
        Ok(FetchResponse {
            status: content.status,
            body: content.html,
            retry_after: None,
        })
    }

    async fn close(&self) {
        if let Ok(mut jar) = self.cookies.lock() {
            jar.clear();
        }
    }
}

fn check_url(url: &str) -> Result<(), TransportError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| TransportError::Protocol(format!("invalid URL {url}: {e}")))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(TransportError::Protocol(format!(
            "only http/https URLs are allowed, got: {}",
            parsed.scheme()
        )));
    }
    Ok(())
}

/// Browserless API errors carry the Browserless status, not the target's;
/// 429/503 there mean the browser pool is saturated, which is worth retrying.
fn transport_error(err: BrowserlessError, url: &str) -> TransportError {
    match err {
        BrowserlessError::Network(msg) => TransportError::Connection(msg),
        BrowserlessError::Timeout(msg) => TransportError::Timeout(msg),
        BrowserlessError::Api { status, .. } => TransportError::Status {
            status,
            url: url.to_string(),
            retry_after: None,
        },
        BrowserlessError::Decode(msg) => TransportError::Protocol(msg),
    }
}
