pub mod error;

pub use error::{BrowserlessError, Result};

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Header Browserless sets to the status code the target page answered with.
const RESPONSE_CODE_HEADER: &str = "x-response-code";

/// A browser cookie as Browserless reports and accepts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Navigation completion condition passed to `page.goto`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    #[default]
    DomContentLoaded,
    Load,
    #[serde(rename = "networkidle2")]
    NetworkIdle,
}

/// Input for a `/content` call.
#[derive(Debug, Clone, Default)]
pub struct ContentRequest<'a> {
    pub url: &'a str,
    pub cookies: &'a [Cookie],
    pub headers: &'a [(String, String)],
    pub wait_until: WaitUntil,
}

/// Rendered page returned by `/content`.
#[derive(Debug, Clone)]
pub struct RenderedContent {
    /// Status the target site answered with (not the Browserless API status).
    pub status: u16,
    pub html: String,
}

pub struct BrowserlessClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BrowserlessClient {
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let mut endpoint = format!("{}/{}", self.base_url, path);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }
        endpoint
    }

    /// Fetch fully-rendered HTML content for a URL via Browserless /content endpoint.
    pub async fn content(&self, request: &ContentRequest<'_>) -> Result<RenderedContent> {
        let headers: serde_json::Map<String, serde_json::Value> = request
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();

        let mut body = serde_json::json!({
            "url": request.url,
            "gotoOptions": { "waitUntil": request.wait_until },
        });
        if !request.cookies.is_empty() {
            body["cookies"] = serde_json::to_value(request.cookies)?;
        }
        if !headers.is_empty() {
            body["setExtraHTTPHeaders"] = serde_json::Value::Object(headers);
        }

        tracing::debug!(url = request.url, "browserless: /content");

        let resp = self
            .client
            .post(self.endpoint("content"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserlessError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let upstream_status = resp
            .headers()
            .get(RESPONSE_CODE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(200);

        Ok(RenderedContent {
            status: upstream_status,
            html: resp.text().await?,
        })
    }

    /// Run a puppeteer function via Browserless /function endpoint and decode its JSON result.
    ///
    /// `code` must be an ES module whose default export receives `{ page, context }`.
    pub async fn function<T: DeserializeOwned>(
        &self,
        code: &str,
        context: serde_json::Value,
    ) -> Result<T> {
        let body = serde_json::json!({ "code": code, "context": context });

        let resp = self
            .client
            .post(self.endpoint("function"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserlessError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let text = resp.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}
