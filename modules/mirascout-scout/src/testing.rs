// Test mocks for the acquisition engine.
//
// Two mocks matching the two session boundaries:
// - MockSession (BrowsingSession): HashMap-based URL→response queue
// - MockSessionProvider (SessionProvider): hands out one shared MockSession
//
// Plus fixture builders for structured payloads, index pages and detail pages
// shaped like the Idealista markup the parsers read.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::json;

use mirascout_common::{PacingConfig, RetryConfig, ScoutConfig};

use crate::session::{BrowsingSession, FetchResponse, SessionProvider, TransportError};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Scout config with no pacing and zero backoff, so engine tests run instantly.
pub fn instant_config(max_attempts: u32) -> ScoutConfig {
    ScoutConfig {
        pacing: PacingConfig::NONE,
        retry: RetryConfig {
            max_attempts,
            base_delay: std::time::Duration::ZERO,
            max_delay: std::time::Duration::ZERO,
        },
        ..ScoutConfig::default()
    }
}

// ---------------------------------------------------------------------------
// MockSession
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Warmup,
    Structured,
    Rendered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCall {
    pub kind: CallKind,
    pub url: String,
}

type Scripted = Result<FetchResponse, TransportError>;

/// URL-keyed scripted session. Each URL holds a queue of responses; the last
/// one repeats once the queue drains. Unregistered URLs answer 404.
/// Builder pattern: `.on()`, `.on_sequence()`, `.on_error()`, `.failing_warmup()`.
#[derive(Default)]
pub struct MockSession {
    responses: Mutex<HashMap<String, VecDeque<Scripted>>>,
    cancel_triggers: Mutex<HashMap<String, Arc<AtomicBool>>>,
    warmup_error: Option<TransportError>,
    calls: Mutex<Vec<SessionCall>>,
    closed: AtomicU32,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, url: &str, response: FetchResponse) -> Self {
        self.push(url, Ok(response));
        self
    }

    /// Answer successive requests to `url` with `responses`, in order.
    pub fn on_sequence(self, url: &str, responses: Vec<FetchResponse>) -> Self {
        for response in responses {
            self.push(url, Ok(response));
        }
        self
    }

    pub fn on_error(self, url: &str, error: TransportError) -> Self {
        self.push(url, Err(error));
        self
    }

    /// Every warmup fails with `status`.
    pub fn failing_warmup(mut self, status: u16) -> Self {
        self.warmup_error = Some(TransportError::Status {
            status,
            url: "warmup".to_string(),
            retry_after: None,
        });
        self
    }

    /// Set `flag` as soon as `url` is requested, like an interrupt arriving
    /// while that request is in flight. Registered after construction so the
    /// flag can be a scout's cancel handle.
    pub fn cancel_on(&self, url: &str, flag: Arc<AtomicBool>) {
        self.cancel_triggers
            .lock()
            .unwrap()
            .insert(url.to_string(), flag);
    }

    fn push(&self, url: &str, response: Scripted) {
        self.responses
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    fn record(&self, kind: CallKind, url: &str) {
        self.calls.lock().unwrap().push(SessionCall {
            kind,
            url: url.to_string(),
        });
    }

    fn respond(&self, url: &str) -> Scripted {
        if let Some(flag) = self.cancel_triggers.lock().unwrap().get(url) {
            flag.store(true, Ordering::Relaxed);
        }
        let mut responses = self.responses.lock().unwrap();
        match responses.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or(Ok(FetchResponse::status(404))),
            None => Ok(FetchResponse::status(404)),
        }
    }

    pub fn calls(&self) -> Vec<SessionCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_of(&self, kind: CallKind) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.kind == kind).count()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.url == url).count()
    }

    pub fn times_closed(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowsingSession for MockSession {
    async fn warmup(&self, url: &str) -> Result<(), TransportError> {
        self.record(CallKind::Warmup, url);
        match &self.warmup_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn fetch_structured(
        &self,
        url: &str,
        _referer: Option<&str>,
    ) -> Result<FetchResponse, TransportError> {
        self.record(CallKind::Structured, url);
        self.respond(url)
    }

    async fn fetch_rendered(&self, url: &str) -> Result<FetchResponse, TransportError> {
        self.record(CallKind::Rendered, url);
        self.respond(url)
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// MockSessionProvider
// ---------------------------------------------------------------------------

/// Opens the same `MockSession` every time, or fails when built `unavailable()`.
pub struct MockSessionProvider {
    session: Option<Arc<MockSession>>,
    opened: AtomicU32,
}

impl MockSessionProvider {
    pub fn new(session: Arc<MockSession>) -> Self {
        Self {
            session: Some(session),
            opened: AtomicU32::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            session: None,
            opened: AtomicU32::new(0),
        }
    }

    pub fn times_opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionProvider for MockSessionProvider {
    async fn open(&self) -> Result<Arc<dyn BrowsingSession>> {
        let Some(session) = &self.session else {
            bail!("browser pool exhausted");
        };
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(session.clone())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Structured endpoint payload with one ad per `(id, price)`.
pub fn structured_body(ads: &[(&str, u64)]) -> String {
    let ads: Vec<_> = ads
        .iter()
        .map(|(id, price)| {
            json!({
                "adId": id,
                "price": price,
                "address": format!("Calle {id}, Valencia"),
                "features": ["3 hab.", "90 m²"],
            })
        })
        .collect();
    json!({ "body": { "ads": ads } }).to_string()
}

/// Index page with one article per `(id, price)` and pagination links up to
/// `total_pages`.
pub fn index_page(ads: &[(String, u64)], total_pages: u32) -> String {
    let mut html = String::from("<html><body><main>");
    for (id, price) in ads {
        html.push_str(&format!(
            r#"<article class="item" data-adid="{id}">
                <a class="item-link" href="/inmueble/{id}/" title="Piso {id}">Piso {id}</a>
                <span class="item-price">{price} €</span>
                <span class="item-detail">2 hab.</span>
            </article>"#
        ));
    }
    html.push_str(r#"</main><div class="pagination"><ul>"#);
    for page in 2..=total_pages {
        html.push_str(&format!(r#"<li><a href="/pagina-{page}.htm">{page}</a></li>"#));
    }
    html.push_str("</ul></div></body></html>");
    html
}

/// `count` consecutive ads starting at id `first`, all at `price`.
pub fn ad_range(first: u64, count: u64, price: u64) -> Vec<(String, u64)> {
    (first..first + count).map(|id| (id.to_string(), price)).collect()
}

/// Detail page for `id` with a price, description and coordinates.
pub fn detail_page(id: &str, price: u64) -> String {
    format!(
        r#"<html><head><link rel="canonical" href="https://www.idealista.com/inmueble/{id}/"></head>
        <body>
        <script>var adDetail = {{adId: '{id}', headerTitle: 'Piso {id} en Ruzafa'}};</script>
        <span class="info-data-price">{price} €</span>
        <div class="comment"><p>Luminoso y reformado.</p></div>
        <div class="details-property_features"><ul><li>2 baños</li></ul></div>
        <div id="mapWrapper" data-latitude="39.46" data-longitude="-0.37"></div>
        </body></html>"#
    )
}
