// Acquisition strategy engine.
//
// One run: open + warm a session, try the structured endpoint, fall back to
// paging rendered index pages, optionally enrich every listing from its
// detail page, collapse duplicates. Only failing to get a session at all
// aborts the run; every other failure degrades it.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use mirascout_common::{Listing, ParseFailure, ScoutConfig};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::pacing::Pacer;
use crate::parse::merge_enrichment;
use crate::retry::{with_retry, RetryError, RetryPolicy};
use crate::session::{BrowsingSession, FetchResponse, SessionGuard, SessionProvider, TransportError};
use crate::source::{ListingSource, ScoutQuery};

/// The only failures that end a run without a result.
#[derive(Debug, Error)]
pub enum ScoutError {
    #[error("browsing session unavailable: {0}")]
    SessionUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoutState {
    Idle,
    FastPath,
    FastPathFailed,
    SlowPathPaging,
    EnrichmentPending,
    Done,
    Aborted,
}

impl fmt::Display for ScoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScoutState::Idle => "idle",
            ScoutState::FastPath => "fast_path",
            ScoutState::FastPathFailed => "fast_path_failed",
            ScoutState::SlowPathPaging => "slow_path_paging",
            ScoutState::EnrichmentPending => "enrichment_pending",
            ScoutState::Done => "done",
            ScoutState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Which path produced the run's listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionPath {
    #[default]
    None,
    FastPath,
    SlowPath,
}

impl fmt::Display for AcquisitionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionPath::None => write!(f, "none"),
            AcquisitionPath::FastPath => write!(f, "structured endpoint"),
            AcquisitionPath::SlowPath => write!(f, "index pages"),
        }
    }
}

/// Stats from one acquisition run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub path: AcquisitionPath,
    pub structured_items: u32,
    pub pages_fetched: u32,
    pub pages_skipped: u32,
    pub parse_failures: u32,
    pub duplicates_collapsed: u32,
    pub enriched: u32,
    pub enrichment_failures: u32,
    pub listings: u32,
    pub cancelled: bool,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== Listing Scout Run Complete ===")?;
        writeln!(f, "Acquired via:         {}", self.path)?;
        writeln!(f, "Structured items:     {}", self.structured_items)?;
        writeln!(f, "Index pages fetched:  {}", self.pages_fetched)?;
        writeln!(f, "Index pages skipped:  {}", self.pages_skipped)?;
        writeln!(f, "Parse failures:       {}", self.parse_failures)?;
        writeln!(f, "Duplicates collapsed: {}", self.duplicates_collapsed)?;
        writeln!(f, "Enriched:             {}", self.enriched)?;
        writeln!(f, "Enrichment failures:  {}", self.enrichment_failures)?;
        writeln!(f, "Listings returned:    {}", self.listings)?;
        if self.cancelled {
            writeln!(f, "\nRun was cancelled; results are partial.")?;
        }
        Ok(())
    }
}

/// Result of a completed (possibly partial) run.
#[derive(Debug)]
pub struct ScoutRun {
    pub run_id: Uuid,
    pub listings: Vec<Listing>,
    pub stats: RunStats,
}

enum EnrichOutcome {
    Enriched,
    Failed,
    Skipped,
}

pub struct ListingScout {
    source: Arc<dyn ListingSource>,
    sessions: Arc<dyn SessionProvider>,
    retry: RetryPolicy,
    pacer: Pacer,
    enrich_concurrency: usize,
    cancelled: Arc<AtomicBool>,
}

impl ListingScout {
    pub fn new(
        source: Arc<dyn ListingSource>,
        sessions: Arc<dyn SessionProvider>,
        config: &ScoutConfig,
    ) -> Self {
        Self {
            source,
            sessions,
            retry: RetryPolicy::from_config(&config.retry),
            pacer: Pacer::new(config.pacing),
            enrich_concurrency: config.enrich_concurrency.max(1),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Setting the returned flag makes the current run stop issuing requests
    /// and return what it has so far.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Run one acquisition for `query`.
    pub async fn run(&self, query: &ScoutQuery) -> Result<ScoutRun, ScoutError> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "scout_run",
            %run_id,
            source = self.source.name(),
            listing_type = %query.listing_type
        );

        async {
            let mut guard = SessionGuard::new(self.sessions.clone());
            let result = self.run_inner(query, &mut guard).await;

            // Always release the session, aborted runs included
            guard.release().await;

            result.map(|(listings, stats)| ScoutRun {
                run_id,
                listings,
                stats,
            })
        }
        .instrument(span)
        .await
    }

    async fn run_inner(
        &self,
        query: &ScoutQuery,
        guard: &mut SessionGuard,
    ) -> Result<(Vec<Listing>, RunStats), ScoutError> {
        let mut state = ScoutState::Idle;
        let mut stats = RunStats::default();

        info!(
            max_pages = query.max_pages,
            enrich = query.enrich,
            "Starting listing scout run"
        );

        if self.is_cancelled() {
            info!("Scout run cancelled before start");
            stats.cancelled = true;
            advance(&mut state, ScoutState::Done);
            return Ok((Vec::new(), stats));
        }

        let session = match self.open_session(query, guard).await {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "Cannot establish browsing session, aborting run");
                advance(&mut state, ScoutState::Aborted);
                return Err(e);
            }
        };

        advance(&mut state, ScoutState::FastPath);
        let listings = match self.fast_path(session.as_ref(), query, &mut stats).await {
            Some(listings) => {
                stats.path = AcquisitionPath::FastPath;
                listings
            }
            None => {
                advance(&mut state, ScoutState::FastPathFailed);
                advance(&mut state, ScoutState::SlowPathPaging);
                stats.path = AcquisitionPath::SlowPath;
                self.slow_path(session.as_ref(), query, &mut stats).await
            }
        };

        let (mut listings, collapsed) = dedup_by_id(listings);
        if collapsed > 0 {
            info!(collapsed, "Collapsed duplicate listings");
        }
        stats.duplicates_collapsed = collapsed as u32;

        if query.enrich && !listings.is_empty() && !self.is_cancelled() {
            advance(&mut state, ScoutState::EnrichmentPending);
            listings = self.enrich(session.as_ref(), listings, &mut stats).await;
        }

        stats.listings = listings.len() as u32;
        advance(&mut state, ScoutState::Done);
        info!(
            listings = stats.listings,
            path = %stats.path,
            cancelled = stats.cancelled,
            "Listing scout run finished"
        );
        Ok((listings, stats))
    }

    async fn open_session(
        &self,
        query: &ScoutQuery,
        guard: &mut SessionGuard,
    ) -> Result<Arc<dyn BrowsingSession>, ScoutError> {
        let session = guard
            .acquire()
            .await
            .map_err(|e| ScoutError::SessionUnavailable(format!("{e:#}")))?;

        let warmup_url = self.source.warmup_url(query.listing_type);
        info!(url = warmup_url.as_str(), "Warming up browsing session");
        self.pacer.pace().await;
        with_retry(
            &self.retry,
            "session warmup",
            || session.warmup(&warmup_url),
            |e| self.source.classify(e),
        )
        .await
        .map_err(|e| ScoutError::SessionUnavailable(e.to_string()))?;

        Ok(session)
    }

    /// Pace, then fetch under the retry policy, yielding the 2xx body.
    async fn fetch_body<F, Fut>(
        &self,
        operation: &str,
        url: &str,
        mut fetch: F,
    ) -> Result<String, RetryError<TransportError>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<FetchResponse, TransportError>>,
    {
        self.pacer.pace().await;
        with_retry(
            &self.retry,
            operation,
            || {
                let response = fetch();
                async move { response.await?.into_body(url) }
            },
            |e| self.source.classify(e),
        )
        .await
    }

    /// `None` means the fast path failed and the slow path should run.
    async fn fast_path(
        &self,
        session: &dyn BrowsingSession,
        query: &ScoutQuery,
        stats: &mut RunStats,
    ) -> Option<Vec<Listing>> {
        let Some(url) = self.source.structured_url(query.listing_type) else {
            warn!("Source has no structured endpoint for this category");
            return None;
        };
        if self.is_cancelled() {
            stats.cancelled = true;
            return Some(Vec::new());
        }

        let referer = self.source.warmup_url(query.listing_type);
        info!(url = url.as_str(), "Requesting structured listings");

        let body = match self
            .fetch_body("structured listing request", &url, || {
                session.fetch_structured(&url, Some(&referer))
            })
            .await
        {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Structured endpoint failed, falling back to index pages");
                return None;
            }
        };

        let items = match self
            .source
            .parse_structured(&body, query.listing_type, Utc::now())
        {
            Ok(items) => items,
            Err(failure) => {
                warn!(error = %failure, "Structured response unusable, falling back to index pages");
                return None;
            }
        };

        stats.structured_items = items.len() as u32;
        let listings = collect_parsed(items, stats);
        info!(listings = listings.len(), "Structured listings parsed");
        Some(listings)
    }

    async fn slow_path(
        &self,
        session: &dyn BrowsingSession,
        query: &ScoutQuery,
        stats: &mut RunStats,
    ) -> Vec<Listing> {
        let mut listings = Vec::new();
        let mut total_pages: Option<u32> = None;

        for page in 1..=query.max_pages {
            if let Some(total) = total_pages {
                if page > total {
                    info!(page, total_pages = total, "Reached last reported page");
                    break;
                }
            }

            let Some(url) = self.source.index_page_url(query.listing_type, page) else {
                warn!("Source has no index pages for this category");
                break;
            };

            if self.is_cancelled() {
                info!(page, "Scout run cancelled, stopping pagination");
                stats.cancelled = true;
                break;
            }

            info!(page, url = url.as_str(), "Fetching index page");
            let markup = match self
                .fetch_body("index page", &url, || session.fetch_rendered(&url))
                .await
            {
                Ok(markup) => markup,
                Err(e) => {
                    error!(page, error = %e, "Index page failed, skipping its listings");
                    stats.pages_skipped += 1;
                    continue;
                }
            };
            stats.pages_fetched += 1;

            let parsed = self
                .source
                .parse_index_page(&markup, query.listing_type, Utc::now());
            let total = *total_pages.get_or_insert(parsed.total_pages.unwrap_or(1).max(1));

            if parsed.is_empty() {
                info!(page, "Index page has no listings, end of results");
                break;
            }

            let found = parsed.listings.len();
            listings.extend(collect_parsed(parsed.listings, stats));
            info!(page, listings = found, total_pages = total, "Index page parsed");
        }

        listings
    }

    async fn enrich(
        &self,
        session: &dyn BrowsingSession,
        listings: Vec<Listing>,
        stats: &mut RunStats,
    ) -> Vec<Listing> {
        let total = listings.len();
        info!(total, concurrency = self.enrich_concurrency, "Enriching listings from detail pages");

        let outcomes: Vec<(Listing, EnrichOutcome)> = stream::iter(listings.into_iter().enumerate())
            .map(|(i, listing)| self.enrich_one(session, listing, i + 1, total))
            .buffered(self.enrich_concurrency)
            .collect()
            .await;

        let mut enriched = Vec::with_capacity(outcomes.len());
        for (listing, outcome) in outcomes {
            match outcome {
                EnrichOutcome::Enriched => stats.enriched += 1,
                EnrichOutcome::Failed => stats.enrichment_failures += 1,
                EnrichOutcome::Skipped => stats.cancelled = true,
            }
            enriched.push(listing);
        }

        info!(
            enriched = stats.enriched,
            failed = stats.enrichment_failures,
            "Enrichment complete"
        );
        enriched
    }

    /// Never drops the listing: on any failure the base version comes back.
    async fn enrich_one(
        &self,
        session: &dyn BrowsingSession,
        base: Listing,
        position: usize,
        total: usize,
    ) -> (Listing, EnrichOutcome) {
        if self.is_cancelled() {
            return (base, EnrichOutcome::Skipped);
        }

        let url = self.source.detail_url(base.source_id());
        info!(position, total, id = base.id(), "Enriching listing");

        let markup = match self
            .fetch_body("detail page", &url, || session.fetch_rendered(&url))
            .await
        {
            Ok(markup) => markup,
            Err(e) => {
                if e.is_exhausted() {
                    error!(id = base.id(), error = %e, "Detail fetch exhausted retries, keeping listing unenriched");
                } else {
                    warn!(id = base.id(), error = %e, "Detail fetch failed, keeping listing unenriched");
                }
                return (base, EnrichOutcome::Failed);
            }
        };

        match self
            .source
            .parse_detail(&markup, base.source_id(), base.listing_type(), Utc::now())
        {
            Ok(detail) => (
                merge_enrichment(&base, &detail).into_enriched(),
                EnrichOutcome::Enriched,
            ),
            Err(failure) => {
                warn!(id = base.id(), error = %failure, "Detail page unparseable, keeping listing unenriched");
                (base, EnrichOutcome::Failed)
            }
        }
    }
}

fn advance(state: &mut ScoutState, next: ScoutState) {
    info!(from = %state, to = %next, "Scout state transition");
    *state = next;
}

/// Keep successful parses in order, count and log the rest.
fn collect_parsed(items: Vec<Result<Listing, ParseFailure>>, stats: &mut RunStats) -> Vec<Listing> {
    let mut listings = Vec::with_capacity(items.len());
    for (position, item) in items.into_iter().enumerate() {
        match item {
            Ok(listing) => listings.push(listing),
            Err(failure) => {
                stats.parse_failures += 1;
                warn!(position, error = %failure, "Dropping unparseable item");
            }
        }
    }
    listings
}

/// Collapse listings sharing an id. The last occurrence wins but takes the
/// position of the first, so upstream order is kept.
pub fn dedup_by_id(listings: Vec<Listing>) -> (Vec<Listing>, usize) {
    let before = listings.len();
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(before);
    let mut unique: Vec<Listing> = Vec::with_capacity(before);

    for listing in listings {
        match positions.get(listing.id()) {
            Some(&i) => unique[i] = listing,
            None => {
                positions.insert(listing.id().to_string(), unique.len());
                unique.push(listing);
            }
        }
    }

    let collapsed = before - unique.len();
    (unique, collapsed)
}
