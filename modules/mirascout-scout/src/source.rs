use chrono::{DateTime, Utc};
use mirascout_common::{Listing, ListingType, ParseFailure};

use crate::parse::IndexPage;
use crate::retry::{classify_transport, Retryability};
use crate::session::TransportError;

/// What one acquisition run should fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoutQuery {
    pub listing_type: ListingType,
    /// Upper bound on index pages walked by the slow path.
    pub max_pages: u32,
    /// Fetch each listing's detail page and merge in the richer fields.
    pub enrich: bool,
}

impl Default for ScoutQuery {
    fn default() -> Self {
        Self {
            listing_type: ListingType::Sale,
            max_pages: 2,
            enrich: false,
        }
    }
}

/// Everything the engine needs to know about one listing site: where its
/// endpoints live, how to read its payloads, and which failures are worth
/// retrying. Implementations hold no session state.
pub trait ListingSource: Send + Sync {
    /// Stable name used as the `source` of every listing and in log fields.
    fn name(&self) -> &str;

    /// Page navigated to before any data request.
    fn warmup_url(&self, listing_type: ListingType) -> String;

    /// Structured (JSON) endpoint for the fast path, when the site has one.
    fn structured_url(&self, listing_type: ListingType) -> Option<String>;

    /// Rendered index page `page` (1-based), when the category has one.
    fn index_page_url(&self, listing_type: ListingType, page: u32) -> Option<String>;

    fn detail_url(&self, source_id: &str) -> String;

    fn classify(&self, error: &TransportError) -> Retryability {
        classify_transport(error)
    }

    /// Parse a structured response body into per-item results. `Err` means the
    /// body as a whole is unusable.
    fn parse_structured(
        &self,
        body: &str,
        listing_type: ListingType,
        fetched_at: DateTime<Utc>,
    ) -> Result<Vec<Result<Listing, ParseFailure>>, ParseFailure>;

    fn parse_index_page(
        &self,
        markup: &str,
        listing_type: ListingType,
        fetched_at: DateTime<Utc>,
    ) -> IndexPage;

    fn parse_detail(
        &self,
        markup: &str,
        expected_id: &str,
        listing_type: ListingType,
        fetched_at: DateTime<Utc>,
    ) -> Result<Listing, ParseFailure>;
}
