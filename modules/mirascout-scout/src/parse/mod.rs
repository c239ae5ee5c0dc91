//! Pure parsers from raw payloads to `Listing`s.
//!
//! Nothing in here touches the network or reads configuration. Every entry
//! point takes the raw text plus a `ParseContext` and returns either a
//! validated listing or a `ParseFailure`.

pub mod features;
pub mod index;
pub mod rendered;
pub mod script;
pub mod structured;

pub use index::{parse_index_page, IndexPage};
pub use rendered::parse_rendered_document;
pub use structured::{parse_structured_item, parse_structured_response};

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use mirascout_common::{Listing, ListingFields, ListingType, ParseFailure};
use regex::Regex;
use scraper::ElementRef;

static RE_DETAIL_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/inmueble/(\d+)/?").unwrap());

/// The geographic scope a query runs over. Listings that do not report their
/// own province/municipality inherit these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchArea {
    /// Path segment used in site URLs, e.g. `valencia-valencia`.
    pub slug: String,
    pub region: String,
    pub province: String,
    pub municipality: String,
}

impl SearchArea {
    pub fn valencia() -> Self {
        Self {
            slug: "valencia-valencia".to_string(),
            region: "Comunidad Valenciana".to_string(),
            province: "Valencia".to_string(),
            municipality: "Valencia".to_string(),
        }
    }
}

/// Everything a parser needs besides the payload itself.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    pub source: &'a str,
    pub base_url: &'a str,
    pub listing_type: ListingType,
    pub area: &'a SearchArea,
    pub fetched_at: DateTime<Utc>,
}

impl<'a> ParseContext<'a> {
    /// Fields every parser starts from: identity scaffolding plus area defaults.
    pub(crate) fn base_fields(&self) -> ListingFields {
        ListingFields {
            source: self.source.to_string(),
            listing_type: Some(self.listing_type),
            region: Some(self.area.region.clone()),
            province: Some(self.area.province.clone()),
            municipality: Some(self.area.municipality.clone()),
            ..Default::default()
        }
    }

    /// Resolve a possibly-relative link against the site base.
    pub fn absolute_url(&self, href: &str) -> String {
        let href = href.trim();
        if href.starts_with("http://") || href.starts_with("https://") {
            return href.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        if href.starts_with('/') {
            format!("{base}{href}")
        } else {
            format!("{base}/{href}")
        }
    }

    pub fn detail_url(&self, source_id: &str) -> String {
        detail_url(self.base_url, source_id)
    }

    pub(crate) fn build(&self, fields: ListingFields) -> Result<Listing, ParseFailure> {
        Listing::build(fields, self.fetched_at)
    }
}

/// Canonical detail page for a listing id.
pub fn detail_url(base_url: &str, source_id: &str) -> String {
    format!("{}/inmueble/{}/", base_url.trim_end_matches('/'), source_id)
}

/// The listing id embedded in a `/inmueble/<id>/` link.
pub fn id_from_detail_link(href: &str) -> Option<&str> {
    RE_DETAIL_PATH
        .captures(href)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Parse a price written the Spanish way: `"1.250.000 €"`, `"950,50 €/mes"`.
pub fn parse_spanish_price(text: &str) -> Option<f64> {
    let digits: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if !digits.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.replace('.', "").replace(',', ".").parse().ok()
}

/// Text content with runs of whitespace collapsed.
pub(crate) fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Combine a listing with its detail-page version. See `Listing::merged_with`.
pub fn merge_enrichment(base: &Listing, detail: &Listing) -> Listing {
    base.merged_with(detail)
}
