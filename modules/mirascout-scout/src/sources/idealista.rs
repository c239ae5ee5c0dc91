use chrono::{DateTime, Utc};
use mirascout_common::{Listing, ListingType, ParseFailure};

use crate::parse::{self, IndexPage, ParseContext, SearchArea};
use crate::retry::{classify_transport, Retryability};
use crate::session::TransportError;
use crate::source::ListingSource;

pub const SOURCE_NAME: &str = "idealista";
pub const BASE_URL: &str = "https://www.idealista.com";

/// idealista.com listings for one search area.
#[derive(Debug, Clone)]
pub struct IdealistaSource {
    base_url: String,
    area: SearchArea,
}

impl Default for IdealistaSource {
    fn default() -> Self {
        Self::new(BASE_URL, SearchArea::valencia())
    }
}

impl IdealistaSource {
    pub fn new(base_url: &str, area: SearchArea) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            area,
        }
    }

    pub fn area(&self) -> &SearchArea {
        &self.area
    }

    fn ctx(&self, listing_type: ListingType, fetched_at: DateTime<Utc>) -> ParseContext<'_> {
        ParseContext {
            source: SOURCE_NAME,
            base_url: &self.base_url,
            listing_type,
            area: &self.area,
            fetched_at,
        }
    }

    fn category_path(listing_type: ListingType) -> &'static str {
        match listing_type {
            ListingType::Sale => "venta-viviendas",
            ListingType::Rent => "alquiler-viviendas",
            ListingType::NewBuilding => "obra-nueva",
        }
    }
}

impl ListingSource for IdealistaSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn warmup_url(&self, listing_type: ListingType) -> String {
        format!(
            "{}/{}/{}/",
            self.base_url,
            Self::category_path(listing_type),
            self.area.slug
        )
    }

    fn structured_url(&self, listing_type: ListingType) -> Option<String> {
        let base = format!("{}/es/ajax/listing/georeach", self.base_url);
        Some(match listing_type {
            // The georeach endpoint has no category segment for new developments.
            ListingType::NewBuilding => format!("{base}/{}", self.area.slug),
            other => format!("{base}/{}/{}", Self::category_path(other), self.area.slug),
        })
    }

    fn index_page_url(&self, listing_type: ListingType, page: u32) -> Option<String> {
        match listing_type {
            ListingType::NewBuilding => None,
            other => Some(format!(
                "{}/{}/{}/pagina-{page}.htm",
                self.base_url,
                Self::category_path(other),
                self.area.slug
            )),
        }
    }

    fn detail_url(&self, source_id: &str) -> String {
        parse::detail_url(&self.base_url, source_id)
    }

    /// The site answers bot suspicion with a transient 403 that clears after
    /// a pause, so 403 is retried here on top of the default set.
    fn classify(&self, error: &TransportError) -> Retryability {
        match error {
            TransportError::Status {
                status: 403,
                retry_after,
                ..
            } => Retryability::Retryable {
                delay_hint: *retry_after,
            },
            other => classify_transport(other),
        }
    }

    fn parse_structured(
        &self,
        body: &str,
        listing_type: ListingType,
        fetched_at: DateTime<Utc>,
    ) -> Result<Vec<Result<Listing, ParseFailure>>, ParseFailure> {
        let items = parse::parse_structured_response(body)?;
        let ctx = self.ctx(listing_type, fetched_at);
        Ok(items
            .iter()
            .map(|item| parse::parse_structured_item(item, &ctx))
            .collect())
    }

    fn parse_index_page(
        &self,
        markup: &str,
        listing_type: ListingType,
        fetched_at: DateTime<Utc>,
    ) -> IndexPage {
        parse::parse_index_page(markup, &self.ctx(listing_type, fetched_at))
    }

    fn parse_detail(
        &self,
        markup: &str,
        expected_id: &str,
        listing_type: ListingType,
        fetched_at: DateTime<Utc>,
    ) -> Result<Listing, ParseFailure> {
        parse::parse_rendered_document(markup, expected_id, &self.ctx(listing_type, fetched_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn url_templates() {
        let source = IdealistaSource::default();
        assert_eq!(
            source.warmup_url(ListingType::Rent),
            "https://www.idealista.com/alquiler-viviendas/valencia-valencia/"
        );
        assert_eq!(
            source.structured_url(ListingType::Sale).unwrap(),
            "https://www.idealista.com/es/ajax/listing/georeach/venta-viviendas/valencia-valencia"
        );
        assert_eq!(
            source.structured_url(ListingType::NewBuilding).unwrap(),
            "https://www.idealista.com/es/ajax/listing/georeach/valencia-valencia"
        );
        assert_eq!(
            source.index_page_url(ListingType::Sale, 3).unwrap(),
            "https://www.idealista.com/venta-viviendas/valencia-valencia/pagina-3.htm"
        );
        assert_eq!(source.index_page_url(ListingType::NewBuilding, 1), None);
        assert_eq!(
            source.detail_url("12345"),
            "https://www.idealista.com/inmueble/12345/"
        );
    }

    #[test]
    fn forbidden_is_retryable_for_this_site() {
        let source = IdealistaSource::default();
        let err = TransportError::Status {
            status: 403,
            url: "u".into(),
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(
            source.classify(&err),
            Retryability::Retryable {
                delay_hint: Some(Duration::from_secs(3))
            }
        );
        let not_found = TransportError::Status {
            status: 404,
            url: "u".into(),
            retry_after: None,
        };
        assert_eq!(source.classify(&not_found), Retryability::Fatal);
    }

    #[test]
    fn structured_body_yields_per_item_results() {
        let source = IdealistaSource::default();
        let body = r#"{"body": {"ads": [{"adId": 1, "price": 100}, {"price": 5}]}}"#;
        let items = source
            .parse_structured(body, ListingType::Sale, Utc::now())
            .unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }
}
