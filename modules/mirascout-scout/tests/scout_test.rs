//! Engine scenarios against a scripted browsing session.
//!
//! Every test builds a `MockSession` keyed by the Idealista URLs the engine
//! will request, runs one `ListingScout` acquisition with pacing and backoff
//! disabled, and asserts on the returned listings, stats, and call log.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use mirascout_common::{ListingStatus, ListingType, ScoutConfig};
use mirascout_scout::engine::AcquisitionPath;
use mirascout_scout::session::{FetchResponse, TransportError};
use mirascout_scout::sources::IdealistaSource;
use mirascout_scout::testing::{
    ad_range, detail_page, index_page, instant_config, structured_body, CallKind, MockSession,
    MockSessionProvider,
};
use mirascout_scout::{ListingScout, ListingSource, ScoutError, ScoutQuery};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn source() -> IdealistaSource {
    IdealistaSource::default()
}

fn structured_url(listing_type: ListingType) -> String {
    source().structured_url(listing_type).unwrap()
}

fn page_url(page: u32) -> String {
    source().index_page_url(ListingType::Sale, page).unwrap()
}

fn build_scout(session: Arc<MockSession>, max_attempts: u32) -> (ListingScout, Arc<MockSessionProvider>) {
    let provider = Arc::new(MockSessionProvider::new(session));
    let scout = ListingScout::new(
        Arc::new(source()),
        provider.clone(),
        &instant_config(max_attempts),
    );
    (scout, provider)
}

fn query(max_pages: u32, enrich: bool) -> ScoutQuery {
    ScoutQuery {
        listing_type: ListingType::Sale,
        max_pages,
        enrich,
    }
}

// ---------------------------------------------------------------------------
// Fast path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn structured_endpoint_yields_listings_without_rendering() {
    let session = Arc::new(MockSession::new().on(
        &structured_url(ListingType::Sale),
        FetchResponse::ok(structured_body(&[("111", 185_000), ("222", 240_000)])),
    ));
    let (scout, _) = build_scout(session.clone(), 3);

    let run = scout.run(&query(2, false)).await.unwrap();

    let ids: Vec<_> = run.listings.iter().map(|l| l.id()).collect();
    assert_eq!(ids, ["idealista-111", "idealista-222"]);
    assert_eq!(run.listings[0].price(), Some(185_000.0));
    assert_eq!(run.listings[0].rooms(), Some(3));
    assert_eq!(run.stats.path, AcquisitionPath::FastPath);
    assert_eq!(run.stats.structured_items, 2);
    assert_eq!(session.calls_of(CallKind::Warmup), 1);
    assert_eq!(session.calls_of(CallKind::Structured), 1);
    assert_eq!(session.calls_of(CallKind::Rendered), 0);
}

#[tokio::test]
async fn duplicate_ids_collapse_to_the_later_record() {
    let session = Arc::new(MockSession::new().on(
        &structured_url(ListingType::Sale),
        FetchResponse::ok(structured_body(&[("1", 100_000), ("2", 200_000), ("1", 150_000)])),
    ));
    let (scout, _) = build_scout(session, 3);

    let run = scout.run(&query(2, false)).await.unwrap();

    assert_eq!(run.listings.len(), 2);
    assert_eq!(run.listings[0].id(), "idealista-1");
    assert_eq!(run.listings[0].price(), Some(150_000.0));
    assert_eq!(run.stats.duplicates_collapsed, 1);
}

#[tokio::test]
async fn rate_limited_request_honours_retry_after_then_succeeds() {
    let url = structured_url(ListingType::Sale);
    let session = Arc::new(MockSession::new().on_sequence(
        &url,
        vec![
            FetchResponse::status(429).with_retry_after(Duration::ZERO),
            FetchResponse::ok(structured_body(&[("7", 90_000)])),
        ],
    ));
    let (scout, _) = build_scout(session.clone(), 3);

    let run = scout.run(&query(2, false)).await.unwrap();

    assert_eq!(run.stats.path, AcquisitionPath::FastPath);
    assert_eq!(run.listings.len(), 1);
    assert_eq!(session.calls_to(&url), 2);
}

#[tokio::test]
async fn unparseable_items_are_dropped_not_fatal() {
    let body = r#"{"body": {"ads": [{"adId": "1", "price": 100}, {"price": 5}, {"adId": "3", "price": [1]}]}}"#;
    let session = Arc::new(
        MockSession::new().on(&structured_url(ListingType::Sale), FetchResponse::ok(body)),
    );
    let (scout, _) = build_scout(session, 3);

    let run = scout.run(&query(2, false)).await.unwrap();

    assert_eq!(run.listings.len(), 1);
    assert_eq!(run.stats.parse_failures, 2);
    assert_eq!(run.stats.path, AcquisitionPath::FastPath);
}

#[tokio::test]
async fn empty_flat_envelope_is_a_successful_empty_result() {
    let session = Arc::new(
        MockSession::new()
            .on(&structured_url(ListingType::Sale), FetchResponse::ok(r#"{"ads": []}"#))
            .on(&page_url(1), FetchResponse::ok(index_page(&ad_range(1, 3, 1), 1))),
    );
    let (scout, _) = build_scout(session.clone(), 3);

    let run = scout.run(&query(2, true)).await.unwrap();

    assert!(run.listings.is_empty());
    assert_eq!(run.stats.path, AcquisitionPath::FastPath);
    assert_eq!(run.stats.structured_items, 0);
    assert_eq!(session.calls_of(CallKind::Structured), 1);
    assert_eq!(session.calls_of(CallKind::Rendered), 0);
}

// ---------------------------------------------------------------------------
// Fallback to index pages
// ---------------------------------------------------------------------------

#[tokio::test]
async fn persistent_forbidden_exhausts_retries_then_falls_back() {
    let session = Arc::new(
        MockSession::new()
            .on(&structured_url(ListingType::Sale), FetchResponse::status(403))
            .on(&page_url(1), FetchResponse::ok(index_page(&ad_range(1, 3, 95_000), 1))),
    );
    let (scout, _) = build_scout(session.clone(), 3);

    let run = scout.run(&query(2, false)).await.unwrap();

    assert_eq!(session.calls_of(CallKind::Structured), 3);
    assert_eq!(run.stats.path, AcquisitionPath::SlowPath);
    assert_eq!(run.listings.len(), 3);
    assert_eq!(run.stats.pages_fetched, 1);
    assert_eq!(session.calls_to(&page_url(2)), 0);
}

#[tokio::test]
async fn malformed_structured_body_falls_back_without_retrying() {
    let session = Arc::new(
        MockSession::new()
            .on(
                &structured_url(ListingType::Sale),
                FetchResponse::ok("<html>captcha</html>"),
            )
            .on(&page_url(1), FetchResponse::ok(index_page(&ad_range(10, 2, 80_000), 1))),
    );
    let (scout, _) = build_scout(session.clone(), 3);

    let run = scout.run(&query(3, false)).await.unwrap();

    assert_eq!(session.calls_of(CallKind::Structured), 1);
    assert_eq!(run.stats.path, AcquisitionPath::SlowPath);
    assert_eq!(run.listings.len(), 2);
}

#[tokio::test]
async fn paging_stops_at_first_empty_page() {
    let session = Arc::new(
        MockSession::new()
            .on(&page_url(1), FetchResponse::ok(index_page(&ad_range(1, 30, 100_000), 5)))
            .on(&page_url(2), FetchResponse::ok(index_page(&ad_range(31, 30, 100_000), 5)))
            .on(&page_url(3), FetchResponse::ok(index_page(&[], 5))),
    );
    let (scout, _) = build_scout(session.clone(), 3);

    let run = scout.run(&query(5, false)).await.unwrap();

    assert_eq!(run.listings.len(), 60);
    assert_eq!(run.stats.pages_fetched, 3);
    assert_eq!(session.calls_to(&page_url(4)), 0);
}

#[tokio::test]
async fn paging_respects_reported_total_and_max_pages() {
    let session = Arc::new(
        MockSession::new()
            .on(&page_url(1), FetchResponse::ok(index_page(&ad_range(1, 5, 1), 2)))
            .on(&page_url(2), FetchResponse::ok(index_page(&ad_range(6, 5, 1), 2))),
    );
    let (scout, _) = build_scout(session.clone(), 3);

    let run = scout.run(&query(10, false)).await.unwrap();
    assert_eq!(run.listings.len(), 10);
    assert_eq!(session.calls_to(&page_url(3)), 0);

    let capped = Arc::new(
        MockSession::new()
            .on(&page_url(1), FetchResponse::ok(index_page(&ad_range(1, 5, 1), 9))),
    );
    let (scout, _) = build_scout(capped.clone(), 3);
    scout.run(&query(1, false)).await.unwrap();
    assert_eq!(capped.calls_to(&page_url(2)), 0);
}

#[tokio::test]
async fn failed_page_is_skipped_and_paging_continues() {
    let session = Arc::new(
        MockSession::new()
            .on(&page_url(1), FetchResponse::ok(index_page(&ad_range(1, 4, 1), 3)))
            .on(&page_url(2), FetchResponse::status(503))
            .on(&page_url(3), FetchResponse::ok(index_page(&ad_range(9, 4, 1), 3))),
    );
    let (scout, _) = build_scout(session.clone(), 2);

    let run = scout.run(&query(3, false)).await.unwrap();

    assert_eq!(run.listings.len(), 8);
    assert_eq!(run.stats.pages_skipped, 1);
    assert_eq!(session.calls_to(&page_url(2)), 2);
}

#[tokio::test]
async fn new_building_without_index_pages_completes_empty() {
    let session = Arc::new(MockSession::new().on_error(
        &structured_url(ListingType::NewBuilding),
        TransportError::Protocol("bad payload".into()),
    ));
    let (scout, _) = build_scout(session.clone(), 3);

    let run = scout
        .run(&ScoutQuery {
            listing_type: ListingType::NewBuilding,
            max_pages: 3,
            enrich: false,
        })
        .await
        .unwrap();

    assert!(run.listings.is_empty());
    assert_eq!(run.stats.path, AcquisitionPath::SlowPath);
    assert_eq!(session.calls_of(CallKind::Rendered), 0);
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enrichment_failure_keeps_the_base_listing() {
    let src = source();
    let session = Arc::new(
        MockSession::new()
            .on(
                &structured_url(ListingType::Sale),
                FetchResponse::ok(structured_body(&[("111", 185_000), ("222", 240_000)])),
            )
            .on(&src.detail_url("111"), FetchResponse::ok(detail_page("111", 185_000)))
            .on(&src.detail_url("222"), FetchResponse::status(500)),
    );
    let (scout, _) = build_scout(session.clone(), 2);

    let run = scout.run(&query(2, true)).await.unwrap();

    assert_eq!(run.listings.len(), 2);
    let enriched = &run.listings[0];
    assert!(enriched.enriched());
    assert_eq!(enriched.status(), ListingStatus::Available);
    assert_eq!(enriched.description(), Some("Luminoso y reformado."));
    assert_eq!(enriched.bathrooms(), Some(2));
    assert!(enriched.coordinates().is_some());
    assert_eq!(enriched.price(), Some(185_000.0));

    let kept = &run.listings[1];
    assert_eq!(kept.id(), "idealista-222");
    assert!(!kept.enriched());
    assert_eq!(kept.description(), None);
    assert_eq!(kept.price(), Some(240_000.0));

    assert_eq!(run.stats.enriched, 1);
    assert_eq!(run.stats.enrichment_failures, 1);
}

#[tokio::test]
async fn concurrent_enrichment_keeps_order_and_isolates_failures() {
    let src = source();
    let ads: Vec<(String, u64)> = ad_range(1, 6, 100_000);
    let structured: Vec<(&str, u64)> = ads.iter().map(|(id, p)| (id.as_str(), *p)).collect();
    let mut session = MockSession::new().on(
        &structured_url(ListingType::Sale),
        FetchResponse::ok(structured_body(&structured)),
    );
    for (id, price) in &ads {
        session = if id == "3" {
            session.on(&src.detail_url(id), FetchResponse::status(500))
        } else {
            session.on(&src.detail_url(id), FetchResponse::ok(detail_page(id, *price)))
        };
    }
    let session = Arc::new(session);
    let config = ScoutConfig {
        enrich_concurrency: 3,
        ..instant_config(2)
    };
    let scout = ListingScout::new(
        Arc::new(src),
        Arc::new(MockSessionProvider::new(session.clone())),
        &config,
    );

    let run = scout.run(&query(1, true)).await.unwrap();

    let ids: Vec<_> = run.listings.iter().map(|l| l.source_id()).collect();
    assert_eq!(ids, ["1", "2", "3", "4", "5", "6"]);
    let flags: Vec<_> = run.listings.iter().map(|l| l.enriched()).collect();
    assert_eq!(flags, [true, true, false, true, true, true]);
    assert_eq!(run.listings[3].description(), Some("Luminoso y reformado."));
    assert_eq!(run.listings[2].description(), None);
    assert_eq!(run.stats.enriched, 5);
    assert_eq!(run.stats.enrichment_failures, 1);
    assert_eq!(session.calls_of(CallKind::Rendered), 6);
}

#[tokio::test]
async fn detail_page_for_another_listing_is_rejected() {
    let src = source();
    let session = Arc::new(
        MockSession::new()
            .on(
                &structured_url(ListingType::Sale),
                FetchResponse::ok(structured_body(&[("111", 185_000)])),
            )
            .on(&src.detail_url("111"), FetchResponse::ok(detail_page("999", 1))),
    );
    let (scout, _) = build_scout(session, 3);

    let run = scout.run(&query(2, true)).await.unwrap();

    assert_eq!(run.listings[0].description(), None);
    assert_eq!(run.stats.enrichment_failures, 1);
}

// ---------------------------------------------------------------------------
// Session lifecycle and cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn session_is_released_after_a_completed_run() {
    let session = Arc::new(MockSession::new().on(
        &structured_url(ListingType::Sale),
        FetchResponse::ok(structured_body(&[("1", 1)])),
    ));
    let (scout, provider) = build_scout(session.clone(), 3);

    scout.run(&query(1, false)).await.unwrap();

    assert_eq!(provider.times_opened(), 1);
    assert_eq!(session.times_closed(), 1);
}

#[tokio::test]
async fn unavailable_session_aborts_the_run() {
    let scout = ListingScout::new(
        Arc::new(source()),
        Arc::new(MockSessionProvider::unavailable()),
        &instant_config(3),
    );

    let err = scout.run(&query(2, false)).await.unwrap_err();
    assert!(matches!(err, ScoutError::SessionUnavailable(_)));
}

#[tokio::test]
async fn failed_warmup_aborts_and_still_releases() {
    let session = Arc::new(MockSession::new().failing_warmup(503));
    let (scout, _) = build_scout(session.clone(), 2);

    let err = scout.run(&query(2, false)).await.unwrap_err();

    assert!(matches!(err, ScoutError::SessionUnavailable(_)));
    assert_eq!(session.calls_of(CallKind::Warmup), 2);
    assert_eq!(session.calls_of(CallKind::Structured), 0);
    assert_eq!(session.times_closed(), 1);
}

#[tokio::test]
async fn cancelled_run_issues_no_requests() {
    let session = Arc::new(MockSession::new());
    let (scout, provider) = build_scout(session.clone(), 3);
    scout.cancel_handle().store(true, Ordering::Relaxed);

    let run = scout.run(&query(2, true)).await.unwrap();

    assert!(run.listings.is_empty());
    assert!(run.stats.cancelled);
    assert_eq!(provider.times_opened(), 0);
    assert!(session.calls().is_empty());
}

#[tokio::test]
async fn cancellation_during_paging_keeps_fetched_pages() {
    let session = Arc::new(
        MockSession::new()
            .on(&page_url(1), FetchResponse::ok(index_page(&ad_range(1, 4, 1), 3)))
            .on(&page_url(2), FetchResponse::ok(index_page(&ad_range(5, 4, 1), 3))),
    );
    let (scout, _) = build_scout(session.clone(), 3);
    session.cancel_on(&page_url(1), scout.cancel_handle());

    let run = scout.run(&query(3, true)).await.unwrap();

    assert_eq!(run.listings.len(), 4);
    assert!(run.stats.cancelled);
    assert_eq!(run.stats.path, AcquisitionPath::SlowPath);
    assert_eq!(run.stats.pages_fetched, 1);
    assert_eq!(session.calls_to(&page_url(2)), 0);
    assert_eq!(session.calls_of(CallKind::Rendered), 1);
    assert_eq!(session.times_closed(), 1);
}

#[tokio::test]
async fn cancellation_during_enrichment_returns_the_rest_unenriched() {
    let src = source();
    let session = Arc::new(
        MockSession::new()
            .on(
                &structured_url(ListingType::Sale),
                FetchResponse::ok(structured_body(&[("1", 100), ("2", 200), ("3", 300)])),
            )
            .on(&src.detail_url("1"), FetchResponse::ok(detail_page("1", 100)))
            .on(&src.detail_url("2"), FetchResponse::ok(detail_page("2", 200)))
            .on(&src.detail_url("3"), FetchResponse::ok(detail_page("3", 300))),
    );
    let (scout, _) = build_scout(session.clone(), 3);
    session.cancel_on(&src.detail_url("1"), scout.cancel_handle());

    let run = scout.run(&query(1, true)).await.unwrap();

    let flags: Vec<_> = run.listings.iter().map(|l| l.enriched()).collect();
    assert_eq!(flags, [true, false, false]);
    assert!(run.stats.cancelled);
    assert_eq!(run.stats.enriched, 1);
    assert_eq!(run.stats.enrichment_failures, 0);
    assert_eq!(session.calls_of(CallKind::Rendered), 1);
    assert_eq!(session.times_closed(), 1);
}
