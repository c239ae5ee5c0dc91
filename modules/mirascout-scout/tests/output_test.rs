//! JSONL sink: a completed run written to disk and read back line by line.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use mirascout_common::ListingType;
use mirascout_scout::output::write_jsonl;
use mirascout_scout::session::FetchResponse;
use mirascout_scout::sources::IdealistaSource;
use mirascout_scout::testing::{instant_config, structured_body, MockSession, MockSessionProvider};
use mirascout_scout::{ListingScout, ListingSource, ScoutQuery};

#[tokio::test]
async fn run_output_is_one_listing_per_line() {
    let source = IdealistaSource::default();
    let session = Arc::new(MockSession::new().on(
        &source.structured_url(ListingType::Rent).unwrap(),
        FetchResponse::ok(structured_body(&[("501", 950), ("502", 1_200)])),
    ));
    let scout = ListingScout::new(
        Arc::new(source),
        Arc::new(MockSessionProvider::new(session)),
        &instant_config(1),
    );
    let run = scout
        .run(&ScoutQuery {
            listing_type: ListingType::Rent,
            max_pages: 1,
            enrich: false,
        })
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let now = Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 0).unwrap();
    let path = write_jsonl(dir.path(), "idealista", ListingType::Rent, &run.listings, now).unwrap();

    assert_eq!(
        path.file_name().unwrap().to_str().unwrap(),
        "idealista_rent_20261019_083000.jsonl"
    );

    let contents = std::fs::read_to_string(&path).unwrap();
    let rows: Vec<serde_json::Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["id"], "idealista-501");
    assert_eq!(rows[0]["listing_type"], "rent");
    assert_eq!(rows[0]["price"], 950.0);
    assert_eq!(rows[0]["status"], "available");
    assert_eq!(rows[0]["enriched"], false);
    assert_eq!(rows[1]["source_id"], "502");
    assert_eq!(rows[1]["region"], "Comunidad Valenciana");
}
