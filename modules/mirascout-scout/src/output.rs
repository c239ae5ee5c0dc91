//! JSONL sink for acquired listings.
//!
//! Each run produces one `<dir>/<source>_<type>_<YYYYmmdd_HHMMSS>.jsonl` file
//! with one serialized `Listing` per line.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mirascout_common::{Listing, ListingType};
use tracing::info;

/// File name for a run's output.
pub fn output_file_name(source: &str, listing_type: ListingType, now: DateTime<Utc>) -> String {
    format!(
        "{source}_{}_{}.jsonl",
        listing_type.as_str(),
        now.format("%Y%m%d_%H%M%S")
    )
}

/// Write `listings` to a new JSONL file under `dir` and return its path.
pub fn write_jsonl(
    dir: &Path,
    source: &str,
    listing_type: ListingType,
    listings: &[Listing],
    now: DateTime<Utc>,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let path = dir.join(output_file_name(source, listing_type, now));
    let file = File::create(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    for listing in listings {
        serde_json::to_writer(&mut writer, listing)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    info!(path = %path.display(), listings = listings.len(), "Listings written");
    Ok(path)
}
