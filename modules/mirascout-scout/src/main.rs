use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use mirascout_common::{ListingType, ScoutConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mirascout_scout::browserless::BrowserlessSessionProvider;
use mirascout_scout::{output, sources, ListingScout, ScoutQuery};

#[derive(Parser)]
#[command(name = "mirascout", about = "Real-estate listing acquisition")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Acquire one category of listings and write them as JSONL
    Scrape {
        /// sale, rent, or new-building
        #[arg(long, default_value = "sale")]
        listing_type: ListingType,

        /// Upper bound on index pages when falling back to the slow path
        #[arg(long, default_value_t = 2)]
        max_pages: u32,

        /// Fetch each listing's detail page for richer fields
        #[arg(long)]
        enrich: bool,

        /// Directory for the JSONL output
        #[arg(long, default_value = "data")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs)?;

    match cli.command {
        Command::Scrape {
            listing_type,
            max_pages,
            enrich,
            output,
        } => {
            let query = ScoutQuery {
                listing_type,
                max_pages,
                enrich,
            };
            scrape(query, output).await
        }
    }
}

fn init_tracing(verbose: bool, json: bool) -> Result<()> {
    let level = if verbose { "mirascout=debug" } else { "mirascout=info" };
    let filter = EnvFilter::from_default_env().add_directive(level.parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn scrape(query: ScoutQuery, output_dir: PathBuf) -> Result<()> {
    info!("Mirascout starting...");

    let config = ScoutConfig::from_env().context("Invalid scout configuration")?;
    config.log_redacted();

    let source = sources::by_name(&config.source)?;
    let sessions = Arc::new(BrowserlessSessionProvider::new(&config)?);
    let scout = ListingScout::new(source.clone(), sessions, &config);

    let cancel = scout.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing with partial results");
            cancel.store(true, Ordering::Relaxed);
        }
    });

    let run = scout.run(&query).await?;
    let path = output::write_jsonl(
        &output_dir,
        source.name(),
        query.listing_type,
        &run.listings,
        Utc::now(),
    )?;

    info!(run_id = %run.run_id, path = %path.display(), "Scout run complete. {}", run.stats);
    Ok(())
}
