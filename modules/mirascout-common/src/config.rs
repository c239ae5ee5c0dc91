use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;

/// Bounds for the randomized delay taken before every network request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingConfig {
    pub min: Duration,
    pub max: Duration,
}

impl PacingConfig {
    /// No delay at all. Used by tests and replays.
    pub const NONE: PacingConfig = PacingConfig {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(2),
            max: Duration::from_secs(5),
        }
    }
}

/// Attempt budget and exponential backoff bounds for one network step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Scout configuration loaded from environment variables.
/// Read once at startup and passed down explicitly; nothing below the
/// binary reads the environment.
#[derive(Debug, Clone)]
pub struct ScoutConfig {
    pub source: String,
    pub pacing: PacingConfig,
    pub retry: RetryConfig,
    pub enrich_concurrency: usize,

    // Browser (Browserless for JS rendering)
    pub browserless_url: String,
    pub browserless_token: Option<String>,
    pub browserless_timeout: Duration,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            source: "idealista".to_string(),
            pacing: PacingConfig::default(),
            retry: RetryConfig::default(),
            enrich_concurrency: 1,
            browserless_url: "http://localhost:3000".to_string(),
            browserless_token: None,
            browserless_timeout: Duration::from_secs(60),
        }
    }
}

impl ScoutConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Missing keys fall back to defaults;
    /// present-but-malformed values are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let delay_min = parse_or(&lookup, "REQUEST_DELAY_MIN", 2.0_f64)?;
        let delay_max = parse_or(&lookup, "REQUEST_DELAY_MAX", 5.0_f64)?;
        if delay_min > delay_max {
            bail!("REQUEST_DELAY_MIN ({delay_min}) must not exceed REQUEST_DELAY_MAX ({delay_max})");
        }

        let max_attempts = parse_or(&lookup, "MAX_RETRIES", defaults.retry.max_attempts)?;
        if max_attempts == 0 {
            bail!("MAX_RETRIES must be at least 1");
        }
        let enrich_concurrency = parse_or(&lookup, "ENRICH_CONCURRENCY", 1_usize)?;
        if enrich_concurrency == 0 {
            bail!("ENRICH_CONCURRENCY must be at least 1");
        }

        let config = Self {
            source: lookup("SCOUT_SOURCE")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.source),
            pacing: PacingConfig {
                min: secs(delay_min, "REQUEST_DELAY_MIN")?,
                max: secs(delay_max, "REQUEST_DELAY_MAX")?,
            },
            retry: RetryConfig {
                max_attempts,
                base_delay: secs(parse_or(&lookup, "RETRY_BASE_SECS", 4.0)?, "RETRY_BASE_SECS")?,
                max_delay: secs(parse_or(&lookup, "RETRY_MAX_SECS", 30.0)?, "RETRY_MAX_SECS")?,
            },
            enrich_concurrency,
            browserless_url: lookup("BROWSERLESS_URL").unwrap_or(defaults.browserless_url),
            browserless_token: lookup("BROWSERLESS_TOKEN").filter(|t| !t.is_empty()),
            browserless_timeout: secs(
                parse_or(&lookup, "BROWSERLESS_TIMEOUT_SECS", 60.0)?,
                "BROWSERLESS_TIMEOUT_SECS",
            )?,
        };

        Ok(config)
    }

    /// Log the effective configuration with secrets reduced to a prefix.
    pub fn log_redacted(&self) {
        fn preview(val: &str) -> String {
            let head: String = val.chars().take(4).collect();
            format!("{head}...")
        }

        info!(
            source = self.source.as_str(),
            delay_min_secs = self.pacing.min.as_secs_f64(),
            delay_max_secs = self.pacing.max.as_secs_f64(),
            max_attempts = self.retry.max_attempts,
            retry_base_secs = self.retry.base_delay.as_secs_f64(),
            retry_max_secs = self.retry.max_delay.as_secs_f64(),
            enrich_concurrency = self.enrich_concurrency,
            browserless_url = self.browserless_url.as_str(),
            browserless_token = self
                .browserless_token
                .as_deref()
                .map(preview)
                .unwrap_or_else(|| "(none)".to_string()),
            "Loaded scout config"
        );
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number, got '{raw}'")),
        _ => Ok(default),
    }
}

fn secs(value: f64, key: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .with_context(|| format!("{key} must be a non-negative number of seconds"))
}
