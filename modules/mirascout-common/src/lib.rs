pub mod config;
pub mod error;
pub mod types;

pub use config::{PacingConfig, RetryConfig, ScoutConfig};
pub use error::{ParseFailure, ParseFailureReason};
pub use types::*;
