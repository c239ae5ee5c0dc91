pub mod browserless;
pub mod engine;
pub mod output;
pub mod pacing;
pub mod parse;
pub mod retry;
pub mod session;
pub mod source;
pub mod sources;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use engine::{ListingScout, RunStats, ScoutError, ScoutRun};
pub use source::{ListingSource, ScoutQuery};
