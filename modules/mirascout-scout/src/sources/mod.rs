pub mod idealista;

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::source::ListingSource;

pub use idealista::IdealistaSource;

/// Look up a source by its configured name.
pub fn by_name(name: &str) -> Result<Arc<dyn ListingSource>> {
    match name.trim().to_ascii_lowercase().as_str() {
        idealista::SOURCE_NAME => Ok(Arc::new(IdealistaSource::default())),
        other => bail!("Unknown listing source '{other}'"),
    }
}
