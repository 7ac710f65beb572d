//! Query engine configuration.
//!
//! Read from a JSON file by the CLI; every field has a default so partial
//! files are accepted.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::naming::DEFAULT_BUCKET_SUFFIX;

/// How one shard's exemplar graph is applied to the traces of that shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExemplarMode {
    /// Every trace in a shard shares the embeddings of its single exemplar.
    #[default]
    Shared,
    /// Each accepted trace is re-parsed and matched against its own graph.
    Verified,
}

/// Tunables for one `TraceQueryEngine`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Suffix appended to every logical bucket category (default: "-snicket2")
    pub bucket_suffix: String,
    /// Max concurrent span/summary reads during condition evaluation (default: 16)
    pub fetch_concurrency: usize,
    /// Page size requested from object listings (default: 1000)
    pub list_page_size: usize,
    /// Exemplar strategy for shard scans (default: shared)
    pub exemplar_mode: ExemplarMode,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            bucket_suffix: DEFAULT_BUCKET_SUFFIX.to_string(),
            fetch_concurrency: 16,
            list_page_size: 1000,
            exemplar_mode: ExemplarMode::Shared,
        }
    }
}

impl QueryConfig {
    /// Read config from a JSON file.
    pub fn read_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Write config as pretty JSON.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
