//! Archive naming conventions.
//!
//! ```text
//! tracehashes<suffix>/<shard>/<shard>-<start>-<end>   trace id listing
//! dyntraces<suffix>/<shard>-<start>-<end>             structural summary
//! <service><suffix>/<shard>-<start>-<end>             span data of one service
//! <index bucket>/...                                  attribute indexes
//! ```
//!
//! Buckets carry a `bucket_type` label: `microservice` on span buckets,
//! `bloom_index` or `folder_index` on index buckets.

use std::fmt;

use crate::error::{QueryError, Result};
use crate::types::TimeWindow;

pub const BUCKET_TYPE_LABEL_KEY: &str = "bucket_type";
pub const SPAN_BUCKET_LABEL: &str = "microservice";
pub const BLOOM_INDEX_LABEL: &str = "bloom_index";
pub const FOLDER_INDEX_LABEL: &str = "folder_index";

pub const DEFAULT_BUCKET_SUFFIX: &str = "-snicket2";
pub const TRACE_HASHES_CATEGORY: &str = "tracehashes";
pub const TRACE_STRUCT_CATEGORY: &str = "dyntraces";

/// Delimiter between a shard prefix (or index value) and the object name.
pub const PREFIX_DELIMITER: &str = "/";

/// Maps logical bucket categories to physical bucket names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketNaming {
    suffix: String,
}

impl Default for BucketNaming {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_SUFFIX)
    }
}

impl BucketNaming {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self { suffix: suffix.into() }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn trace_hashes(&self) -> String {
        format!("{}{}", TRACE_HASHES_CATEGORY, self.suffix)
    }

    pub fn trace_structures(&self) -> String {
        format!("{}{}", TRACE_STRUCT_CATEGORY, self.suffix)
    }

    /// Span bucket of a service. `service` is the bare service name,
    /// without the `:instance` part of a node label.
    pub fn spans(&self, service: &str) -> String {
        format!("{}{}", service, self.suffix)
    }

    /// Index bucket of an attribute: dots are not allowed in bucket names.
    pub fn index(property_name: &str) -> String {
        property_name.replace('.', "-")
    }
}

/// Batch identity encoded as `hash-start-end` in object names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchName {
    pub hash: String,
    pub start: u64,
    pub end: u64,
}

impl BatchName {
    pub fn new(hash: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            hash: hash.into(),
            start,
            end,
        }
    }

    /// Parse an object name. Leading `prefix/` components are dropped, so
    /// both `ab-10-20` and `ab/ab-10-20` yield the same batch.
    pub fn parse(object_name: &str) -> Result<Self> {
        let name = object_name
            .rsplit(PREFIX_DELIMITER)
            .next()
            .unwrap_or(object_name);
        let malformed = || QueryError::MalformedRecord(format!("bad batch name '{}'", object_name));

        let mut parts = name.rsplitn(3, '-');
        let end = parts.next().ok_or_else(malformed)?;
        let start = parts.next().ok_or_else(malformed)?;
        let hash = parts.next().ok_or_else(malformed)?;
        if hash.is_empty() {
            return Err(malformed());
        }
        let start: u64 = start.parse().map_err(|_| malformed())?;
        let end: u64 = end.parse().map_err(|_| malformed())?;
        if start > end {
            return Err(malformed());
        }
        Ok(Self::new(hash, start, end))
    }

    pub fn overlaps(&self, window: &TimeWindow) -> bool {
        window.overlaps(self.start, self.end)
    }

    pub fn within(&self, window: &TimeWindow) -> bool {
        window.contains(self.start, self.end)
    }

    /// The batch straddles a window boundary, so individual traces may
    /// fall outside the window.
    pub fn may_have_out_of_bound_traces(&self, window: &TimeWindow) -> bool {
        self.overlaps(window) && !self.within(window)
    }
}

impl fmt::Display for BatchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.hash, self.start, self.end)
    }
}
