//! Which kind of index, if any, backs a condition's property.

use std::fmt;

use crate::error::{QueryError, Result};
use crate::storage::naming::{BLOOM_INDEX_LABEL, BUCKET_TYPE_LABEL_KEY, FOLDER_INDEX_LABEL};
use crate::storage::{BucketNaming, ObjectStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Bloom blocks per batch; equality only, may over-report.
    Membership,
    /// `<value>/<batch>` folders; exact, any comparator.
    Hierarchical,
    /// No index bucket; the condition is only checked against span data.
    None,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IndexKind::Membership => "membership",
            IndexKind::Hierarchical => "hierarchical",
            IndexKind::None => "none",
        })
    }
}

/// Classify the index bucket of `property_name` by its `bucket_type` label.
///
/// A missing bucket means no index. Any other storage failure propagates,
/// and a bucket whose label is neither index type is an error.
pub async fn classify(store: &dyn ObjectStore, property_name: &str) -> Result<IndexKind> {
    let bucket = BucketNaming::index(property_name);
    let labels = match store.bucket_labels(&bucket).await {
        Ok(labels) => labels,
        Err(e) if e.is_not_found() => return Ok(IndexKind::None),
        Err(e) => return Err(e.into()),
    };
    match labels.get(BUCKET_TYPE_LABEL_KEY).map(String::as_str) {
        Some(BLOOM_INDEX_LABEL) => Ok(IndexKind::Membership),
        Some(FOLDER_INDEX_LABEL) => Ok(IndexKind::Hierarchical),
        other => Err(QueryError::UnrecognizedIndex {
            bucket,
            label: other.unwrap_or("<missing>").to_string(),
        }),
    }
}
