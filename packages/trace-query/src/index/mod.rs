//! Index layer: classify condition properties, look up candidates, and
//! intersect them with the structural result.

pub mod bloom;
pub mod classify;
pub mod folder;
pub mod intersect;
pub mod membership;

pub use bloom::{bloom_key, BloomFilter};
pub use classify::{classify, IndexKind};
pub use intersect::intersect;
pub use membership::MembershipBlock;

use crate::error::{QueryError, Result};
use crate::eval::condition::QueryCondition;
use crate::storage::ObjectStore;
use crate::types::{ObjectTraces, TimeWindow};

/// Candidate traces for `condition` from the index of the given kind.
pub async fn lookup(
    store: &dyn ObjectStore,
    condition: &QueryCondition,
    kind: IndexKind,
    window: &TimeWindow,
    page_size: usize,
) -> Result<ObjectTraces> {
    match kind {
        IndexKind::Membership => membership::lookup(store, condition, window, page_size).await,
        IndexKind::Hierarchical => folder::lookup(store, condition, window, page_size).await,
        IndexKind::None => Err(QueryError::InconsistentState(format!(
            "no index for '{}'",
            condition.property_name()
        ))),
    }
}
