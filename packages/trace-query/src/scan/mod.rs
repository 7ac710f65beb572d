//! Structural filtering: per-shard scans merged into one `AggregateResult`.

pub mod aggregate;
pub mod exemplar;
pub mod merge;
pub mod shard;

pub use aggregate::AggregateResult;
pub use exemplar::{strategy_for, ExemplarStrategy, SharedExemplar, ShardExemplars, VerifiedExemplar};
pub use merge::{traces_by_structure, ShardReport, StructuralResult};
pub use shard::{scan_shard, ShardFragment, ShardOutcome};

use std::sync::Arc;

use crate::graph::TraceGraph;
use crate::storage::{BucketNaming, ObjectStore};
use crate::types::TimeWindow;

/// Everything a shard task needs; shared by all tasks of one query.
pub struct ScanContext {
    pub store: Arc<dyn ObjectStore>,
    pub naming: BucketNaming,
    pub query: TraceGraph,
    pub window: TimeWindow,
    pub page_size: usize,
    pub strategy: Box<dyn ExemplarStrategy>,
}
