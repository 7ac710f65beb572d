//! trace-query - structural queries over a sharded distributed-trace archive
//!
//! The archive lives in object storage. Each shard is split into time
//! batches, and every batch is stored three ways: a trace id listing, a
//! structural summary with one call graph per trace, and raw span data per
//! service. A query finds traces whose call graph embeds a pattern graph
//! within a time window, optionally filtered by per-span conditions.
//!
//! Modules, leaves first:
//! - `graph` - trace graphs and subgraph embedding search
//! - `scan` - per-shard structural scans merged into one result
//! - `index` - membership and hierarchical index lookups and intersection
//! - `eval` - span data fetch, existential condition check, projection
//! - `query` - the `TraceQueryEngine` entry point

pub mod archive;
pub mod config;
pub mod error;
pub mod eval;
pub mod graph;
pub mod index;
pub mod query;
pub mod scan;
pub mod span;
pub mod storage;
pub mod summary;
pub mod types;

pub use config::{ExemplarMode, QueryConfig};
pub use error::{QueryError, Result};
pub use eval::{Comparator, OutputProjection, QueryCondition};
pub use graph::{find_subgraph_embeddings, EmbeddingMap, TraceGraph};
pub use query::{QueryOutcome, QueryRequest, TraceQueryEngine};
pub use span::{AttributeValue, SpanField, SpanRecord};
pub use storage::{FsStore, MemoryStore, ObjectStore};
pub use types::{ObjectTraceKey, TimeWindow};
