//! Condition evaluation over the intersected survivors.
//!
//! - `condition` - per-span predicates
//! - `fetch` - deduplicated reads of summaries and span data
//! - `evaluator` - existential check across embeddings (rayon)
//! - `projection` - output shaping

pub mod condition;
pub mod evaluator;
pub mod fetch;
pub mod projection;

pub use condition::{Comparator, QueryCondition};
pub use evaluator::{satisfying_traces, PassedTrace};
pub use fetch::{fetch, plan_span_keys, FetchedData, SpanDataKey};
pub use projection::OutputProjection;
