//! Fetch phase: read the summaries and span data surviving traces need.
//!
//! Keys are planned up front from the structural result, so every
//! `(batch, service)` pair is read once no matter how many conditions or
//! embeddings implicate it.

use std::collections::{BTreeSet, HashMap};

use futures_util::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use crate::error::{QueryError, Result};
use crate::graph::service_of;
use crate::scan::AggregateResult;
use crate::span::{SpanBatch, SpanTable};
use crate::storage::{read_to_string, BucketNaming, ObjectStore};
use crate::types::{ObjectTraceKey, ObjectTraces};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanDataKey {
    pub batch_name: String,
    pub service: String,
}

impl SpanDataKey {
    pub fn new(batch_name: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            batch_name: batch_name.into(),
            service: service.into(),
        }
    }
}

/// Summaries by batch name and span tables by `(batch, service)`.
#[derive(Debug, Default)]
pub struct FetchedData {
    pub summaries: HashMap<String, String>,
    pub spans: HashMap<SpanDataKey, SpanTable>,
}

impl FetchedData {
    pub fn summary(&self, batch_name: &str) -> Result<&str> {
        self.summaries
            .get(batch_name)
            .map(String::as_str)
            .ok_or_else(|| {
                QueryError::InconsistentState(format!("summary of {} was not fetched", batch_name))
            })
    }

    pub fn span_table(&self, key: &SpanDataKey) -> Result<&SpanTable> {
        self.spans.get(key).ok_or_else(|| {
            QueryError::InconsistentState(format!(
                "span data of {} in {} was not fetched",
                key.service, key.batch_name
            ))
        })
    }
}

/// Trace position of a surviving pair in the structural result.
pub fn trace_position(
    positions: &HashMap<ObjectTraceKey, usize>,
    key: &ObjectTraceKey,
) -> Result<usize> {
    positions.get(key).copied().ok_or_else(|| {
        QueryError::InconsistentState(format!(
            "trace {} of {} is not in the structural result",
            key.trace_id, key.object
        ))
    })
}

/// Distinct `(batch, service)` pairs implicated by `node_indices` under any
/// embedding of any surviving trace.
pub fn plan_span_keys(
    survivors: &ObjectTraces,
    structural: &AggregateResult,
    node_indices: &[usize],
) -> Result<BTreeSet<SpanDataKey>> {
    let positions = structural.trace_positions();
    let mut keys = BTreeSet::new();
    for (batch, ids) in survivors {
        for id in ids {
            let trace = trace_position(&positions, &ObjectTraceKey::new(batch.as_str(), id.as_str()))?;
            for &embedding in structural.embeddings_of_trace(trace) {
                for &node in node_indices {
                    let label = structural.resolve_label(embedding, node).ok_or_else(|| {
                        QueryError::InconsistentState(format!(
                            "embedding {} has no node {}",
                            embedding, node
                        ))
                    })?;
                    keys.insert(SpanDataKey::new(batch.as_str(), service_of(label)));
                }
            }
        }
    }
    Ok(keys)
}

/// Read every survivor batch summary and every planned span table with at
/// most `concurrency` reads in flight. The first failure wins.
pub async fn fetch(
    store: &dyn ObjectStore,
    naming: &BucketNaming,
    survivors: &ObjectTraces,
    span_keys: BTreeSet<SpanDataKey>,
    concurrency: usize,
) -> Result<FetchedData> {
    let concurrency = concurrency.max(1);
    let structures = naming.trace_structures();

    let summaries: HashMap<String, String> = stream::iter(survivors.keys())
        .map(|batch| {
            let structures = structures.as_str();
            async move {
                let summary = read_to_string(store, structures, batch).await?;
                Ok::<_, QueryError>((batch.clone(), summary))
            }
        })
        .buffer_unordered(concurrency)
        .try_collect()
        .await?;

    let wanted = span_keys.len();
    let spans: HashMap<SpanDataKey, SpanTable> = stream::iter(span_keys)
        .map(|key| async move {
            let bytes = store
                .read_object(&naming.spans(&key.service), &key.batch_name)
                .await?;
            let table = SpanTable::from(SpanBatch::from_json(&bytes)?);
            Ok::<_, QueryError>((key, table))
        })
        .buffer_unordered(concurrency)
        .try_collect()
        .await?;

    debug!(summaries = summaries.len(), span_tables = wanted, "fetch finished");
    Ok(FetchedData { summaries, spans })
}
