//! Concurrent scan of all shards and merge of their fragments.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::debug;

use crate::error::{QueryError, Result};
use crate::scan::aggregate::AggregateResult;
use crate::scan::shard::{scan_shard, ShardOutcome};
use crate::scan::ScanContext;
use crate::storage::naming::PREFIX_DELIMITER;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardReport {
    pub prefix: String,
    pub outcome: ShardOutcome,
    pub traces: usize,
}

#[derive(Debug, Clone, Default)]
pub struct StructuralResult {
    pub aggregate: AggregateResult,
    /// One report per shard, sorted by prefix.
    pub shards: Vec<ShardReport>,
}

/// Traces in the window whose structure embeds the query graph.
///
/// One task per shard prefix; fragments are merged on the calling task in
/// completion order. The first failing shard fails the whole scan and the
/// remaining tasks are detached.
pub async fn traces_by_structure(ctx: Arc<ScanContext>) -> Result<StructuralResult> {
    let bucket = ctx.naming.trace_hashes();
    let prefixes = ctx.store.list_prefixes(&bucket, PREFIX_DELIMITER).await?;
    debug!(shards = prefixes.len(), bucket = %bucket, "scanning shards");

    let mut tasks = JoinSet::new();
    for prefix in prefixes {
        let ctx = Arc::clone(&ctx);
        tasks.spawn(async move {
            let scanned = scan_shard(&ctx, &prefix).await;
            (prefix, scanned)
        });
    }

    let mut result = StructuralResult::default();
    while let Some(joined) = tasks.join_next().await {
        let (prefix, scanned) = match joined {
            Ok(done) => done,
            Err(e) => {
                tasks.detach_all();
                return Err(QueryError::Task(e));
            }
        };
        let fragment = match scanned {
            Ok(fragment) => fragment,
            Err(e) => {
                tasks.detach_all();
                return Err(QueryError::Shard {
                    prefix,
                    source: Box::new(e),
                });
            }
        };
        result.shards.push(ShardReport {
            prefix: fragment.prefix,
            outcome: fragment.outcome,
            traces: fragment.result.num_traces(),
        });
        result.aggregate.absorb(fragment.result);
    }

    result.shards.sort_by(|a, b| a.prefix.cmp(&b.prefix));
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::archive::{ArchiveWriter, ArchivedSpan, BatchContents};
    use crate::config::ExemplarMode;
    use crate::graph::TraceGraph;
    use crate::scan::strategy_for;
    use crate::span::SpanRecord;
    use crate::storage::{BatchName, BucketNaming, MemoryStore, ObjectStore};
    use crate::types::TimeWindow;

    fn span(trace: u8, id: u8, parent: Option<u8>, service: &str, instance: &str) -> ArchivedSpan {
        let record = SpanRecord {
            trace_id: vec![trace; 16],
            span_id: vec![trace, id, 0, 0, 0, 0, 0, 0],
            parent_span_id: parent.map(|p| vec![trace, p, 0, 0, 0, 0, 0, 0]).unwrap_or_default(),
            name: "op".into(),
            start_time_unix_nano: 1_100_000_000_000,
            end_time_unix_nano: 1_200_000_000_000,
            attributes: Default::default(),
        };
        ArchivedSpan::new(service, instance, record)
    }

    /// Shards `ab` and `cd`, each with one trace on its own instances.
    fn two_shards() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let writer = ArchiveWriter::new(store.as_ref(), BucketNaming::default());
        for (hash, trace, instance) in [("ab", 1u8, "x"), ("cd", 2u8, "y")] {
            let spans = vec![
                span(trace, 1, None, "frontend", instance),
                span(trace, 2, Some(1), "checkout", instance),
            ];
            writer
                .write_batch(&BatchContents::new(BatchName::new(hash, 1000, 2000), spans))
                .unwrap();
        }
        store
    }

    fn context(store: &Arc<MemoryStore>) -> Arc<ScanContext> {
        let store: Arc<dyn ObjectStore> = store.clone();
        Arc::new(ScanContext {
            store,
            naming: BucketNaming::default(),
            query: TraceGraph::from_parts(vec!["frontend".into(), "checkout".into()], [(0, 1)])
                .unwrap(),
            window: TimeWindow::new(1000, 2000).unwrap(),
            page_size: 10,
            strategy: strategy_for(ExemplarMode::Shared),
        })
    }

    #[tokio::test]
    async fn test_shards_merge_without_collisions() {
        let store = two_shards();
        let result = traces_by_structure(context(&store)).await.unwrap();

        let agg = &result.aggregate;
        agg.check_invariants().unwrap();
        assert_eq!(agg.num_traces(), 2);
        assert_eq!(agg.embeddings().len(), 2);
        assert_eq!(
            result.shards.iter().map(|s| s.prefix.as_str()).collect::<Vec<_>>(),
            vec!["ab/", "cd/"]
        );

        // Each trace resolves to the instances of its own shard's exemplar.
        for (b, batch) in agg.batch_names().iter().enumerate() {
            let instance = if batch.starts_with("ab") { "x" } else { "y" };
            for &t in agg.traces_of_batch(b) {
                for &e in agg.embeddings_of_trace(t) {
                    assert_eq!(agg.resolve_label(e, 0), Some(format!("frontend:{}", instance).as_str()));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_failing_shard_fails_scan() {
        let store = two_shards();
        store.fail_object("tracehashes-snicket2", "cd/cd-1000-2000");
        let err = traces_by_structure(context(&store)).await.unwrap_err();
        assert!(matches!(&err, QueryError::Shard { prefix, .. } if prefix == "cd/"));
        assert_eq!(err.code(), "STORAGE_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_missing_trace_hash_bucket() {
        let store = Arc::new(MemoryStore::new());
        let err = traces_by_structure(context(&store)).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
