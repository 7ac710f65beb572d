//! Archive fixtures shared by integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use trace_query::archive::{ArchiveWriter, ArchivedSpan, BatchContents};
use trace_query::span::hex_encode;
use trace_query::storage::{BatchName, BucketNaming, MemoryStore, ObjectStore};
use trace_query::{AttributeValue, ExemplarMode, QueryConfig, SpanRecord, TraceGraph, TraceQueryEngine};

const NANOS: u64 = 1_000_000_000;

pub fn trace_id(trace: u8) -> Vec<u8> {
    let mut id = vec![0; 16];
    id[15] = trace;
    id
}

/// Hex form used in listings, summaries, and query results.
pub fn trace_hex(trace: u8) -> String {
    hex_encode(&trace_id(trace))
}

fn span_id(trace: u8, span: u8) -> Vec<u8> {
    vec![trace, 0, 0, 0, 0, 0, 0, span]
}

/// One span of `trace` recorded under `service:instance`, in unix seconds.
pub fn span(
    trace: u8,
    span: u8,
    parent: Option<u8>,
    service: &str,
    instance: &str,
    secs: (u64, u64),
) -> ArchivedSpan {
    let record = SpanRecord {
        trace_id: trace_id(trace),
        span_id: span_id(trace, span),
        parent_span_id: parent.map(|p| span_id(trace, p)).unwrap_or_default(),
        name: format!("{} op", service),
        start_time_unix_nano: secs.0 * NANOS,
        end_time_unix_nano: secs.1 * NANOS,
        attributes: BTreeMap::new(),
    };
    ArchivedSpan::new(service, instance, record)
}

pub fn with_attr(mut span: ArchivedSpan, key: &str, value: impl Into<AttributeValue>) -> ArchivedSpan {
    span.record.attributes.insert(key.to_string(), value.into());
    span
}

/// A call chain through `services`, each span the child of the previous.
/// Instances are `<service>-1`.
pub fn chain(trace: u8, services: &[&str], secs: (u64, u64)) -> Vec<ArchivedSpan> {
    services
        .iter()
        .enumerate()
        .map(|(i, service)| {
            let id = i as u8 + 1;
            let parent = (i > 0).then(|| id - 1);
            span(trace, id, parent, service, &format!("{}-1", service), secs)
        })
        .collect()
}

pub fn batch(hash: &str, start: u64, end: u64, spans: Vec<ArchivedSpan>) -> BatchContents {
    BatchContents::new(BatchName::new(hash, start, end), spans)
}

/// Write `batches` to a fresh store.
pub fn archive(batches: &[BatchContents]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    write(&store, batches);
    store
}

pub fn write(store: &MemoryStore, batches: &[BatchContents]) {
    let writer = ArchiveWriter::new(store, BucketNaming::default());
    for batch in batches {
        writer.write_batch(batch).unwrap();
    }
}

/// Query graph over bare service names; any instance matches.
pub fn pattern(services: &[&str], edges: &[(usize, usize)]) -> TraceGraph {
    TraceGraph::from_parts(
        services.iter().map(|s| s.to_string()).collect(),
        edges.iter().copied(),
    )
    .unwrap()
}

pub fn checkout_flow() -> TraceGraph {
    pattern(&["frontend", "checkout", "payment"], &[(0, 1), (1, 2)])
}

pub fn engine(store: &Arc<MemoryStore>, mode: ExemplarMode) -> TraceQueryEngine {
    let config = QueryConfig {
        exemplar_mode: mode,
        ..QueryConfig::default()
    };
    let store: Arc<dyn ObjectStore> = store.clone();
    TraceQueryEngine::new(store, config)
}
