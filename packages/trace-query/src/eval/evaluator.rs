//! Existential condition check over surviving traces.
//!
//! A trace passes when one embedding satisfies every condition at once.
//! Each condition yields the set of embeddings under which it holds; the
//! sets are intersected per trace.

use std::collections::BTreeSet;

use rayon::prelude::*;

use crate::error::{QueryError, Result};
use crate::eval::condition::QueryCondition;
use crate::eval::fetch::{trace_position, FetchedData, SpanDataKey};
use crate::graph::service_of;
use crate::scan::AggregateResult;
use crate::span::{hex_decode, hex_encode, SpanRecord};
use crate::summary::{extract_trace, span_ids_with_label};
use crate::types::{object_trace_keys, ObjectTraceKey, ObjectTraces};

/// Summary span ids may be written in any hex case.
fn canonical_span_id(raw: &str) -> String {
    hex_decode(raw).map_or_else(|| raw.to_string(), |bytes| hex_encode(&bytes))
}

/// Spans of `trace_id` in `batch_name` that query node `node_index` maps
/// to under `embedding`.
pub fn spans_for_node<'a>(
    structural: &AggregateResult,
    data: &'a FetchedData,
    batch_name: &str,
    trace_id: &str,
    embedding: usize,
    node_index: usize,
) -> Result<Vec<&'a SpanRecord>> {
    let label = structural.resolve_label(embedding, node_index).ok_or_else(|| {
        QueryError::InconsistentState(format!("embedding {} has no node {}", embedding, node_index))
    })?;
    let table = data.span_table(&SpanDataKey::new(batch_name, service_of(label)))?;
    let Some(block) = extract_trace(data.summary(batch_name)?, trace_id) else {
        return Ok(Vec::new());
    };
    Ok(span_ids_with_label(block, label)
        .into_iter()
        .filter_map(|raw| table.get(&canonical_span_id(raw)))
        .collect())
}

/// A surviving pair with the embeddings under which every condition held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassedTrace {
    pub key: ObjectTraceKey,
    /// Embedding positions, ascending. All of the trace's embeddings when
    /// the query has no conditions.
    pub embeddings: Vec<usize>,
}

/// Embeddings of the trace that satisfy every condition, or `None` when no
/// single embedding does.
pub fn trace_satisfies(
    key: &ObjectTraceKey,
    trace: usize,
    conditions: &[QueryCondition],
    structural: &AggregateResult,
    data: &FetchedData,
) -> Result<Option<Vec<usize>>> {
    let mut remaining: BTreeSet<usize> = structural.embeddings_of_trace(trace).iter().copied().collect();
    for condition in conditions {
        let mut satisfying = BTreeSet::new();
        for &embedding in &remaining {
            let spans = spans_for_node(
                structural,
                data,
                &key.object,
                &key.trace_id,
                embedding,
                condition.node_index,
            )?;
            if spans.iter().any(|span| condition.evaluate(span)) {
                satisfying.insert(embedding);
            }
        }
        remaining = satisfying;
        if remaining.is_empty() {
            return Ok(None);
        }
    }
    Ok(Some(remaining.into_iter().collect()))
}

/// Surviving pairs whose traces satisfy all conditions, sorted by key.
pub fn satisfying_traces(
    survivors: &ObjectTraces,
    structural: &AggregateResult,
    conditions: &[QueryCondition],
    data: &FetchedData,
) -> Result<Vec<PassedTrace>> {
    let positions = structural.trace_positions();
    let keys: Vec<ObjectTraceKey> = object_trace_keys(survivors).collect();

    let verdicts: Vec<Option<PassedTrace>> = keys
        .into_par_iter()
        .map(|key| {
            let trace = trace_position(&positions, &key)?;
            let embeddings = trace_satisfies(&key, trace, conditions, structural, data)?;
            Ok(embeddings.map(|embeddings| PassedTrace { key, embeddings }))
        })
        .collect::<Result<_>>()?;

    let mut out: Vec<PassedTrace> = verdicts.into_iter().flatten().collect();
    out.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::condition::Comparator;
    use crate::graph::EmbeddingMap;
    use crate::span::{AttributeValue, SpanBatch, SpanField, SpanTable};
    use std::collections::BTreeMap;

    const BATCH: &str = "h-1000-2000";
    const TRACE: &str = "aa";

    // Query: two nodes. Exemplar nodes: 0 = api:a1, 1 = api:a2, 2 = db:d1, 3 = db:d2.
    // Embedding A maps (0, 1) -> (api:a1, db:d1); embedding B -> (api:a2, db:d2).
    const SUMMARY: &str = "Trace ID: aa:\n\
        :0000000000000001:api:a1\n\
        0000000000000001:0000000000000003:db:d1\n\
        :0000000000000002:api:a2\n\
        0000000000000002:00000000000000AA:db:d2\n";

    fn span(id: u8, status: i64, rows: i64) -> SpanRecord {
        let mut span_id = vec![0; 8];
        span_id[7] = id;
        let attributes = BTreeMap::from([
            ("http.status_code".to_string(), AttributeValue::Int(status)),
            ("db.rows".to_string(), AttributeValue::Int(rows)),
        ]);
        SpanRecord {
            trace_id: vec![0xaa],
            span_id,
            parent_span_id: Vec::new(),
            name: "op".into(),
            start_time_unix_nano: 0,
            end_time_unix_nano: 1,
            attributes,
        }
    }

    fn setup(db_rows_a: i64, db_rows_b: i64) -> (AggregateResult, FetchedData, ObjectTraces) {
        let mut agg = AggregateResult::new();
        let names = ["api:a1", "api:a2", "db:d1", "db:d2"].map(String::from).to_vec();
        let positions = agg.push_exemplar(
            names,
            vec![EmbeddingMap::new(vec![0, 2]), EmbeddingMap::new(vec![1, 3])],
        );
        agg.push_batch(BATCH.into(), vec![(TRACE.into(), positions)]).unwrap();

        let mut data = FetchedData::default();
        data.summaries.insert(BATCH.into(), SUMMARY.into());
        data.spans.insert(
            SpanDataKey::new(BATCH, "api"),
            SpanTable::from(SpanBatch {
                spans: vec![span(1, 500, 0), span(2, 200, 0)],
            }),
        );
        data.spans.insert(
            SpanDataKey::new(BATCH, "db"),
            SpanTable::from(SpanBatch {
                spans: vec![span(3, 0, db_rows_a), span(0xaa, 0, db_rows_b)],
            }),
        );
        let mut survivors = ObjectTraces::new();
        survivors.entry(BATCH.into()).or_default().insert(TRACE.into());
        (agg, data, survivors)
    }

    fn conditions() -> Vec<QueryCondition> {
        vec![
            QueryCondition::new(
                0,
                SpanField::Attribute("http.status_code".into()),
                Comparator::Equal,
                500i64,
            ),
            QueryCondition::new(
                1,
                SpanField::Attribute("db.rows".into()),
                Comparator::GreaterThan,
                10i64,
            ),
        ]
    }

    #[test]
    fn test_split_satisfaction_is_rejected() {
        // A satisfies the status condition only, B the rows condition only.
        let (agg, data, survivors) = setup(0, 50);
        let out = satisfying_traces(&survivors, &agg, &conditions(), &data).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_single_embedding_satisfying_all_passes() {
        let (agg, data, survivors) = setup(50, 0);
        let out = satisfying_traces(&survivors, &agg, &conditions(), &data).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].key, ObjectTraceKey::new(BATCH, TRACE));
        // Only embedding A (position 0) satisfies both.
        assert_eq!(out[0].embeddings, vec![0]);
    }

    #[test]
    fn test_zero_conditions_pass() {
        let (agg, data, survivors) = setup(0, 0);
        let out = satisfying_traces(&survivors, &agg, &[], &data).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].embeddings, vec![0, 1]);
    }

    #[test]
    fn test_surviving_embeddings_exclude_failed_ones() {
        // Only embedding B has more than 10 rows.
        let (agg, data, _) = setup(0, 50);
        let rows = QueryCondition::new(
            1,
            SpanField::Attribute("db.rows".into()),
            Comparator::GreaterThan,
            10i64,
        );
        let key = ObjectTraceKey::new(BATCH, TRACE);
        let kept = trace_satisfies(&key, 0, &[rows], &agg, &data).unwrap();
        assert_eq!(kept, Some(vec![1]));
    }

    #[test]
    fn test_missing_span_data_is_inconsistent() {
        let (agg, mut data, survivors) = setup(50, 0);
        data.spans.remove(&SpanDataKey::new(BATCH, "db"));
        let err = satisfying_traces(&survivors, &agg, &conditions(), &data).unwrap_err();
        assert_eq!(err.code(), "INCONSISTENT_STATE");
    }

    #[test]
    fn test_uppercase_summary_span_id_matches() {
        let (agg, data, _) = setup(0, 50);
        let spans = spans_for_node(&agg, &data, BATCH, TRACE, 1, 1).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].span_id_hex(), "00000000000000aa");
    }
}
