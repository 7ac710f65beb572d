//! What a query returns for the traces that passed.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::eval::evaluator::{spans_for_node, PassedTrace};
use crate::eval::fetch::FetchedData;
use crate::scan::AggregateResult;
use crate::span::SpanField;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputProjection {
    /// Distinct trace ids.
    #[default]
    TraceIds,
    /// Distinct batch names holding a passing trace.
    BatchNames,
    /// One field of the span a query node maps to, per passing trace.
    SpanField { node_index: usize, field: SpanField },
}

impl OutputProjection {
    /// Query node whose span data the projection reads, if any.
    pub fn node_index(&self) -> Option<usize> {
        match self {
            OutputProjection::SpanField { node_index, .. } => Some(*node_index),
            _ => None,
        }
    }

    /// Project sorted `passed` traces. `SpanField` reads the first embedding
    /// that satisfied the conditions and skips traces whose span lacks the
    /// field.
    pub fn project(
        &self,
        passed: &[PassedTrace],
        structural: &AggregateResult,
        data: &FetchedData,
    ) -> Result<Vec<String>> {
        match self {
            OutputProjection::TraceIds => {
                let mut seen = BTreeSet::new();
                Ok(passed
                    .iter()
                    .filter(|p| seen.insert(p.key.trace_id.as_str()))
                    .map(|p| p.key.trace_id.clone())
                    .collect())
            }
            OutputProjection::BatchNames => {
                let batches: BTreeSet<&str> = passed.iter().map(|p| p.key.object.as_str()).collect();
                Ok(batches.into_iter().map(str::to_string).collect())
            }
            OutputProjection::SpanField { node_index, field } => {
                let mut out = Vec::with_capacity(passed.len());
                for PassedTrace { key, embeddings } in passed {
                    let Some(&embedding) = embeddings.first() else { continue };
                    let spans = spans_for_node(
                        structural,
                        data,
                        &key.object,
                        &key.trace_id,
                        embedding,
                        *node_index,
                    )?;
                    if let Some(value) = spans.iter().find_map(|span| field.read(span)) {
                        out.push(value.to_string());
                    }
                }
                Ok(out)
            }
        }
    }
}
