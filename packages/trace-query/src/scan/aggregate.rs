//! Structural scan result as append-only arenas plus index cross-maps.
//!
//! Every cross-map entry is a position in one of the arenas. Merging a
//! fragment appends its arenas and shifts each of its stored positions by
//! the pre-append length of the target arena, so no position ever refers
//! to another fragment's element.

use std::collections::{BTreeMap, HashMap};

use crate::error::{QueryError, Result};
use crate::graph::EmbeddingMap;
use crate::types::{ObjectTraceKey, ObjectTraces};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateResult {
    trace_ids: Vec<String>,
    batch_names: Vec<String>,
    embeddings: Vec<EmbeddingMap>,
    /// Node-name tables of the exemplar graphs embeddings point into.
    exemplars: Vec<Vec<String>>,
    batch_to_trace_indices: BTreeMap<usize, Vec<usize>>,
    trace_to_embedding_indices: BTreeMap<usize, Vec<usize>>,
    embedding_to_exemplar_index: Vec<usize>,
}

impl AggregateResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an exemplar and its embeddings; returns the embedding positions.
    pub fn push_exemplar(&mut self, node_names: Vec<String>, embeddings: Vec<EmbeddingMap>) -> Vec<usize> {
        let exemplar = self.exemplars.len();
        self.exemplars.push(node_names);
        let first = self.embeddings.len();
        for embedding in embeddings {
            self.embeddings.push(embedding);
            self.embedding_to_exemplar_index.push(exemplar);
        }
        (first..self.embeddings.len()).collect()
    }

    /// Append a batch with its accepted traces, each paired with embedding
    /// positions previously returned by `push_exemplar`.
    pub fn push_batch(&mut self, batch_name: String, traces: Vec<(String, Vec<usize>)>) -> Result<()> {
        let batch = self.batch_names.len();
        let mut indices = Vec::with_capacity(traces.len());
        for (trace_id, embedding_indices) in traces {
            if let Some(&bad) = embedding_indices.iter().find(|&&e| e >= self.embeddings.len()) {
                return Err(QueryError::InconsistentState(format!(
                    "trace {} refers to embedding {} of {}",
                    trace_id,
                    bad,
                    self.embeddings.len()
                )));
            }
            let trace = self.trace_ids.len();
            self.trace_ids.push(trace_id);
            self.trace_to_embedding_indices.insert(trace, embedding_indices);
            indices.push(trace);
        }
        self.batch_names.push(batch_name);
        self.batch_to_trace_indices.insert(batch, indices);
        Ok(())
    }

    /// Merge `other` into `self`, rewriting its positions.
    pub fn absorb(&mut self, other: AggregateResult) {
        let trace_offset = self.trace_ids.len();
        let batch_offset = self.batch_names.len();
        let embedding_offset = self.embeddings.len();
        let exemplar_offset = self.exemplars.len();

        self.trace_ids.extend(other.trace_ids);
        self.batch_names.extend(other.batch_names);
        self.embeddings.extend(other.embeddings);
        self.exemplars.extend(other.exemplars);

        self.embedding_to_exemplar_index.extend(
            other
                .embedding_to_exemplar_index
                .into_iter()
                .map(|x| x + exemplar_offset),
        );
        for (batch, traces) in other.batch_to_trace_indices {
            self.batch_to_trace_indices.insert(
                batch + batch_offset,
                traces.into_iter().map(|t| t + trace_offset).collect(),
            );
        }
        for (trace, embeddings) in other.trace_to_embedding_indices {
            self.trace_to_embedding_indices.insert(
                trace + trace_offset,
                embeddings.into_iter().map(|e| e + embedding_offset).collect(),
            );
        }
    }

    pub fn is_empty(&self) -> bool {
        self.trace_ids.is_empty()
    }

    pub fn num_traces(&self) -> usize {
        self.trace_ids.len()
    }

    pub fn trace_ids(&self) -> &[String] {
        &self.trace_ids
    }

    pub fn batch_names(&self) -> &[String] {
        &self.batch_names
    }

    pub fn embeddings(&self) -> &[EmbeddingMap] {
        &self.embeddings
    }

    pub fn exemplars(&self) -> &[Vec<String>] {
        &self.exemplars
    }

    pub fn trace_id(&self, trace: usize) -> Option<&str> {
        self.trace_ids.get(trace).map(String::as_str)
    }

    /// Trace positions of one batch position.
    pub fn traces_of_batch(&self, batch: usize) -> &[usize] {
        self.batch_to_trace_indices
            .get(&batch)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Embedding positions associated with one trace position.
    pub fn embeddings_of_trace(&self, trace: usize) -> &[usize] {
        self.trace_to_embedding_indices
            .get(&trace)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Exemplar node label that query node `query_node` maps to under
    /// embedding `embedding`.
    pub fn resolve_label(&self, embedding: usize, query_node: usize) -> Option<&str> {
        let candidate_node = self.embeddings.get(embedding)?.get(query_node)?;
        let exemplar = *self.embedding_to_exemplar_index.get(embedding)?;
        self.exemplars
            .get(exemplar)?
            .get(candidate_node)
            .map(String::as_str)
    }

    /// `batch name -> trace ids` view of the result.
    pub fn object_traces(&self) -> ObjectTraces {
        let mut out = ObjectTraces::new();
        for (&batch, traces) in &self.batch_to_trace_indices {
            let Some(name) = self.batch_names.get(batch) else { continue };
            let ids = out.entry(name.clone()).or_default();
            ids.extend(traces.iter().filter_map(|&t| self.trace_ids.get(t).cloned()));
        }
        out
    }

    /// `(batch name, trace id) -> trace position`; the first position wins.
    pub fn trace_positions(&self) -> HashMap<ObjectTraceKey, usize> {
        let mut out = HashMap::with_capacity(self.trace_ids.len());
        for (&batch, traces) in &self.batch_to_trace_indices {
            let Some(name) = self.batch_names.get(batch) else { continue };
            for &t in traces {
                if let Some(id) = self.trace_ids.get(t) {
                    out.entry(ObjectTraceKey::new(name.as_str(), id.as_str()))
                        .or_insert(t);
                }
            }
        }
        out
    }

    /// Verify that every stored position is in bounds of its arena.
    pub fn check_invariants(&self) -> Result<()> {
        let fail = |what: String| Err(QueryError::InconsistentState(what));

        if self.embedding_to_exemplar_index.len() != self.embeddings.len() {
            return fail(format!(
                "{} embeddings but {} exemplar links",
                self.embeddings.len(),
                self.embedding_to_exemplar_index.len()
            ));
        }
        for (e, &x) in self.embedding_to_exemplar_index.iter().enumerate() {
            let Some(names) = self.exemplars.get(x) else {
                return fail(format!("embedding {} links to missing exemplar {}", e, x));
            };
            if self.embeddings[e].as_slice().iter().any(|&n| n >= names.len()) {
                return fail(format!("embedding {} exceeds exemplar {} nodes", e, x));
            }
        }
        for (&b, traces) in &self.batch_to_trace_indices {
            if b >= self.batch_names.len() {
                return fail(format!("batch position {} out of range", b));
            }
            if let Some(&t) = traces.iter().find(|&&t| t >= self.trace_ids.len()) {
                return fail(format!("batch {} refers to trace {}", b, t));
            }
        }
        for (&t, embeddings) in &self.trace_to_embedding_indices {
            if t >= self.trace_ids.len() {
                return fail(format!("trace position {} out of range", t));
            }
            if let Some(&e) = embeddings.iter().find(|&&e| e >= self.embeddings.len()) {
                return fail(format!("trace {} refers to embedding {}", t, e));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    /// (batch, trace) -> set of (exemplar labels under each embedding).
    type Content = BTreeMap<(String, String), BTreeSet<Vec<String>>>;

    fn content(agg: &AggregateResult) -> Content {
        let mut out = Content::new();
        for (b, name) in agg.batch_names().iter().enumerate() {
            for &t in agg.traces_of_batch(b) {
                let labels: BTreeSet<Vec<String>> = agg
                    .embeddings_of_trace(t)
                    .iter()
                    .map(|&e| {
                        (0..agg.embeddings()[e].len())
                            .map(|q| agg.resolve_label(e, q).unwrap().to_string())
                            .collect()
                    })
                    .collect();
                out.insert((name.clone(), agg.trace_ids()[t].clone()), labels);
            }
        }
        out
    }

    fn fragment(shard: &str, traces: usize, embeddings: usize) -> AggregateResult {
        let mut agg = AggregateResult::new();
        let names: Vec<String> = (0..embeddings + 1)
            .map(|i| format!("{}-svc{}:inst", shard, i))
            .collect();
        let maps = (0..embeddings)
            .map(|i| EmbeddingMap::new(vec![i, i + 1]))
            .collect();
        let positions = agg.push_exemplar(names, maps);
        let ids = (0..traces)
            .map(|i| (format!("{}-t{}", shard, i), positions.clone()))
            .collect();
        agg.push_batch(format!("{}-100-200", shard), ids).unwrap();
        agg
    }

    #[test]
    fn test_absorb_offsets_every_cross_map() {
        let a = fragment("aa", 2, 2);
        let b = fragment("bb", 2, 2);

        let mut merged = AggregateResult::new();
        merged.absorb(a.clone());
        merged.absorb(b.clone());
        merged.check_invariants().unwrap();

        assert_eq!(merged.num_traces(), 4);
        assert_eq!(merged.embeddings().len(), 4);
        assert_eq!(merged.batch_names(), &["aa-100-200", "bb-100-200"]);

        // Second fragment's traces resolve to its own exemplar labels.
        for &t in merged.traces_of_batch(1) {
            assert!(merged.trace_ids()[t].starts_with("bb-"));
            for &e in merged.embeddings_of_trace(t) {
                assert!(e >= 2);
                assert!(merged.resolve_label(e, 0).unwrap().starts_with("bb-"));
            }
        }
        let mut expected = content(&a);
        expected.extend(content(&b));
        assert_eq!(content(&merged), expected);
    }

    #[test]
    fn test_push_batch_rejects_unknown_embedding() {
        let mut agg = AggregateResult::new();
        let err = agg
            .push_batch("h-1-2".into(), vec![("t1".into(), vec![0])])
            .unwrap_err();
        assert_eq!(err.code(), "INCONSISTENT_STATE");
    }

    #[test]
    fn test_object_traces_and_positions() {
        let agg = fragment("aa", 3, 1);
        let traces = agg.object_traces();
        assert_eq!(traces["aa-100-200"].len(), 3);

        let positions = agg.trace_positions();
        let t1 = positions[&ObjectTraceKey::new("aa-100-200", "aa-t1")];
        assert_eq!(agg.trace_id(t1), Some("aa-t1"));
    }

    #[test]
    fn test_check_invariants_detects_corruption() {
        let mut agg = fragment("aa", 1, 1);
        agg.embedding_to_exemplar_index[0] = 7;
        assert!(agg.check_invariants().is_err());
    }

    proptest! {
        #[test]
        fn prop_merge_order_does_not_change_content(
            sizes in proptest::collection::vec((0usize..4, 0usize..3), 1..6),
            seed in any::<u64>(),
        ) {
            let fragments: Vec<AggregateResult> = sizes
                .iter()
                .enumerate()
                .map(|(i, &(t, e))| fragment(&format!("s{}", i), t, e))
                .collect();

            let mut in_order = AggregateResult::new();
            for f in fragments.iter().cloned() {
                in_order.absorb(f);
            }

            // Deterministic shuffle from the seed.
            let mut order: Vec<usize> = (0..fragments.len()).collect();
            let mut state = seed;
            for i in (1..order.len()).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                order.swap(i, (state >> 33) as usize % (i + 1));
            }
            let mut shuffled = AggregateResult::new();
            for &i in &order {
                shuffled.absorb(fragments[i].clone());
            }

            prop_assert!(in_order.check_invariants().is_ok());
            prop_assert!(shuffled.check_invariants().is_ok());
            prop_assert_eq!(content(&in_order), content(&shuffled));
        }
    }
}
