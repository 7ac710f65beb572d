//! How accepted traces of a shard get their embeddings.
//!
//! `SharedExemplar` assigns every trace the embeddings of the one exemplar
//! graph parsed for the shard. That assumes shards are structurally
//! homogeneous. `VerifiedExemplar` drops the assumption by matching each
//! trace against its own graph, reusing embeddings of equal graphs.

use tracing::{debug, warn};

use crate::config::ExemplarMode;
use crate::graph::{find_subgraph_embeddings, EmbeddingMap, TraceGraph};
use crate::scan::aggregate::AggregateResult;
use crate::summary::extract_trace;

/// Exemplar graphs of one shard with their embedding positions in the
/// shard fragment.
#[derive(Debug, Default)]
pub struct ShardExemplars {
    known: Vec<(TraceGraph, Vec<usize>)>,
}

impl ShardExemplars {
    /// Register the first exemplar of a shard.
    pub fn seed(
        fragment: &mut AggregateResult,
        graph: TraceGraph,
        embeddings: Vec<EmbeddingMap>,
    ) -> Self {
        let mut exemplars = Self::default();
        exemplars.register(fragment, graph, embeddings);
        exemplars
    }

    /// Embedding positions of the first exemplar.
    pub fn primary(&self) -> &[usize] {
        self.known.first().map(|(_, p)| p.as_slice()).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Embedding positions for `graph`, registering it as a new exemplar
    /// when no equal graph is known.
    pub fn positions_for(
        &mut self,
        fragment: &mut AggregateResult,
        query: &TraceGraph,
        graph: TraceGraph,
    ) -> Vec<usize> {
        if let Some((_, positions)) = self.known.iter().find(|(g, _)| *g == graph) {
            return positions.clone();
        }
        let embeddings = find_subgraph_embeddings(query, &graph);
        self.register(fragment, graph, embeddings)
    }

    fn register(
        &mut self,
        fragment: &mut AggregateResult,
        graph: TraceGraph,
        embeddings: Vec<EmbeddingMap>,
    ) -> Vec<usize> {
        let positions = fragment.push_exemplar(graph.node_names().to_vec(), embeddings);
        self.known.push((graph, positions.clone()));
        positions
    }
}

pub trait ExemplarStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether `embeddings_for` reads the batch summary.
    fn needs_summary(&self) -> bool;

    /// Whether a shard whose first exemplar has no embeddings is abandoned.
    fn stops_on_unmatched_exemplar(&self) -> bool {
        true
    }

    /// Whether boundary batches time each trace by its own root service
    /// rather than the exemplar's.
    fn times_by_own_root(&self) -> bool {
        false
    }

    /// Embedding positions for one accepted trace; empty drops the trace.
    fn embeddings_for(
        &self,
        exemplars: &mut ShardExemplars,
        fragment: &mut AggregateResult,
        query: &TraceGraph,
        trace_id: &str,
        summary: Option<&str>,
    ) -> Vec<usize>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SharedExemplar;

impl ExemplarStrategy for SharedExemplar {
    fn name(&self) -> &'static str {
        "shared"
    }

    fn needs_summary(&self) -> bool {
        false
    }

    fn embeddings_for(
        &self,
        exemplars: &mut ShardExemplars,
        _fragment: &mut AggregateResult,
        _query: &TraceGraph,
        _trace_id: &str,
        _summary: Option<&str>,
    ) -> Vec<usize> {
        exemplars.primary().to_vec()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VerifiedExemplar;

impl ExemplarStrategy for VerifiedExemplar {
    fn name(&self) -> &'static str {
        "verified"
    }

    fn needs_summary(&self) -> bool {
        true
    }

    fn stops_on_unmatched_exemplar(&self) -> bool {
        false
    }

    fn times_by_own_root(&self) -> bool {
        true
    }

    fn embeddings_for(
        &self,
        exemplars: &mut ShardExemplars,
        fragment: &mut AggregateResult,
        query: &TraceGraph,
        trace_id: &str,
        summary: Option<&str>,
    ) -> Vec<usize> {
        let Some(block) = summary.and_then(|s| extract_trace(s, trace_id)) else {
            debug!(trace_id, "trace missing from structural summary");
            return Vec::new();
        };
        match TraceGraph::parse(block) {
            Ok(graph) => exemplars.positions_for(fragment, query, graph),
            Err(e) => {
                warn!(trace_id, error = %e, "skipping unparseable trace");
                Vec::new()
            }
        }
    }
}

pub fn strategy_for(mode: ExemplarMode) -> Box<dyn ExemplarStrategy> {
    match mode {
        ExemplarMode::Shared => Box::new(SharedExemplar),
        ExemplarMode::Verified => Box::new(VerifiedExemplar),
    }
}
