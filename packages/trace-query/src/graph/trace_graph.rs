//! Directed call graph of one trace, collapsed to service instances.
//!
//! Structural summaries list one span per line:
//!
//! ```text
//! Trace ID: 4bf92f3577b34da6a3ce929d0e0e4736:
//! :a1:frontend:frontend-7d9f
//! a1:b2:checkout:checkout-5c4b
//! b2:c3:payment:payment-1a2b
//! ```
//!
//! Fields are `parent_span:span:service:instance`; the root span has an empty
//! parent. Every distinct `service:instance` label becomes one node, so two
//! spans of the same instance share a node.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{QueryError, Result};
use crate::summary::TRACE_HEADER;

const SPAN_LINE_FIELDS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "GraphParts", into = "GraphParts")]
pub struct TraceGraph {
    node_names: Vec<String>,
    edges: BTreeSet<(usize, usize)>,
}

/// Serialized form of a `TraceGraph`; validated on conversion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphParts {
    pub node_names: Vec<String>,
    #[serde(default)]
    pub edges: Vec<(usize, usize)>,
}

impl TryFrom<GraphParts> for TraceGraph {
    type Error = QueryError;

    fn try_from(parts: GraphParts) -> Result<Self> {
        TraceGraph::from_parts(parts.node_names, parts.edges)
    }
}

impl From<TraceGraph> for GraphParts {
    fn from(graph: TraceGraph) -> Self {
        GraphParts {
            node_names: graph.node_names,
            edges: graph.edges.into_iter().collect(),
        }
    }
}

impl TraceGraph {
    /// Build a graph from node labels and `(from, to)` index pairs.
    pub fn from_parts(
        node_names: Vec<String>,
        edges: impl IntoIterator<Item = (usize, usize)>,
    ) -> Result<Self> {
        let n = node_names.len();
        let mut edge_set = BTreeSet::new();
        for (from, to) in edges {
            if from >= n || to >= n {
                return Err(QueryError::InvalidQuery(format!(
                    "edge ({}, {}) out of range for {} nodes",
                    from, to, n
                )));
            }
            edge_set.insert((from, to));
        }
        Ok(Self {
            node_names,
            edges: edge_set,
        })
    }

    /// Parse one trace block of a structural summary.
    pub fn parse(trace: &str) -> Result<Self> {
        let mut span_labels: HashMap<&str, String> = HashMap::new();
        let mut links: Vec<(&str, &str)> = Vec::new();

        for line in trace.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with(TRACE_HEADER) {
                continue;
            }
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() != SPAN_LINE_FIELDS {
                return Err(QueryError::MalformedRecord(format!(
                    "span line '{}' has {} fields, expected {}",
                    line,
                    fields.len(),
                    SPAN_LINE_FIELDS
                )));
            }
            span_labels.insert(fields[1], format!("{}:{}", fields[2], fields[3]));
            if !fields[0].is_empty() {
                links.push((fields[0], fields[1]));
            }
        }

        if span_labels.is_empty() {
            return Err(QueryError::MalformedRecord(
                "trace summary has no span lines".to_string(),
            ));
        }

        // Lexicographic numbering: equal label sets give equal node indices.
        let labels: BTreeSet<&String> = span_labels.values().collect();
        let index: BTreeMap<&str, usize> = labels
            .iter()
            .enumerate()
            .map(|(i, label)| (label.as_str(), i))
            .collect();

        let mut edges = BTreeSet::new();
        for (parent, child) in links {
            let from = span_labels.get(parent).and_then(|l| index.get(l.as_str()));
            let to = span_labels.get(child).and_then(|l| index.get(l.as_str()));
            match (from, to) {
                (Some(&from), Some(&to)) => {
                    edges.insert((from, to));
                }
                _ => debug!(
                    parent_span = parent,
                    child_span = child,
                    "skipping link to span missing from summary"
                ),
            }
        }

        let node_names = labels.into_iter().cloned().collect();
        Ok(Self { node_names, edges })
    }

    pub fn num_nodes(&self) -> usize {
        self.node_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_names.is_empty()
    }

    pub fn node_names(&self) -> &[String] {
        &self.node_names
    }

    pub fn node_name(&self, index: usize) -> Option<&str> {
        self.node_names.get(index).map(String::as_str)
    }

    pub fn edges(&self) -> &BTreeSet<(usize, usize)> {
        &self.edges
    }

    pub fn has_edge(&self, from: usize, to: usize) -> bool {
        self.edges.contains(&(from, to))
    }
}

/// Service of the root span (the line with an empty parent field).
pub fn root_service(trace: &str) -> Option<&str> {
    trace
        .lines()
        .filter(|line| line.starts_with(':'))
        .find_map(|line| line.split(':').nth(2))
        .filter(|service| !service.is_empty())
}

/// Service part of a node label: text before the first `:`.
pub fn service_of(label: &str) -> &str {
    label.split_once(':').map_or(label, |(service, _)| service)
}
