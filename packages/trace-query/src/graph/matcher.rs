//! Subgraph embedding search.
//!
//! An embedding maps every query node to a distinct candidate node so that
//! each query edge lands on a candidate edge and mapped nodes belong to the
//! same service. The match is non-induced: the candidate may have extra edges
//! between mapped nodes.
//!
//! Search is plain backtracking. Each query node gets a domain of candidate
//! nodes that pass the label and degree filters; nodes are visited smallest
//! domain first, preferring nodes already connected to visited ones so edge
//! checks prune early.

use serde::{Deserialize, Serialize};

use super::trace_graph::{service_of, TraceGraph};

/// Query label that matches a node of any service.
pub const WILDCARD_SERVICE: &str = "*";

/// Query node index -> candidate node index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EmbeddingMap(Vec<usize>);

impl EmbeddingMap {
    pub fn new(mapping: Vec<usize>) -> Self {
        Self(mapping)
    }

    /// Candidate node assigned to query node `query_node`.
    pub fn get(&self, query_node: usize) -> Option<usize> {
        self.0.get(query_node).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }
}

/// Node equivalence: wildcard, or same service ignoring the instance part.
pub fn labels_equivalent(query_label: &str, candidate_label: &str) -> bool {
    query_label == WILDCARD_SERVICE || service_of(query_label) == service_of(candidate_label)
}

/// All embeddings of `query` into `candidate`.
///
/// An empty query or candidate has no embeddings.
pub fn find_subgraph_embeddings(query: &TraceGraph, candidate: &TraceGraph) -> Vec<EmbeddingMap> {
    let nq = query.num_nodes();
    let nc = candidate.num_nodes();
    if nq == 0 || nc == 0 || nq > nc {
        return Vec::new();
    }

    let q_deg = Degrees::of(query);
    let c_deg = Degrees::of(candidate);

    let mut domains = Vec::with_capacity(nq);
    for q in 0..nq {
        let domain: Vec<usize> = (0..nc)
            .filter(|&c| {
                labels_equivalent(&query.node_names()[q], &candidate.node_names()[c])
                    && c_deg.out[c] >= q_deg.out[q]
                    && c_deg.inc[c] >= q_deg.inc[q]
                    && (!q_deg.self_loop[q] || c_deg.self_loop[c])
            })
            .collect();
        if domain.is_empty() {
            return Vec::new();
        }
        domains.push(domain);
    }

    let order = visit_order(query, &domains);
    let checks = edge_checks(query, &order);

    let mut search = Search {
        candidate,
        domains: &domains,
        order: &order,
        checks: &checks,
        assignment: vec![usize::MAX; nq],
        used: vec![false; nc],
        found: Vec::new(),
    };
    search.extend(0);
    search.found
}

struct Degrees {
    out: Vec<usize>,
    inc: Vec<usize>,
    self_loop: Vec<bool>,
}

impl Degrees {
    fn of(graph: &TraceGraph) -> Self {
        let n = graph.num_nodes();
        let mut degrees = Self {
            out: vec![0; n],
            inc: vec![0; n],
            self_loop: vec![false; n],
        };
        for &(from, to) in graph.edges() {
            degrees.out[from] += 1;
            degrees.inc[to] += 1;
            if from == to {
                degrees.self_loop[from] = true;
            }
        }
        degrees
    }
}

/// Smallest domain first, connected nodes before unconnected ones.
fn visit_order(query: &TraceGraph, domains: &[Vec<usize>]) -> Vec<usize> {
    let n = query.num_nodes();
    let mut neighbours = vec![Vec::new(); n];
    for &(from, to) in query.edges() {
        if from != to {
            neighbours[from].push(to);
            neighbours[to].push(from);
        }
    }

    let mut placed = vec![false; n];
    let mut touched = vec![false; n];
    let mut order = Vec::with_capacity(n);
    while order.len() < n {
        let next = (0..n)
            .filter(|&q| !placed[q])
            .min_by_key(|&q| (!touched[q], domains[q].len(), q));
        let Some(next) = next else { break };
        placed[next] = true;
        for &nb in &neighbours[next] {
            touched[nb] = true;
        }
        order.push(next);
    }
    order
}

/// A query edge to verify once both endpoints are assigned.
#[derive(Debug, Clone, Copy)]
struct EdgeCheck {
    other: usize,
    outgoing: bool,
}

/// For each depth, the query edges closed by assigning `order[depth]`.
fn edge_checks(query: &TraceGraph, order: &[usize]) -> Vec<Vec<EdgeCheck>> {
    let mut position = vec![0; order.len()];
    for (depth, &q) in order.iter().enumerate() {
        position[q] = depth;
    }

    let mut checks = vec![Vec::new(); order.len()];
    for &(from, to) in query.edges() {
        let (depth, check) = if position[from] >= position[to] {
            (position[from], EdgeCheck { other: to, outgoing: true })
        } else {
            (position[to], EdgeCheck { other: from, outgoing: false })
        };
        checks[depth].push(check);
    }
    checks
}

struct Search<'a> {
    candidate: &'a TraceGraph,
    domains: &'a [Vec<usize>],
    order: &'a [usize],
    checks: &'a [Vec<EdgeCheck>],
    assignment: Vec<usize>,
    used: Vec<bool>,
    found: Vec<EmbeddingMap>,
}

impl Search<'_> {
    fn extend(&mut self, depth: usize) {
        if depth == self.order.len() {
            self.found.push(EmbeddingMap(self.assignment.clone()));
            return;
        }
        let q = self.order[depth];
        for &c in &self.domains[q] {
            if self.used[c] || !self.edges_hold(depth, q, c) {
                continue;
            }
            self.assignment[q] = c;
            self.used[c] = true;
            self.extend(depth + 1);
            self.used[c] = false;
            self.assignment[q] = usize::MAX;
        }
    }

    fn edges_hold(&self, depth: usize, q: usize, c: usize) -> bool {
        self.checks[depth].iter().all(|check| {
            let other = if check.other == q { c } else { self.assignment[check.other] };
            if check.outgoing {
                self.candidate.has_edge(c, other)
            } else {
                self.candidate.has_edge(other, c)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn graph(names: &[&str], edges: &[(usize, usize)]) -> TraceGraph {
        TraceGraph::from_parts(
            names.iter().map(|s| s.to_string()).collect(),
            edges.iter().copied(),
        )
        .unwrap()
    }

    fn brute_force(query: &TraceGraph, candidate: &TraceGraph) -> BTreeSet<EmbeddingMap> {
        fn go(
            q: usize,
            query: &TraceGraph,
            candidate: &TraceGraph,
            current: &mut Vec<usize>,
            out: &mut BTreeSet<EmbeddingMap>,
        ) {
            if q == query.num_nodes() {
                let ok = query
                    .edges()
                    .iter()
                    .all(|&(a, b)| candidate.has_edge(current[a], current[b]));
                if ok {
                    out.insert(EmbeddingMap(current.clone()));
                }
                return;
            }
            for c in 0..candidate.num_nodes() {
                if current.contains(&c)
                    || !labels_equivalent(&query.node_names()[q], &candidate.node_names()[c])
                {
                    continue;
                }
                current.push(c);
                go(q + 1, query, candidate, current, out);
                current.pop();
            }
        }
        let mut out = BTreeSet::new();
        if query.num_nodes() > 0 && candidate.num_nodes() > 0 {
            go(0, query, candidate, &mut Vec::new(), &mut out);
        }
        out
    }

    #[test]
    fn test_chain_in_chain() {
        let query = graph(&["frontend", "checkout", "payment"], &[(0, 1), (1, 2)]);
        // Candidate numbering as parsed: checkout, frontend, payment.
        let candidate = graph(
            &["checkout:co-1", "frontend:fe-1", "payment:pay-1"],
            &[(1, 0), (0, 2)],
        );
        let found = find_subgraph_embeddings(&query, &candidate);
        assert_eq!(found, vec![EmbeddingMap::new(vec![1, 0, 2])]);
    }

    #[test]
    fn test_missing_edge_has_no_embedding() {
        let query = graph(&["frontend", "checkout", "payment"], &[(0, 1), (1, 2)]);
        let candidate = graph(
            &["checkout:co-1", "frontend:fe-1", "payment:pay-1"],
            &[(1, 0), (1, 2)],
        );
        assert!(find_subgraph_embeddings(&query, &candidate).is_empty());
    }

    #[test]
    fn test_non_induced_match() {
        // Candidate has an extra edge frontend -> payment.
        let query = graph(&["frontend", "checkout"], &[(0, 1)]);
        let candidate = graph(
            &["checkout:co-1", "frontend:fe-1", "payment:pay-1"],
            &[(1, 0), (0, 2), (1, 2)],
        );
        assert_eq!(
            find_subgraph_embeddings(&query, &candidate),
            vec![EmbeddingMap::new(vec![1, 0])]
        );
    }

    #[test]
    fn test_wildcard_fans_out() {
        let query = graph(&["frontend", WILDCARD_SERVICE], &[(0, 1)]);
        let candidate = graph(
            &["cart:c-1", "frontend:fe-1", "search:s-1"],
            &[(1, 0), (1, 2)],
        );
        let found: BTreeSet<EmbeddingMap> =
            find_subgraph_embeddings(&query, &candidate).into_iter().collect();
        let expected: BTreeSet<EmbeddingMap> =
            [EmbeddingMap::new(vec![1, 0]), EmbeddingMap::new(vec![1, 2])].into();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_instances_of_one_service_are_equivalent() {
        let query = graph(&["frontend", "cache"], &[(0, 1)]);
        let candidate = graph(
            &["cache:c-1", "cache:c-2", "frontend:fe-1"],
            &[(2, 0), (2, 1)],
        );
        assert_eq!(find_subgraph_embeddings(&query, &candidate).len(), 2);
    }

    #[test]
    fn test_single_node_query() {
        let query = graph(&["payment"], &[]);
        let candidate = graph(&["checkout:co-1", "payment:pay-1"], &[(0, 1)]);
        assert_eq!(
            find_subgraph_embeddings(&query, &candidate),
            vec![EmbeddingMap::new(vec![1])]
        );
    }

    #[test]
    fn test_empty_graphs() {
        let empty = graph(&[], &[]);
        let candidate = graph(&["a:1", "b:1"], &[(0, 1)]);
        assert!(find_subgraph_embeddings(&empty, &candidate).is_empty());
        assert!(find_subgraph_embeddings(&candidate, &empty).is_empty());
    }

    #[test]
    fn test_self_loop_requires_self_loop() {
        let query = graph(&["cache"], &[(0, 0)]);
        let without = graph(&["cache:c-1"], &[]);
        let with = graph(&["cache:c-1"], &[(0, 0)]);
        assert!(find_subgraph_embeddings(&query, &without).is_empty());
        assert_eq!(find_subgraph_embeddings(&query, &with).len(), 1);
    }

    fn arb_graph(
        labels: &'static [&'static str],
        max_nodes: usize,
        max_edges: usize,
    ) -> impl Strategy<Value = TraceGraph> {
        (1..=max_nodes).prop_flat_map(move |n| {
            (
                proptest::collection::vec(proptest::sample::select(labels), n),
                proptest::collection::vec((0..n, 0..n), 0..=max_edges),
            )
                .prop_map(|(names, edges)| {
                    TraceGraph::from_parts(names.into_iter().map(String::from).collect(), edges)
                        .unwrap()
                })
        })
    }

    const QUERY_LABELS: &[&str] = &["a", "b", "c", "*"];
    const CANDIDATE_LABELS: &[&str] = &["a:1", "a:2", "b:1", "c:1"];

    proptest! {
        #[test]
        fn prop_embeddings_are_valid(
            query in arb_graph(QUERY_LABELS, 4, 5),
            candidate in arb_graph(CANDIDATE_LABELS, 6, 10),
        ) {
            for m in find_subgraph_embeddings(&query, &candidate) {
                prop_assert_eq!(m.len(), query.num_nodes());
                let distinct: BTreeSet<usize> = m.as_slice().iter().copied().collect();
                prop_assert_eq!(distinct.len(), m.len());
                for &(a, b) in query.edges() {
                    prop_assert!(candidate.has_edge(m.as_slice()[a], m.as_slice()[b]));
                }
                for (q, &c) in m.as_slice().iter().enumerate() {
                    prop_assert!(labels_equivalent(
                        &query.node_names()[q],
                        &candidate.node_names()[c]
                    ));
                }
            }
        }

        #[test]
        fn prop_matches_brute_force(
            query in arb_graph(QUERY_LABELS, 3, 4),
            candidate in arb_graph(CANDIDATE_LABELS, 5, 8),
        ) {
            let found = find_subgraph_embeddings(&query, &candidate);
            let as_set: BTreeSet<EmbeddingMap> = found.iter().cloned().collect();
            prop_assert_eq!(as_set.len(), found.len());
            prop_assert_eq!(as_set, brute_force(&query, &candidate));
        }
    }
}
