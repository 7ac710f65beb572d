//! Trace call graphs and structural matching.

pub mod matcher;
pub mod trace_graph;

pub use matcher::{find_subgraph_embeddings, labels_equivalent, EmbeddingMap, WILDCARD_SERVICE};
pub use trace_graph::{root_service, service_of, GraphParts, TraceGraph};
