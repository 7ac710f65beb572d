//! Query entry point.
//!
//! A query runs in four phases:
//! 1. structural scan of every shard, concurrently with one index lookup per
//!    indexed condition
//! 2. N-way intersection of the lookups with the structural result
//! 3. fetch of summaries and span data for the survivors
//! 4. existential condition check, then output projection

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::QueryConfig;
use crate::error::{QueryError, Result};
use crate::eval::{
    fetch, plan_span_keys, satisfying_traces, Comparator, FetchedData, OutputProjection,
    QueryCondition,
};
use crate::graph::TraceGraph;
use crate::index::{self, classify, intersect, membership, IndexKind};
use crate::scan::{strategy_for, traces_by_structure, ScanContext, ShardReport};
use crate::span::SpanField;
use crate::storage::{list_objects, list_span_buckets, read_to_string, BatchName, BucketNaming, ObjectStore};
use crate::summary::parse_trace_ids;
use crate::types::{pair_count, ObjectTraceKey, ObjectTraces, TimeWindow};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: TraceGraph,
    pub start_time: u64,
    pub end_time: u64,
    #[serde(default)]
    pub conditions: Vec<QueryCondition>,
    #[serde(default)]
    pub projection: OutputProjection,
}

impl QueryRequest {
    pub fn new(query: TraceGraph, start_time: u64, end_time: u64) -> Self {
        Self {
            query,
            start_time,
            end_time,
            conditions: Vec::new(),
            projection: OutputProjection::default(),
        }
    }

    pub fn with_condition(mut self, condition: QueryCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_projection(mut self, projection: OutputProjection) -> Self {
        self.projection = projection;
        self
    }

    fn window(&self) -> Result<TimeWindow> {
        TimeWindow::new(self.start_time, self.end_time)
    }

    /// Every node index the request names exists in the query graph.
    fn validate(&self) -> Result<()> {
        let nodes = self.query.num_nodes();
        let named = self
            .conditions
            .iter()
            .map(|c| c.node_index)
            .chain(self.projection.node_index());
        for node in named {
            if node >= nodes {
                return Err(QueryError::InvalidQuery(format!(
                    "node index {} out of range for a {}-node query",
                    node, nodes
                )));
            }
        }
        Ok(())
    }
}

/// Full result of one query, for callers that want more than the values.
#[derive(Debug, Clone, Default)]
pub struct QueryOutcome {
    pub values: Vec<String>,
    /// Surviving `(batch, trace)` pairs, sorted.
    pub passed: Vec<ObjectTraceKey>,
    pub shards: Vec<ShardReport>,
    pub structural_matches: usize,
    pub candidates: usize,
}

pub struct TraceQueryEngine {
    store: Arc<dyn ObjectStore>,
    naming: BucketNaming,
    config: QueryConfig,
}

impl TraceQueryEngine {
    pub fn new(store: Arc<dyn ObjectStore>, config: QueryConfig) -> Self {
        Self {
            store,
            naming: BucketNaming::new(config.bucket_suffix.as_str()),
            config,
        }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn naming(&self) -> &BucketNaming {
        &self.naming
    }

    /// Projected values of every trace matching the request.
    pub async fn query(&self, request: &QueryRequest) -> Result<Vec<String>> {
        Ok(self.execute(request).await?.values)
    }

    pub async fn execute(&self, request: &QueryRequest) -> Result<QueryOutcome> {
        let started = Instant::now();
        let window = request.window()?;
        request.validate()?;

        let ctx = Arc::new(ScanContext {
            store: Arc::clone(&self.store),
            naming: self.naming.clone(),
            query: request.query.clone(),
            window,
            page_size: self.config.list_page_size,
            strategy: strategy_for(self.config.exemplar_mode),
        });
        // Dropping the handle on an early return detaches the scan.
        let structural_task = tokio::spawn(traces_by_structure(ctx));

        let index_results = self.lookup_indexed(&request.conditions, window).await?;
        let structural = structural_task.await??;

        let survivors = intersect(&index_results, &structural.aggregate);
        let candidates = pair_count(&survivors);
        debug!(
            indexed = index_results.len(),
            structural = structural.aggregate.num_traces(),
            candidates,
            "intersection finished"
        );

        let node_indices: Vec<usize> = request
            .conditions
            .iter()
            .map(|c| c.node_index)
            .chain(request.projection.node_index())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let data = if node_indices.is_empty() || survivors.is_empty() {
            FetchedData::default()
        } else {
            let keys = plan_span_keys(&survivors, &structural.aggregate, &node_indices)?;
            fetch(
                self.store.as_ref(),
                &self.naming,
                &survivors,
                keys,
                self.config.fetch_concurrency,
            )
            .await?
        };

        let passed = satisfying_traces(&survivors, &structural.aggregate, &request.conditions, &data)?;
        let values = request
            .projection
            .project(&passed, &structural.aggregate, &data)?;

        info!(
            shards = structural.shards.len(),
            structural = structural.aggregate.num_traces(),
            candidates,
            passed = passed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query finished"
        );
        Ok(QueryOutcome {
            values,
            passed: passed.into_iter().map(|p| p.key).collect(),
            shards: structural.shards,
            structural_matches: structural.aggregate.num_traces(),
            candidates,
        })
    }

    /// Classify each distinct property once, then look up every indexed
    /// condition in its own task. Unindexed conditions contribute nothing.
    async fn lookup_indexed(
        &self,
        conditions: &[QueryCondition],
        window: TimeWindow,
    ) -> Result<Vec<ObjectTraces>> {
        let mut kinds: HashMap<String, IndexKind> = HashMap::new();
        let mut tasks = JoinSet::new();
        for condition in conditions {
            let property = condition.property_name().to_string();
            let kind = match kinds.get(&property) {
                Some(&kind) => kind,
                None => {
                    let kind = classify(self.store.as_ref(), &property)
                        .await
                        .map_err(|e| index_error(&property, e))?;
                    debug!(property = %property, %kind, "index classified");
                    kinds.insert(property.clone(), kind);
                    kind
                }
            };
            if kind == IndexKind::None {
                continue;
            }
            let store = Arc::clone(&self.store);
            let condition = condition.clone();
            let page_size = self.config.list_page_size;
            tasks.spawn(async move {
                let found = index::lookup(store.as_ref(), &condition, kind, &window, page_size).await;
                (property, found)
            });
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            let (property, found) = match joined {
                Ok(done) => done,
                Err(e) => {
                    tasks.detach_all();
                    return Err(QueryError::Task(e));
                }
            };
            match found {
                Ok(found) => results.push(found),
                Err(e) => {
                    tasks.detach_all();
                    return Err(index_error(&property, e));
                }
            }
        }
        Ok(results)
    }

    /// Batches in the window whose listings hold `trace_id`.
    ///
    /// Uses the trace id index when one exists and falls back to reading
    /// every in-window listing. Membership hits may be false positives.
    pub async fn locate_trace(&self, trace_id: &str, window: TimeWindow) -> Result<Vec<String>> {
        let field = SpanField::TraceId;
        let property = field.property_name();
        let page_size = self.config.list_page_size;
        let store = self.store.as_ref();

        let mut found = match classify(store, property).await? {
            IndexKind::Membership => {
                membership::batches_containing(store, property, trace_id, &window, page_size).await?
            }
            IndexKind::Hierarchical => {
                let condition = QueryCondition::new(0, field.clone(), Comparator::Equal, trace_id);
                index::lookup(store, &condition, IndexKind::Hierarchical, &window, page_size)
                    .await?
                    .into_keys()
                    .collect()
            }
            IndexKind::None => self.scan_listings_for(trace_id, &window).await?,
        };
        found.sort();
        found.dedup();
        Ok(found)
    }

    async fn scan_listings_for(&self, trace_id: &str, window: &TimeWindow) -> Result<Vec<String>> {
        let store = self.store.as_ref();
        let bucket = self.naming.trace_hashes();
        let mut out = Vec::new();
        let mut names = list_objects(store, &bucket, self.config.list_page_size);
        while let Some(name) = names.try_next().await? {
            let batch = match BatchName::parse(&name) {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(object = %name, error = %e, "skipping object with unparseable batch name");
                    continue;
                }
            };
            if !batch.overlaps(window) {
                continue;
            }
            let listing = read_to_string(store, &bucket, &name).await?;
            if parse_trace_ids(&listing).iter().any(|id| id == trace_id) {
                out.push(batch.to_string());
            }
        }
        Ok(out)
    }

    /// Services with span data in the archive, sorted.
    pub async fn list_services(&self) -> Result<Vec<String>> {
        let suffix = self.naming.suffix();
        let mut services: Vec<String> = list_span_buckets(self.store.as_ref())
            .await?
            .into_iter()
            .map(|bucket| bucket.strip_suffix(suffix).unwrap_or(&bucket).to_string())
            .collect();
        services.sort();
        Ok(services)
    }
}

fn index_error(property: &str, source: QueryError) -> QueryError {
    QueryError::Index {
        property: property.to_string(),
        source: Box::new(source),
    }
}
