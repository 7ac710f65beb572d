//! Structural scan of one shard prefix.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use futures_util::TryStreamExt;
use tracing::{debug, warn};

use crate::error::Result;
use crate::graph::{find_subgraph_embeddings, root_service, TraceGraph};
use crate::scan::aggregate::AggregateResult;
use crate::scan::exemplar::ShardExemplars;
use crate::scan::ScanContext;
use crate::span::SpanBatch;
use crate::storage::{list_objects_with_prefix, read_to_string, BatchName};
use crate::summary::{extract_trace, first_present_trace, parse_trace_ids};

/// How a shard scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardOutcome {
    /// An exemplar was found and at least one query embedding exists.
    Matched,
    /// The exemplar graph has no embedding of the query.
    NoEmbeddings,
    /// No batch in the window yielded a usable exemplar.
    NoExemplar,
    /// The exemplar has no root span, so boundary batches cannot be filtered.
    NoRootService,
}

#[derive(Debug, Clone)]
pub struct ShardFragment {
    pub prefix: String,
    pub outcome: ShardOutcome,
    pub result: AggregateResult,
}

impl ShardFragment {
    fn new(prefix: &str, outcome: ShardOutcome, result: AggregateResult) -> Self {
        Self {
            prefix: prefix.to_string(),
            outcome,
            result,
        }
    }
}

struct Exemplar {
    exemplars: ShardExemplars,
    root_service: String,
}

/// Scan every in-window batch under `prefix` of the trace-hash bucket.
///
/// Storage failures other than a missing summary abort the scan.
pub async fn scan_shard(ctx: &ScanContext, prefix: &str) -> Result<ShardFragment> {
    let store = ctx.store.as_ref();
    let hashes_bucket = ctx.naming.trace_hashes();
    let structures_bucket = ctx.naming.trace_structures();
    let strategy = ctx.strategy.as_ref();

    let mut fragment = AggregateResult::new();
    let mut exemplar: Option<Exemplar> = None;
    let mut batches_scanned = 0usize;

    let mut names = list_objects_with_prefix(store, &hashes_bucket, prefix, ctx.page_size);
    while let Some(object_name) = names.try_next().await? {
        let batch = match BatchName::parse(&object_name) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(object = %object_name, error = %e, "skipping object with unparseable batch name");
                continue;
            }
        };
        if !batch.overlaps(&ctx.window) {
            continue;
        }

        let listing = read_to_string(store, &hashes_bucket, &object_name).await?;
        let trace_ids = parse_trace_ids(&listing);
        if trace_ids.is_empty() {
            continue;
        }
        batches_scanned += 1;
        let batch_name = batch.to_string();

        let summary = if exemplar.is_none() || strategy.needs_summary() {
            match read_to_string(store, &structures_bucket, &batch_name).await {
                Ok(summary) => Some(summary),
                Err(e) if e.is_not_found() => {
                    warn!(batch = %batch_name, "structural summary missing, skipping batch");
                    continue;
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        if exemplar.is_none() {
            let Some(text) = summary.as_deref() else { continue };
            let Some((exemplar_id, block)) = first_present_trace(text, &trace_ids) else {
                debug!(batch = %batch_name, "no listed trace present in summary");
                continue;
            };
            let graph = match TraceGraph::parse(block) {
                Ok(graph) if !graph.is_empty() => graph,
                Ok(_) => continue,
                Err(e) => {
                    warn!(batch = %batch_name, trace_id = exemplar_id, error = %e, "skipping unparseable exemplar");
                    continue;
                }
            };
            let embeddings = find_subgraph_embeddings(&ctx.query, &graph);

            let Some(root) = root_service(block) else {
                warn!(prefix, trace_id = exemplar_id, "exemplar has no root span");
                return Ok(ShardFragment::new(
                    prefix,
                    ShardOutcome::NoRootService,
                    AggregateResult::new(),
                ));
            };
            if embeddings.is_empty() && strategy.stops_on_unmatched_exemplar() {
                debug!(prefix, trace_id = exemplar_id, "exemplar has no embeddings");
                return Ok(ShardFragment::new(prefix, ShardOutcome::NoEmbeddings, fragment));
            }
            debug!(
                prefix,
                trace_id = exemplar_id,
                embeddings = embeddings.len(),
                "shard exemplar selected"
            );
            exemplar = Some(Exemplar {
                exemplars: ShardExemplars::seed(&mut fragment, graph, embeddings),
                root_service: root.to_string(),
            });
        }
        let Some(current) = exemplar.as_mut() else { continue };

        let accepted = if batch.within(&ctx.window) {
            trace_ids
        } else if let (true, Some(text)) = (strategy.times_by_own_root(), summary.as_deref()) {
            filter_by_own_root_timestamps(ctx, &batch_name, text, trace_ids).await?
        } else {
            filter_by_root_timestamps(ctx, &batch_name, &current.root_service, trace_ids).await?
        };

        let mut traces = Vec::with_capacity(accepted.len());
        for trace_id in accepted {
            let positions = strategy.embeddings_for(
                &mut current.exemplars,
                &mut fragment,
                &ctx.query,
                &trace_id,
                summary.as_deref(),
            );
            if !positions.is_empty() {
                traces.push((trace_id, positions));
            }
        }
        if !traces.is_empty() {
            fragment.push_batch(batch_name, traces)?;
        }
    }

    let outcome = match exemplar {
        None => ShardOutcome::NoExemplar,
        Some(_) if fragment.embeddings().is_empty() => ShardOutcome::NoEmbeddings,
        Some(_) => ShardOutcome::Matched,
    };
    debug!(
        prefix,
        batches = batches_scanned,
        traces = fragment.num_traces(),
        ?outcome,
        "shard scan finished"
    );
    Ok(ShardFragment::new(prefix, outcome, fragment))
}

/// Keep trace ids whose root-service interval overlaps the query window.
/// Traces without root-service spans in the batch are dropped.
async fn filter_by_root_timestamps(
    ctx: &ScanContext,
    batch_name: &str,
    root_service: &str,
    trace_ids: Vec<String>,
) -> Result<Vec<String>> {
    let bucket = ctx.naming.spans(root_service);
    let bytes = ctx.store.read_object(&bucket, batch_name).await?;
    let spans = SpanBatch::from_json(&bytes)?;

    let wanted: BTreeSet<String> = trace_ids.iter().cloned().collect();
    let intervals = spans.trace_intervals(&wanted);
    Ok(trace_ids
        .into_iter()
        .filter(|id| {
            intervals
                .get(id)
                .map_or(false, |&(start, end)| ctx.window.overlaps(start, end))
        })
        .collect())
}

/// Like `filter_by_root_timestamps`, but each trace is timed by the root
/// service of its own summary block. Span data of each root service is read
/// once; traces without a block or root span are dropped.
async fn filter_by_own_root_timestamps(
    ctx: &ScanContext,
    batch_name: &str,
    summary: &str,
    trace_ids: Vec<String>,
) -> Result<Vec<String>> {
    let mut by_root: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for trace_id in &trace_ids {
        match extract_trace(summary, trace_id).and_then(root_service) {
            Some(root) => by_root.entry(root).or_default().push(trace_id.clone()),
            None => debug!(batch = batch_name, trace_id = %trace_id, "no root span, dropping trace"),
        }
    }

    let mut kept = HashSet::new();
    for (root, ids) in by_root {
        kept.extend(filter_by_root_timestamps(ctx, batch_name, root, ids).await?);
    }
    Ok(trace_ids.into_iter().filter(|id| kept.contains(id)).collect())
}
