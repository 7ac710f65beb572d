//! N-way intersection of index candidates with the structural result.

use std::collections::HashMap;

use crate::scan::AggregateResult;
use crate::types::{object_trace_keys, ObjectTraceKey, ObjectTraces};

/// `(object, trace)` pairs present in every index result and in the
/// structural result.
///
/// Each source votes at most once per key, so two conditions over the same
/// property cannot let a pair through on one source's votes.
pub fn intersect(index_results: &[ObjectTraces], structural: &AggregateResult) -> ObjectTraces {
    let goal = index_results.len() + 1;
    let structural = structural.object_traces();

    let mut votes: HashMap<ObjectTraceKey, usize> = HashMap::new();
    for source in index_results.iter().chain(std::iter::once(&structural)) {
        for key in object_trace_keys(source) {
            *votes.entry(key).or_insert(0) += 1;
        }
    }

    let mut out = ObjectTraces::new();
    for (key, count) in votes {
        if count == goal {
            out.entry(key.object).or_default().insert(key.trace_id);
        }
    }
    out
}
