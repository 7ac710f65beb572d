//! Membership (bloom) index: one block per batch, equality lookups only.
//!
//! Each object of the index bucket is named after its batch and holds a
//! bincode `MembershipBlock`. A block lists the batch's trace ids and a
//! bloom filter over `(trace id, value)` pairs, so a lookup tests every
//! listed id against the wanted value. Hits may be false positives.

use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{QueryError, Result};
use crate::eval::condition::{Comparator, QueryCondition};
use crate::index::bloom::{bloom_key, BloomFilter};
use crate::span::AttributeValue;
use crate::storage::{list_objects, BatchName, BucketNaming, ObjectStore};
use crate::types::{ObjectTraces, TimeWindow};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipBlock {
    pub batch_name: String,
    pub trace_ids: Vec<String>,
    pub filter: BloomFilter,
}

impl MembershipBlock {
    /// Block over `(trace id, value)` entries of one batch.
    pub fn build<'a>(
        batch_name: impl Into<String>,
        entries: impl IntoIterator<Item = (&'a str, &'a AttributeValue)>,
    ) -> Self {
        let entries: Vec<(&str, String)> = entries
            .into_iter()
            .map(|(id, value)| (id, value.to_string()))
            .collect();
        let mut filter = BloomFilter::with_capacity(entries.len());
        let mut trace_ids: Vec<String> = Vec::with_capacity(entries.len());
        for (id, value) in &entries {
            filter.insert(bloom_key(id, value));
            trace_ids.push(id.to_string());
        }
        trace_ids.sort();
        trace_ids.dedup();
        Self {
            batch_name: batch_name.into(),
            trace_ids,
            filter,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let block: Self = bincode::deserialize(bytes)
            .map_err(|e| QueryError::MalformedRecord(format!("membership block: {}", e)))?;
        block.filter.validate()?;
        Ok(block)
    }

    /// Listed trace ids that may carry `value`.
    pub fn candidates<'a>(&'a self, value: &AttributeValue) -> impl Iterator<Item = &'a str> + 'a {
        let value = value.to_string();
        self.trace_ids
            .iter()
            .filter(move |id| self.filter.may_contain(bloom_key(id, &value)))
            .map(String::as_str)
    }
}

/// Candidate traces for an equality condition, per in-window batch.
pub async fn lookup(
    store: &dyn ObjectStore,
    condition: &QueryCondition,
    window: &TimeWindow,
    page_size: usize,
) -> Result<ObjectTraces> {
    if condition.comparator != Comparator::Equal {
        return Err(QueryError::UnsupportedIndexOperation(format!(
            "membership index on '{}' supports equality only, got {}",
            condition.property_name(),
            condition.comparator
        )));
    }
    let bucket = BucketNaming::index(condition.property_name());
    let mut out = ObjectTraces::new();

    let mut names = list_objects(store, &bucket, page_size);
    while let Some(name) = names.try_next().await? {
        let batch = match BatchName::parse(&name) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(bucket = %bucket, object = %name, error = %e, "skipping index object");
                continue;
            }
        };
        if !batch.overlaps(window) {
            continue;
        }
        let block = MembershipBlock::from_bytes(&store.read_object(&bucket, &name).await?)?;
        let hits: Vec<String> = block.candidates(&condition.value).map(str::to_string).collect();
        if !hits.is_empty() {
            out.entry(batch.to_string()).or_default().extend(hits);
        }
    }
    debug!(bucket = %bucket, batches = out.len(), "membership lookup finished");
    Ok(out)
}

/// Batches whose block in a trace-id keyed index may hold `trace_id`.
pub async fn batches_containing(
    store: &dyn ObjectStore,
    property_name: &str,
    trace_id: &str,
    window: &TimeWindow,
    page_size: usize,
) -> Result<Vec<String>> {
    let value = AttributeValue::from(trace_id);
    let bucket = BucketNaming::index(property_name);
    let mut out = Vec::new();
    let mut names = list_objects(store, &bucket, page_size);
    while let Some(name) = names.try_next().await? {
        let batch = match BatchName::parse(&name) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(bucket = %bucket, object = %name, error = %e, "skipping index object");
                continue;
            }
        };
        if !batch.overlaps(window) {
            continue;
        }
        let block = MembershipBlock::from_bytes(&store.read_object(&bucket, &name).await?)?;
        if block.candidates(&value).any(|id| id == trace_id) {
            out.push(batch.to_string());
        }
    }
    Ok(out)
}
