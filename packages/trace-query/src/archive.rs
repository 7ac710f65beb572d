//! Writes archives in the layout the query engine reads.
//!
//! Used by tests and to build local directory archives for the CLI. One
//! call to `write_batch` produces all three representations of a batch: the
//! trace id listing, the structural summary, and the per-service span data.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::error::Result;
use crate::index::MembershipBlock;
use crate::span::{hex_encode, AttributeValue, SpanBatch, SpanField, SpanRecord};
use crate::storage::naming::{
    BLOOM_INDEX_LABEL, BUCKET_TYPE_LABEL_KEY, FOLDER_INDEX_LABEL, PREFIX_DELIMITER, SPAN_BUCKET_LABEL,
};
use crate::storage::{BatchName, BucketNaming, ObjectSink};
use crate::summary::TRACE_HEADER;

/// A span together with the node label it is recorded under.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivedSpan {
    pub service: String,
    pub instance: String,
    pub record: SpanRecord,
}

impl ArchivedSpan {
    pub fn new(service: impl Into<String>, instance: impl Into<String>, record: SpanRecord) -> Self {
        Self {
            service: service.into(),
            instance: instance.into(),
            record,
        }
    }
}

/// Everything recorded in one time batch of one shard.
#[derive(Debug, Clone)]
pub struct BatchContents {
    pub name: BatchName,
    pub spans: Vec<ArchivedSpan>,
}

impl BatchContents {
    pub fn new(name: BatchName, spans: Vec<ArchivedSpan>) -> Self {
        Self { name, spans }
    }

    /// Hex trace ids in first-seen order.
    pub fn trace_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for span in &self.spans {
            let id = span.record.trace_id_hex();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// Summary text: one block per trace, one `parent:span:service:instance`
    /// line per span.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for trace_id in self.trace_ids() {
            out.push_str(&format!("{}{}:\n", TRACE_HEADER, trace_id));
            for span in self.spans.iter().filter(|s| s.record.trace_id_hex() == trace_id) {
                out.push_str(&format!(
                    "{}:{}:{}:{}\n",
                    hex_encode(&span.record.parent_span_id),
                    span.record.span_id_hex(),
                    span.service,
                    span.instance
                ));
            }
        }
        out
    }

    /// `(trace id, value)` of every span carrying `field`.
    fn field_values(&self, field: &SpanField) -> Vec<(String, AttributeValue)> {
        self.spans
            .iter()
            .filter_map(|s| field.read(&s.record).map(|v| (s.record.trace_id_hex(), v)))
            .collect()
    }
}

pub struct ArchiveWriter<'a> {
    sink: &'a dyn ObjectSink,
    naming: BucketNaming,
}

impl<'a> ArchiveWriter<'a> {
    pub fn new(sink: &'a dyn ObjectSink, naming: BucketNaming) -> Self {
        Self { sink, naming }
    }

    fn label(value: &str) -> HashMap<String, String> {
        HashMap::from([(BUCKET_TYPE_LABEL_KEY.to_string(), value.to_string())])
    }

    /// Write listing, summary, and span data of one batch.
    pub fn write_batch(&self, batch: &BatchContents) -> Result<()> {
        let name = batch.name.to_string();
        let ids = batch.trace_ids();

        let listing = format!("{}{}{}", batch.name.hash, PREFIX_DELIMITER, name);
        let mut listed = ids.join("\n");
        listed.push('\n');
        self.sink
            .put_object(&self.naming.trace_hashes(), &listing, listed.into_bytes())?;
        self.sink.put_object(
            &self.naming.trace_structures(),
            &name,
            batch.summary().into_bytes(),
        )?;

        let mut by_service: BTreeMap<&str, Vec<SpanRecord>> = BTreeMap::new();
        for span in &batch.spans {
            by_service
                .entry(span.service.as_str())
                .or_default()
                .push(span.record.clone());
        }
        for (service, spans) in by_service {
            let bucket = self.naming.spans(service);
            self.sink
                .put_object(&bucket, &name, SpanBatch { spans }.to_json()?)?;
            self.sink
                .set_bucket_labels(&bucket, Self::label(SPAN_BUCKET_LABEL))?;
        }
        debug!(batch = %name, traces = ids.len(), "batch written");
        Ok(())
    }

    /// Membership index over `field`: one bincode block per batch.
    pub fn write_membership_index(&self, field: &SpanField, batches: &[BatchContents]) -> Result<()> {
        let bucket = BucketNaming::index(field.property_name());
        for batch in batches {
            let name = batch.name.to_string();
            let values = batch.field_values(field);
            let block = MembershipBlock::build(
                name.as_str(),
                values.iter().map(|(id, v)| (id.as_str(), v)),
            );
            self.sink.put_object(&bucket, &name, block.to_bytes()?)?;
        }
        self.sink
            .set_bucket_labels(&bucket, Self::label(BLOOM_INDEX_LABEL))?;
        Ok(())
    }

    /// Hierarchical index over `field`: `<value>/<batch>` trace id listings.
    pub fn write_folder_index(&self, field: &SpanField, batches: &[BatchContents]) -> Result<()> {
        let bucket = BucketNaming::index(field.property_name());
        for batch in batches {
            let name = batch.name.to_string();
            let mut by_value: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for (id, value) in batch.field_values(field) {
                let ids = by_value.entry(value.to_string()).or_default();
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            for (value, ids) in by_value {
                let object = format!("{}{}{}", value, PREFIX_DELIMITER, name);
                self.sink
                    .put_object(&bucket, &object, format!("{}\n", ids.join("\n")).into_bytes())?;
            }
        }
        self.sink
            .set_bucket_labels(&bucket, Self::label(FOLDER_INDEX_LABEL))?;
        Ok(())
    }
}
