//! Hierarchical (folder) index: exact, supports range comparators.
//!
//! ```text
//! <index bucket>/<value>/<batch name>    newline-separated trace ids
//! ```

use futures_util::TryStreamExt;
use tracing::{debug, warn};

use crate::error::Result;
use crate::eval::condition::{Comparator, QueryCondition};
use crate::span::AttributeValue;
use crate::storage::naming::PREFIX_DELIMITER;
use crate::storage::{list_objects_with_prefix, read_to_string, BatchName, BucketNaming, ObjectStore};
use crate::summary::parse_trace_ids;
use crate::types::{ObjectTraces, TimeWindow};

/// Traces whose indexed value satisfies the condition, per in-window batch.
pub async fn lookup(
    store: &dyn ObjectStore,
    condition: &QueryCondition,
    window: &TimeWindow,
    page_size: usize,
) -> Result<ObjectTraces> {
    let bucket = BucketNaming::index(condition.property_name());

    let folders = if condition.comparator == Comparator::Equal {
        vec![format!("{}{}", condition.value, PREFIX_DELIMITER)]
    } else {
        store
            .list_prefixes(&bucket, PREFIX_DELIMITER)
            .await?
            .into_iter()
            .filter(|folder| {
                let value = folder.trim_end_matches(PREFIX_DELIMITER);
                condition.accepts(&AttributeValue::Str(value.to_string()))
            })
            .collect()
    };

    let mut out = ObjectTraces::new();
    for folder in &folders {
        let mut names = list_objects_with_prefix(store, &bucket, folder, page_size);
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
            let ids = parse_trace_ids(&read_to_string(store, &bucket, &name).await?);
            if !ids.is_empty() {
                out.entry(batch.to_string()).or_default().extend(ids);
            }
        }
    }
    debug!(bucket = %bucket, folders = folders.len(), batches = out.len(), "folder lookup finished");
    Ok(out)
}
