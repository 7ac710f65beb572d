//! In-memory object store for tests and fixtures.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::{ObjectPage, ObjectSink, ObjectStore, StorageError, StorageResult};

#[derive(Debug, Default)]
struct Bucket {
    objects: BTreeMap<String, Vec<u8>>,
    labels: HashMap<String, String>,
}

/// Buckets of named byte blobs held behind a lock.
///
/// Page tokens are the last name of the previous page, so listings stay
/// consistent while objects are added concurrently.
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: RwLock<BTreeMap<String, Bucket>>,
    failing_buckets: RwLock<HashSet<String>>,
    failing_objects: RwLock<HashSet<(String, String)>>,
    page_limit: Option<usize>,
    reads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap every listing page at `limit` names regardless of the requested size.
    pub fn with_page_limit(limit: usize) -> Self {
        Self {
            page_limit: Some(limit.max(1)),
            ..Self::default()
        }
    }

    /// Make every operation on `bucket` fail with `StorageError::Transient`.
    pub fn fail_bucket(&self, bucket: &str) {
        self.failing_buckets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(bucket.to_string());
    }

    /// Make reads of one object fail with `StorageError::Transient`.
    pub fn fail_object(&self, bucket: &str, name: &str) {
        self.failing_objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((bucket.to_string(), name.to_string()));
    }

    /// Number of `read_object` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn remove_object(&self, bucket: &str, name: &str) -> bool {
        self.buckets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(bucket)
            .map(|b| b.objects.remove(name).is_some())
            .unwrap_or(false)
    }

    fn check_bucket(&self, bucket: &str) -> StorageResult<()> {
        let failing = self
            .failing_buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if failing.contains(bucket) {
            return Err(StorageError::Transient(format!("injected failure on {}", bucket)));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        page_token: Option<&str>,
        max_results: usize,
    ) -> StorageResult<ObjectPage> {
        self.check_bucket(bucket)?;
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        let b = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;

        let limit = match self.page_limit {
            Some(cap) => max_results.clamp(1, cap),
            None => max_results.max(1),
        };
        let lower = match page_token {
            Some(token) => Bound::Excluded(token.to_string()),
            None => Bound::Unbounded,
        };

        let mut names = Vec::with_capacity(limit);
        let mut more = false;
        for name in b
            .objects
            .range::<String, _>((lower, Bound::Unbounded))
            .map(|(name, _)| name)
            .filter(|name| prefix.map_or(true, |p| name.starts_with(p)))
        {
            if names.len() == limit {
                more = true;
                break;
            }
            names.push(name.clone());
        }

        let next_page_token = if more { names.last().cloned() } else { None };
        Ok(ObjectPage { names, next_page_token })
    }

    async fn list_prefixes(&self, bucket: &str, delimiter: &str) -> StorageResult<Vec<String>> {
        self.check_bucket(bucket)?;
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        let b = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;

        let mut prefixes: Vec<String> = b
            .objects
            .keys()
            .filter_map(|name| {
                name.find(delimiter)
                    .map(|pos| name[..pos + delimiter.len()].to_string())
            })
            .collect();
        prefixes.sort();
        prefixes.dedup();
        Ok(prefixes)
    }

    async fn list_buckets(&self) -> StorageResult<Vec<String>> {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        Ok(buckets.keys().cloned().collect())
    }

    async fn read_object(&self, bucket: &str, name: &str) -> StorageResult<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.check_bucket(bucket)?;
        {
            let failing = self
                .failing_objects
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if failing.contains(&(bucket.to_string(), name.to_string())) {
                return Err(StorageError::Transient(format!(
                    "injected failure on {}/{}",
                    bucket, name
                )));
            }
        }

        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        let b = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;
        b.objects
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                name: name.to_string(),
            })
    }

    async fn bucket_labels(&self, bucket: &str) -> StorageResult<HashMap<String, String>> {
        self.check_bucket(bucket)?;
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        buckets
            .get(bucket)
            .map(|b| b.labels.clone())
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))
    }
}

impl ObjectSink for MemoryStore {
    fn put_object(&self, bucket: &str, name: &str, data: Vec<u8>) -> StorageResult<()> {
        self.buckets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(bucket.to_string())
            .or_default()
            .objects
            .insert(name.to_string(), data);
        Ok(())
    }

    fn set_bucket_labels(&self, bucket: &str, labels: HashMap<String, String>) -> StorageResult<()> {
        self.buckets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(bucket.to_string())
            .or_default()
            .labels = labels;
        Ok(())
    }
}
