//! Object storage collaborator.
//!
//! The engine only ever talks to storage through `ObjectStore`. Listings are
//! paginated at the trait level and exposed to callers as lazy streams, so
//! archives larger than memory are consumed incrementally.
//!
//! Implementations:
//! - `MemoryStore` - ephemeral, for tests and fixtures
//! - `FsStore` - directory-backed, for the CLI and local archives

pub mod fs;
pub mod memory;
pub mod naming;

pub use fs::FsStore;
pub use memory::MemoryStore;
pub use naming::{BatchName, BucketNaming};

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use thiserror::Error;

use crate::error::{QueryError, Result};

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Object not found: {bucket}/{name}")]
    NotFound { bucket: String, name: String },

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Storage unavailable: {0}")]
    Transient(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. } | StorageError::BucketNotFound(_))
    }
}

/// One page of an object listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPage {
    pub names: Vec<String>,
    /// Opaque continuation token; `None` on the last page.
    pub next_page_token: Option<String>,
}

/// Read side of an object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List one page of object names in `bucket`, optionally under `prefix`.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        page_token: Option<&str>,
        max_results: usize,
    ) -> StorageResult<ObjectPage>;

    /// Distinct leading prefixes up to and including the first `delimiter`.
    async fn list_prefixes(&self, bucket: &str, delimiter: &str) -> StorageResult<Vec<String>>;

    /// Names of all buckets.
    async fn list_buckets(&self) -> StorageResult<Vec<String>>;

    async fn read_object(&self, bucket: &str, name: &str) -> StorageResult<Vec<u8>>;

    /// Bucket labels; `BucketNotFound` when the bucket does not exist.
    async fn bucket_labels(&self, bucket: &str) -> StorageResult<HashMap<String, String>>;
}

/// Write side used by `archive::ArchiveWriter` to lay out test and local archives.
pub trait ObjectSink {
    fn put_object(&self, bucket: &str, name: &str, data: Vec<u8>) -> StorageResult<()>;

    fn set_bucket_labels(&self, bucket: &str, labels: HashMap<String, String>) -> StorageResult<()>;
}

enum ListState {
    Start,
    Next(String),
    Done,
}

/// Lazily list every object name in `bucket`.
pub fn list_objects<'a>(
    store: &'a dyn ObjectStore,
    bucket: &'a str,
    page_size: usize,
) -> BoxStream<'a, StorageResult<String>> {
    paged_listing(store, bucket, None, page_size)
}

/// Lazily list object names in `bucket` that start with `prefix`.
pub fn list_objects_with_prefix<'a>(
    store: &'a dyn ObjectStore,
    bucket: &'a str,
    prefix: &'a str,
    page_size: usize,
) -> BoxStream<'a, StorageResult<String>> {
    paged_listing(store, bucket, Some(prefix), page_size)
}

fn paged_listing<'a>(
    store: &'a dyn ObjectStore,
    bucket: &'a str,
    prefix: Option<&'a str>,
    page_size: usize,
) -> BoxStream<'a, StorageResult<String>> {
    let page_size = page_size.max(1);
    stream::try_unfold(ListState::Start, move |state| async move {
        let token = match state {
            ListState::Done => return Ok(None),
            ListState::Start => None,
            ListState::Next(token) => Some(token),
        };
        let page = store
            .list_page(bucket, prefix, token.as_deref(), page_size)
            .await?;
        let next = match page.next_page_token {
            Some(token) => ListState::Next(token),
            None => ListState::Done,
        };
        Ok(Some((page.names, next)))
    })
    .map_ok(|names| stream::iter(names.into_iter().map(Ok::<String, StorageError>)))
    .try_flatten()
    .boxed()
}

/// Read an object and decode it as UTF-8 text.
pub async fn read_to_string(store: &dyn ObjectStore, bucket: &str, name: &str) -> Result<String> {
    let bytes = store.read_object(bucket, name).await?;
    String::from_utf8(bytes).map_err(|e| {
        QueryError::MalformedRecord(format!("{}/{} is not valid UTF-8: {}", bucket, name, e))
    })
}

/// Names of span-data buckets, identified by their `bucket_type` label.
pub async fn list_span_buckets(store: &dyn ObjectStore) -> Result<Vec<String>> {
    let mut response = Vec::new();
    for bucket in store.list_buckets().await? {
        let labels = match store.bucket_labels(&bucket).await {
            Ok(labels) => labels,
            // Bucket vanished between list and lookup.
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e.into()),
        };
        if labels.get(naming::BUCKET_TYPE_LABEL_KEY).map(String::as_str)
            == Some(naming::SPAN_BUCKET_LABEL)
        {
            response.push(bucket);
        }
    }
    Ok(response)
}
