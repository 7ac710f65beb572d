//! Directory-backed object store.
//!
//! Layout: `<root>/<bucket>/<object name>` where `/` in an object name maps
//! to a subdirectory. Bucket labels live in `<root>/<bucket>/.labels.json`.
//! Blocking filesystem work runs on tokio's blocking pool.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use super::{ObjectPage, ObjectSink, ObjectStore, StorageError, StorageResult};

const LABELS_FILE: &str = ".labels.json";

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> StorageResult<PathBuf> {
        check_relative(bucket)?;
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, name: &str) -> StorageResult<PathBuf> {
        check_relative(name)?;
        Ok(self.bucket_dir(bucket)?.join(name))
    }

    async fn blocking<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(PathBuf) -> StorageResult<T> + Send + 'static,
    {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || f(root))
            .await
            .map_err(|e| StorageError::Transient(format!("blocking task failed: {}", e)))?
    }
}

/// Object and bucket names must stay inside the store root.
fn check_relative(name: &str) -> StorageResult<()> {
    let ok = !name.is_empty()
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(())
    } else {
        Err(StorageError::Transient(format!("invalid object path '{}'", name)))
    }
}

fn io_error(bucket: &str, name: &str, e: io::Error) -> StorageError {
    if e.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound {
            bucket: bucket.to_string(),
            name: name.to_string(),
        }
    } else {
        StorageError::Transient(format!("{}/{}: {}", bucket, name, e))
    }
}

/// Sorted, early-stopping walk of one bucket directory.
///
/// Directory entries are ordered with a trailing `/` on subdirectories, so a
/// depth-first walk yields full object names in lexicographic order.
/// Subtrees that cannot hold a wanted name are not read.
struct BucketWalk<'a> {
    bucket: &'a str,
    prefix: Option<&'a str>,
    after: Option<&'a str>,
    want: usize,
    names: Vec<String>,
}

impl<'a> BucketWalk<'a> {
    fn new(bucket: &'a str, prefix: Option<&'a str>, after: Option<&'a str>, want: usize) -> Self {
        Self {
            bucket,
            prefix,
            after,
            want,
            names: Vec::new(),
        }
    }

    fn run(mut self, dir: &Path) -> StorageResult<Vec<String>> {
        if !dir.is_dir() {
            return Err(StorageError::BucketNotFound(self.bucket.to_string()));
        }
        self.walk(dir, "")?;
        Ok(self.names)
    }

    /// `key` ends with `/`; every name below it starts with `key`.
    fn wants_subtree(&self, key: &str) -> bool {
        let under_prefix = self
            .prefix
            .map_or(true, |p| key.starts_with(p) || p.starts_with(key));
        let past_token = self.after.map_or(true, |t| t < key || t.starts_with(key));
        under_prefix && past_token
    }

    fn wants_object(&self, name: &str) -> bool {
        self.prefix.map_or(true, |p| name.starts_with(p)) && self.after.map_or(true, |t| name > t)
    }

    /// Returns `false` once `want` names are collected.
    fn walk(&mut self, path: &Path, rel: &str) -> StorageResult<bool> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path).map_err(|e| io_error(self.bucket, rel, e))? {
            let entry = entry.map_err(|e| io_error(self.bucket, rel, e))?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if rel.is_empty() && file_name == LABELS_FILE {
                continue;
            }
            let is_dir = entry
                .file_type()
                .map_err(|e| io_error(self.bucket, &file_name, e))?
                .is_dir();
            let key = if is_dir {
                format!("{}{}/", rel, file_name)
            } else {
                format!("{}{}", rel, file_name)
            };
            entries.push((key, is_dir, entry.path()));
        }
        entries.sort();

        for (key, is_dir, child) in entries {
            if is_dir {
                if self.wants_subtree(&key) && !self.walk(&child, &key)? {
                    return Ok(false);
                }
            } else if self.wants_object(&key) {
                self.names.push(key);
                if self.names.len() >= self.want {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        page_token: Option<&str>,
        max_results: usize,
    ) -> StorageResult<ObjectPage> {
        let dir = self.bucket_dir(bucket)?;
        let bucket = bucket.to_string();
        let prefix = prefix.map(str::to_string);
        let token = page_token.map(str::to_string);
        let limit = max_results.max(1);

        self.blocking(move |_| {
            // One name past the page tells whether another page exists.
            let want = limit.saturating_add(1);
            let mut names =
                BucketWalk::new(&bucket, prefix.as_deref(), token.as_deref(), want).run(&dir)?;
            let next_page_token = if names.len() > limit {
                names.truncate(limit);
                names.last().cloned()
            } else {
                None
            };
            Ok(ObjectPage { names, next_page_token })
        })
        .await
    }

    async fn list_prefixes(&self, bucket: &str, delimiter: &str) -> StorageResult<Vec<String>> {
        let dir = self.bucket_dir(bucket)?;
        let bucket = bucket.to_string();
        let delimiter = delimiter.to_string();

        self.blocking(move |_| {
            let mut prefixes: Vec<String> = BucketWalk::new(&bucket, None, None, usize::MAX)
                .run(&dir)?
                .into_iter()
                .filter_map(|name| {
                    name.find(&delimiter)
                        .map(|pos| name[..pos + delimiter.len()].to_string())
                })
                .collect();
            prefixes.sort();
            prefixes.dedup();
            Ok(prefixes)
        })
        .await
    }

    async fn list_buckets(&self) -> StorageResult<Vec<String>> {
        self.blocking(|root| {
            let entries = fs::read_dir(&root).map_err(|e| io_error("", "", e))?;
            let mut buckets = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| io_error("", "", e))?;
                if entry.path().is_dir() {
                    buckets.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            buckets.sort();
            Ok(buckets)
        })
        .await
    }

    async fn read_object(&self, bucket: &str, name: &str) -> StorageResult<Vec<u8>> {
        let dir = self.bucket_dir(bucket)?;
        let path = self.object_path(bucket, name)?;
        let bucket = bucket.to_string();
        let name = name.to_string();

        self.blocking(move |_| {
            if !dir.is_dir() {
                return Err(StorageError::BucketNotFound(bucket));
            }
            fs::read(&path).map_err(|e| io_error(&bucket, &name, e))
        })
        .await
    }

    async fn bucket_labels(&self, bucket: &str) -> StorageResult<HashMap<String, String>> {
        let dir = self.bucket_dir(bucket)?;
        let bucket = bucket.to_string();

        self.blocking(move |_| {
            if !dir.is_dir() {
                return Err(StorageError::BucketNotFound(bucket));
            }
            match fs::read_to_string(dir.join(LABELS_FILE)) {
                Ok(json) => serde_json::from_str(&json).map_err(|e| {
                    StorageError::Transient(format!("{}/{}: {}", bucket, LABELS_FILE, e))
                }),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(HashMap::new()),
                Err(e) => Err(io_error(&bucket, LABELS_FILE, e)),
            }
        })
        .await
    }
}

impl ObjectSink for FsStore {
    fn put_object(&self, bucket: &str, name: &str, data: Vec<u8>) -> StorageResult<()> {
        let path = self.object_path(bucket, name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(bucket, name, e))?;
        }
        fs::write(&path, data).map_err(|e| io_error(bucket, name, e))
    }

    fn set_bucket_labels(&self, bucket: &str, labels: HashMap<String, String>) -> StorageResult<()> {
        let dir = self.bucket_dir(bucket)?;
        fs::create_dir_all(&dir).map_err(|e| io_error(bucket, "", e))?;
        let json = serde_json::to_string_pretty(&labels)
            .map_err(|e| StorageError::Transient(format!("{}: {}", bucket, e)))?;
        fs::write(dir.join(LABELS_FILE), json).map_err(|e| io_error(bucket, LABELS_FILE, e))
    }
}
