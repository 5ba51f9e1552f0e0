use crate::error::{TableError, TableResult};
use async_trait::async_trait;
use bytes::Bytes;
use object_store::{GetOptions, ObjectStore, PutOptions, PutPayload};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// StorageBackend trait
// ---------------------------------------------------------------------------

/// Async key/value view of a hierarchical store.
///
/// Keys are `/`-separated relative paths. Implementations can target the
/// local filesystem or anything `object_store` speaks to.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Fetch the contents at `path`.
    /// Returns `Ok(None)` when the key does not exist (rather than an error).
    async fn get(&self, path: &str) -> TableResult<Option<Bytes>>;

    /// Store `data` at `path`, replacing any previous value.
    async fn put(&self, path: &str, data: Bytes) -> TableResult<()>;

    /// List the names of the immediate children under `prefix`.
    async fn list(&self, prefix: &str) -> TableResult<Vec<String>>;

    /// Join a base path with a relative segment.
    fn join(&self, base: &str, segment: &str) -> String;
}

// ---------------------------------------------------------------------------
// LocalBackend  (tokio::fs)
// ---------------------------------------------------------------------------

/// Local-filesystem backend using `tokio::fs`.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a new backend rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn get(&self, path: &str) -> TableResult<Option<Bytes>> {
        let full = self.resolve(path);
        match tokio::fs::read(&full).await {
            Ok(data) => {
                if data.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(Bytes::from(data)))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TableError::Storage(format!(
                "Failed to read {}: {e}",
                full.display()
            ))),
        }
    }

    async fn put(&self, path: &str, data: Bytes) -> TableResult<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                TableError::Storage(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }
        tokio::fs::write(&full, &data).await.map_err(|e| {
            TableError::Storage(format!("Failed to write {}: {e}", full.display()))
        })
    }

    async fn list(&self, prefix: &str) -> TableResult<Vec<String>> {
        let dir = self.resolve(prefix);
        let mut entries = Vec::new();
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => {
                return Err(TableError::Storage(format!(
                    "Failed to list {}: {e}",
                    dir.display()
                )));
            }
        };
        while let Some(entry) = reader.next_entry().await.map_err(|e| {
            TableError::Storage(format!("Failed to read entry in {}: {e}", dir.display()))
        })? {
            if let Some(name) = entry.file_name().to_str() {
                entries.push(name.to_string());
            }
        }
        Ok(entries)
    }

    fn join(&self, base: &str, segment: &str) -> String {
        if base.is_empty() {
            return segment.to_string();
        }
        let p = Path::new(base).join(segment);
        p.to_string_lossy().into_owned()
    }
}

// ---------------------------------------------------------------------------
// ObjectStoreBackend  (wraps object_store crate)
// ---------------------------------------------------------------------------

/// Backend that wraps any [`object_store::ObjectStore`] implementation.
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl std::fmt::Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreBackend")
            .field("store", &self.store.to_string())
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl ObjectStoreBackend {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn full_path(&self, path: &str) -> object_store::path::Path {
        if self.prefix.is_empty() {
            object_store::path::Path::from(path)
        } else {
            object_store::path::Path::from(format!("{}/{}", self.prefix, path))
        }
    }
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    async fn get(&self, path: &str) -> TableResult<Option<Bytes>> {
        let location = self.full_path(path);
        match self.store.get_opts(&location, GetOptions::default()).await {
            Ok(result) => {
                let data = result.bytes().await.map_err(|e| {
                    TableError::Storage(format!("Failed to read bytes from {path}: {e}"))
                })?;
                if data.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(data))
                }
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(TableError::Storage(format!(
                "Object store error for {path}: {e}"
            ))),
        }
    }

    async fn put(&self, path: &str, data: Bytes) -> TableResult<()> {
        let location = self.full_path(path);
        self.store
            .put_opts(&location, PutPayload::from(data), PutOptions::default())
            .await
            .map_err(|e| TableError::Storage(format!("Object store put error for {path}: {e}")))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> TableResult<Vec<String>> {
        let location = self.full_path(prefix);
        let listing = if location.as_ref().is_empty() {
            self.store.list_with_delimiter(None).await
        } else {
            self.store.list_with_delimiter(Some(&location)).await
        }
        .map_err(|e| {
            TableError::Storage(format!("Object store list error for {prefix}: {e}"))
        })?;

        let mut entries: Vec<String> = listing
            .common_prefixes
            .iter()
            .filter_map(|p| p.filename().map(str::to_string))
            .collect();
        entries.extend(
            listing
                .objects
                .iter()
                .filter_map(|meta| meta.location.filename().map(str::to_string)),
        );
        Ok(entries)
    }

    fn join(&self, base: &str, segment: &str) -> String {
        if base.is_empty() {
            segment.to_string()
        } else {
            format!("{base}/{segment}")
        }
    }
}
