//! Content-addressed payload storage with pluggable backends.
//!
//! Every payload is stored exactly once under its SHA-256 [`Digest`]:
//! - Filesystem backend with digest-derived paths and atomic writes
//! - In-memory backend for tests and single-process embedding
//! - Idempotent `put`: identical bytes are written on first sight only, later
//!   puts refresh the payload's age so the orphan sweep leaves it alone
//!
//! ## Example
//!
//! ```rust,ignore
//! use scribe_db::file_storage::{ContentAddressedStore, FilesystemBackend};
//!
//! let store = ContentAddressedStore::new(FilesystemBackend::new("/var/lib/scribe/images"));
//!
//! let digest = store.put(b"data:image/png;base64,iVBORw0KGgo=").await?;
//! let bytes = store.get(&digest).await?;
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scribe_core::{defaults, Digest, Error, Result, StorageBackendKind, StorageConfig};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Storage backend trait for different storage implementations.
///
/// Keys are `/`-separated relative paths. Allows abstracting over filesystem,
/// object storage, or memory.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Write data to the specified path.
    async fn write(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Read data from the specified path.
    ///
    /// A missing path is reported as an error for which
    /// [`Error::is_not_found`] returns true.
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Delete data at the specified path. Deleting a missing path is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check if data exists at the specified path.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Mark the data at `path` as modified now.
    ///
    /// Returns false when nothing is stored at the path.
    async fn touch(&self, path: &str) -> Result<bool>;

    /// List every stored object under `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>>;
}

/// A stored object as reported by [`StorageBackend::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub path: String,
    pub modified_at: DateTime<Utc>,
}

/// Filesystem storage backend.
pub struct FilesystemBackend {
    base_path: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend with the given base directory.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.base_path.join(path)
    }

    /// Validate that the storage backend can write, read, and delete files.
    ///
    /// Performs a full round-trip test at startup to catch filesystem issues
    /// (permission errors, missing directories, read-only mounts) early.
    pub async fn validate(&self) -> std::result::Result<(), String> {
        let test_dir = self.base_path.join(".health-check");
        let test_file = test_dir.join("test.bin");

        fs::create_dir_all(&test_dir)
            .await
            .map_err(|e| format!("create_dir_all({:?}): {}", test_dir, e))?;

        let data = b"storage-health-check";
        fs::write(&test_file, data)
            .await
            .map_err(|e| format!("write({:?}): {}", test_file, e))?;

        let read_data = fs::read(&test_file)
            .await
            .map_err(|e| format!("read({:?}): {}", test_file, e))?;
        if read_data != data {
            return Err("read-back mismatch".to_string());
        }

        fs::remove_file(&test_file)
            .await
            .map_err(|e| format!("remove_file({:?}): {}", test_file, e))?;
        let _ = fs::remove_dir(&test_dir).await; // Best-effort cleanup

        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(path);
        debug!(storage_path = %path, full_path = %full_path.display(), size = data.len(), "file_storage: write");

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "file_storage: create_dir_all failed");
                e
            })?;
        }

        // Atomic write: temp file + rename. The temp name is unique so that
        // concurrent writers of the same payload never share a temp file.
        let temp_path = full_path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        if let Err(e) = write_then_rename(&temp_path, &full_path, data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(
                &full_path,
                std::fs::Permissions::from_mode(defaults::PAYLOAD_FILE_MODE),
            )
            .await?;
        }

        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path);
        Ok(fs::read(full_path).await?)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.full_path(path);
        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full_path = self.full_path(path);
        Ok(fs::try_exists(full_path).await?)
    }

    async fn touch(&self, path: &str) -> Result<bool> {
        let full_path = self.full_path(path);
        let touched = tokio::task::spawn_blocking(move || {
            match std::fs::File::options().append(true).open(&full_path) {
                Ok(file) => file.set_modified(SystemTime::now()).map(|_| true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(|e| Error::Internal(format!("touch task failed: {}", e)))??;
        Ok(touched)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>> {
        let root = self.full_path(prefix);
        if !fs::try_exists(&root).await? {
            return Ok(Vec::new());
        }

        let mut objects = Vec::new();
        let mut pending = vec![root];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.starts_with('.') || name.ends_with(".tmp") {
                    continue;
                }
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    let modified = entry.metadata().await?.modified()?;
                    if let Ok(rel) = entry.path().strip_prefix(&self.base_path) {
                        objects.push(StoredObject {
                            path: rel.to_string_lossy().replace('\\', "/"),
                            modified_at: DateTime::<Utc>::from(modified),
                        });
                    }
                }
            }
        }
        objects.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(objects)
    }
}

async fn write_then_rename(temp_path: &Path, full_path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(temp_path).await.map_err(|e| {
        warn!(temp_path = %temp_path.display(), error = %e, "file_storage: File::create failed");
        e
    })?;
    file.write_all(data).await.map_err(|e| {
        warn!(error = %e, "file_storage: write_all failed");
        e
    })?;
    file.sync_all().await?;
    drop(file);

    fs::rename(temp_path, full_path).await.map_err(|e| {
        warn!(from = %temp_path.display(), to = %full_path.display(), error = %e, "file_storage: rename failed");
        e
    })
}

/// In-memory storage backend.
///
/// Payloads live only as long as the process.
#[derive(Default)]
pub struct MemoryBackend {
    blobs: RwLock<HashMap<String, (Vec<u8>, DateTime<Utc>)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        self.blobs
            .write()
            .await
            .insert(path.to_string(), (data.to_vec(), Utc::now()));
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(path)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.blobs.write().await.remove(path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.blobs.read().await.contains_key(path))
    }

    async fn touch(&self, path: &str) -> Result<bool> {
        match self.blobs.write().await.get_mut(path) {
            Some((_, modified_at)) => {
                *modified_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>> {
        let mut objects: Vec<StoredObject> = self
            .blobs
            .read()
            .await
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, (_, modified_at))| StoredObject {
                path: k.clone(),
                modified_at: *modified_at,
            })
            .collect();
        objects.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(objects)
    }
}

/// Generate the storage path for a digest.
///
/// Path format: `images/{first-2-hex}/{next-2-hex}/{digest}`
///
/// Example: `images/36/05/360593ff547c864bd9d16bbed6eb8860d9fad9a407aa74e066039db23b525338`
pub fn generate_storage_path(digest: &Digest) -> String {
    let hex = digest.as_str();
    format!(
        "{}/{}/{}/{}",
        defaults::STORAGE_PREFIX,
        &hex[0..2],
        &hex[2..4],
        hex
    )
}

/// Content-addressed payload store.
///
/// The digest is the sole identity of a payload; the same digest always maps
/// to byte-identical content.
pub struct ContentAddressedStore {
    backend: Box<dyn StorageBackend>,
}

impl ContentAddressedStore {
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    /// Build a store for the configured backend.
    pub fn from_config(config: &StorageConfig) -> Self {
        match config.backend {
            StorageBackendKind::Filesystem => {
                Self::new(FilesystemBackend::new(&config.storage_path))
            }
            StorageBackendKind::Memory => Self::new(MemoryBackend::new()),
        }
    }

    /// Store `data`, returning its digest.
    ///
    /// Idempotent: when a payload already exists under the digest nothing is
    /// written, only its modification time is refreshed.
    pub async fn put(&self, data: &[u8]) -> Result<Digest> {
        let digest = Digest::of(data);
        let path = generate_storage_path(&digest);

        if self.backend.touch(&path).await? {
            trace!(subsystem = "storage", op = "put", digest = %digest, "Payload already stored");
        } else {
            self.backend.write(&path, data).await?;
            debug!(
                subsystem = "storage",
                op = "put",
                digest = %digest,
                size_bytes = data.len(),
                "Payload written"
            );
        }
        Ok(digest)
    }

    /// Fetch the exact bytes stored under `digest`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if no payload exists.
    pub async fn get(&self, digest: &Digest) -> Result<Vec<u8>> {
        match self.backend.read(&generate_storage_path(digest)).await {
            Ok(data) => Ok(data),
            Err(e) if e.is_not_found() => Err(Error::NotFound(format!("payload {}", digest))),
            Err(e) => Err(e),
        }
    }

    /// Remove the payload under `digest`; absent payloads are ignored.
    pub async fn delete(&self, digest: &Digest) -> Result<()> {
        self.backend.delete(&generate_storage_path(digest)).await?;
        debug!(subsystem = "storage", op = "delete", digest = %digest, "Payload deleted");
        Ok(())
    }

    pub async fn exists(&self, digest: &Digest) -> Result<bool> {
        self.backend.exists(&generate_storage_path(digest)).await
    }

    /// Every digest with a stored payload, sorted.
    pub async fn list(&self) -> Result<Vec<Digest>> {
        self.list_matching(|_| true).await
    }

    /// Digests whose payload was last written or refreshed at or before
    /// `cutoff`, sorted.
    pub async fn list_stored_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Digest>> {
        self.list_matching(|object| object.modified_at <= cutoff).await
    }

    async fn list_matching<F>(&self, keep: F) -> Result<Vec<Digest>>
    where
        F: Fn(&StoredObject) -> bool,
    {
        let objects = self.backend.list(defaults::STORAGE_PREFIX).await?;
        let mut digests: Vec<Digest> = objects
            .iter()
            .filter(|object| keep(object))
            .filter_map(|object| object.path.rsplit('/').next())
            .filter_map(|name| Digest::parse(name).ok())
            .collect();
        digests.sort();
        digests.dedup();
        Ok(digests)
    }
}
