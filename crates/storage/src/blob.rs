//! Blob-store variant of the document backend. The whole configuration is
//! one JSON entry written with an explicit expiry; once it lapses the broker
//! reads an empty configuration until the document is written again.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use moka::{sync::Cache, Expiry};
use tracing::debug;
use usb_domain::model::Config;
use usb_domain::storage::{StorageError, StorageResult};

use crate::document::{DocumentFormat, DocumentStore};
use crate::errors::from_io_err;

/// Key/value store whose entries carry their own time-to-live.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;
    async fn set_with_expiry(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> StorageResult<()>;
}

#[derive(Debug, Clone)]
struct BlobEntry {
    value: Vec<u8>,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, BlobEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &BlobEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &BlobEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process blob store backed by a `moka` cache with per-entry expiry.
#[derive(Clone)]
pub struct MemoryBlobStore {
    entries: Cache<String, BlobEntry>,
}

impl MemoryBlobStore {
    pub const DEFAULT_CAPACITY: u64 = 1_024;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(capacity.max(1))
                .expire_after(PerEntryTtl)
                .build(),
        }
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|entry| entry.value))
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> StorageResult<()> {
        self.entries.insert(key.to_string(), BlobEntry { value, ttl });
        Ok(())
    }
}

/// Blob store persisted below a directory. Each key is one file holding the
/// expiry in unix milliseconds on its first line, then the raw value.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        let mut path = self.root.clone();
        let mut segments = 0;
        for segment in key.split('/').filter(|segment| !segment.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(StorageError::Constraint(format!("invalid blob key `{key}`")));
            }
            path.push(segment);
            segments += 1;
        }
        if segments == 0 {
            return Err(StorageError::Constraint("empty blob key".into()));
        }
        Ok(path)
    }
}

fn unix_millis(at: SystemTime) -> u64 {
    let millis = at.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}

fn encode_blob(value: &[u8], expires_at: u64) -> Vec<u8> {
    let mut bytes = format!("{expires_at}\n").into_bytes();
    bytes.extend_from_slice(value);
    bytes
}

fn decode_blob(key: &str, bytes: &[u8]) -> StorageResult<(u64, Vec<u8>)> {
    let malformed = || StorageError::Serialization(format!("blob `{key}` has no expiry header"));
    let split = bytes.iter().position(|b| *b == b'\n').ok_or_else(malformed)?;
    let expires_at = std::str::from_utf8(&bytes[..split])
        .ok()
        .and_then(|header| header.parse().ok())
        .ok_or_else(malformed)?;
    Ok((expires_at, bytes[split + 1..].to_vec()))
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(from_io_err(err)),
        };
        let (expires_at, value) = decode_blob(key, &bytes)?;
        if expires_at <= unix_millis(SystemTime::now()) {
            debug!(key, "dropping expired blob");
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(from_io_err(err)),
            }
            return Ok(None);
        }
        Ok(Some(value))
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> StorageResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(from_io_err)?;
        }
        let expires_at = SystemTime::now().checked_add(ttl).map_or(u64::MAX, unix_millis);
        let mut staged = path.clone().into_os_string();
        staged.push(".tmp");
        let staged = PathBuf::from(staged);
        tokio::fs::write(&staged, encode_blob(&value, expires_at))
            .await
            .map_err(from_io_err)?;
        if let Err(err) = tokio::fs::rename(&staged, &path).await {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(from_io_err(err));
        }
        Ok(())
    }
}

/// The configuration document stored under one blob key.
#[derive(Clone)]
pub struct BlobDocument<B> {
    store: B,
    key: String,
    ttl: Duration,
}

impl<B: BlobStore> BlobDocument<B> {
    pub fn new(store: B, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            ttl,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl<B: BlobStore> DocumentStore for BlobDocument<B> {
    fn backend(&self) -> &'static str {
        "blob"
    }

    async fn read(&self) -> StorageResult<Option<Config>> {
        match self.store.get(&self.key).await? {
            Some(bytes) => DocumentFormat::Json.decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn write(&self, config: &Config) -> StorageResult<()> {
        let bytes = DocumentFormat::Json.encode(config)?;
        debug!(key = %self.key, ttl_secs = self.ttl.as_secs(), "writing configuration blob");
        self.store.set_with_expiry(&self.key, bytes, self.ttl).await
    }
}
