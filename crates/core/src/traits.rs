//! Storage contract
//!
//! Every backend implements [`Storage`]. Callers hold `&dyn Storage` or
//! `Arc<dyn Storage>` and never name a concrete backend.

use std::any::Any;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::path::StoragePath;
use crate::progress::Progress;
use crate::stream::ByteStream;

/// Lazy sequence of listing entries
pub type EntryStream = Pin<Box<dyn Stream<Item = Result<ListEntry>> + Send>>;

/// Which family of backend implements a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    S3,
    Sftp,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::S3 => write!(f, "s3"),
            BackendKind::Sftp => write!(f, "sftp"),
        }
    }
}

/// One item returned by [`Storage::list`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListEntry {
    /// Root-relative, `/`-separated; directories end with `/`
    pub path: String,

    /// Size in bytes (zero for directories)
    pub size: u64,

    /// Last modification time, when the backend reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<Timestamp>,

    /// Directory or common prefix rather than an object
    pub is_dir: bool,
}

impl ListEntry {
    /// Create a file entry
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            last_modified: None,
            is_dir: false,
        }
    }

    /// Create a directory entry; a trailing `/` is added when missing
    pub fn dir(path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.ends_with('/') {
            path.push('/');
        }
        Self {
            path,
            size: 0,
            last_modified: None,
            is_dir: true,
        }
    }

    pub fn modified(mut self, last_modified: Option<Timestamp>) -> Self {
        self.last_modified = last_modified;
        self
    }
}

/// Options for [`Storage::list`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    /// Descend into sub-directories (files only) instead of listing direct children
    pub recursive: bool,
}

impl ListOptions {
    pub fn recursive() -> Self {
        Self { recursive: true }
    }
}

/// HTTP method an access URL is signed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessMethod {
    /// Download
    Get,
    /// Upload
    Put,
}

impl fmt::Display for AccessMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMethod::Get => write!(f, "GET"),
            AccessMethod::Put => write!(f, "PUT"),
        }
    }
}

/// Time-limited URL granting direct access to one object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessUrl {
    pub url: String,
    pub method: AccessMethod,
    pub expires_at: Timestamp,
}

impl AccessUrl {
    /// Build an access URL signed at `signed_at` and valid for `ttl`
    pub fn new(
        url: impl Into<String>,
        method: AccessMethod,
        signed_at: Timestamp,
        ttl: Duration,
    ) -> Result<Self> {
        validate_ttl(ttl)?;
        let ttl = SignedDuration::try_from(ttl)
            .map_err(|e| Error::Config(format!("invalid expiry: {e}")))?;
        let expires_at = signed_at
            .checked_add(ttl)
            .map_err(|e| Error::Config(format!("invalid expiry: {e}")))?;
        Ok(Self {
            url: url.into(),
            method,
            expires_at,
        })
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Timestamp::now()
    }
}

/// Reject TTLs that would produce an already-expired URL
pub fn validate_ttl(ttl: Duration) -> Result<()> {
    if ttl.is_zero() {
        return Err(Error::Config("access URL expiry must be in the future".into()));
    }
    Ok(())
}

/// Operations every storage backend provides
///
/// Paths are resolved through [`Storage::resolve`] before any disk or network
/// call; a path that escapes the root fails with [`Error::InvalidPath`].
#[async_trait]
pub trait Storage: Send + Sync {
    /// Backend family, used to pick server-side copy
    fn kind(&self) -> BackendKind;

    /// Human-readable handle name (profile name by default)
    fn name(&self) -> &str;

    /// Upper bound on the size of chunks this backend yields and buffers
    fn chunk_size(&self) -> usize;

    /// Downcasting hook for same-backend fast paths
    fn as_any(&self) -> &dyn Any;

    /// Normalize a caller path relative to this backend's root
    fn resolve(&self, path: &str) -> Result<StoragePath> {
        StoragePath::parse(path)
    }

    /// List entries under `prefix`
    async fn list(&self, prefix: &str, options: ListOptions) -> Result<EntryStream>;

    /// Open `path` for reading as a lazy chunk stream
    async fn read(&self, path: &str, progress: Option<Progress>) -> Result<ByteStream>;

    /// Store `source` at `path`, creating intermediate containers.
    ///
    /// Either the full content becomes visible at `path` or nothing does; an
    /// existing object is left untouched on failure.
    async fn write(
        &self,
        path: &str,
        source: ByteStream,
        size_hint: Option<u64>,
        progress: Option<Progress>,
    ) -> Result<()>;

    /// Remove `path`; removing a missing path succeeds
    async fn delete(&self, path: &str) -> Result<()>;

    /// Whether `path` exists; a missing path is `Ok(false)`, never an error
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Copy `src` to `dst` on `dst_backend` (this backend when `None`)
    async fn copy(
        &self,
        src: &str,
        dst: &str,
        dst_backend: Option<&dyn Storage>,
        progress: Option<Progress>,
    ) -> Result<()>;

    /// Try a server-side copy to a backend of the same kind.
    ///
    /// Returns `Ok(false)` when no native primitive applies and the caller
    /// should stream instead.
    async fn native_copy(
        &self,
        _src: &StoragePath,
        _dst_backend: &dyn Storage,
        _dst: &StoragePath,
    ) -> Result<bool> {
        Ok(false)
    }

    /// Generate a pre-signed URL for direct access to `path`
    async fn generate_access_url(
        &self,
        _path: &str,
        _method: AccessMethod,
        _ttl: Duration,
    ) -> Result<AccessUrl> {
        Err(Error::Unsupported(format!(
            "{} backend '{}' cannot generate access URLs",
            self.kind(),
            self.name()
        )))
    }

    /// Release sessions or connections held by the handle
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
