//! Local filesystem backend
//!
//! Maps the storage contract onto `tokio::fs` calls under a root directory.
//! Writes are staged in a hidden temp file next to the target and renamed into
//! place on commit, so readers never observe a partial file.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::config::LocalConfig;
use crate::copy;
use crate::error::{Error, Result};
use crate::path::StoragePath;
use crate::progress::Progress;
use crate::stream::{ByteStream, ChunkSink, drain_into, from_async_read, with_progress};
use crate::traits::{BackendKind, EntryStream, ListEntry, ListOptions, Storage};

const TEMP_SUFFIX: &str = ".stow-tmp";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Storage rooted at a local directory
#[derive(Debug)]
pub struct LocalStorage {
    name: String,
    root: PathBuf,
    chunk_size: usize,
}

impl LocalStorage {
    /// Open a local backend; the root must be an existing directory.
    pub fn new(config: &LocalConfig) -> Result<Self> {
        config.validate()?;
        let root = std::fs::canonicalize(&config.root).map_err(|e| {
            Error::Config(format!(
                "storage root {} is not accessible: {e}",
                config.root.display()
            ))
        })?;
        if !root.is_dir() {
            return Err(Error::Config(format!(
                "storage root {} is not a directory",
                root.display()
            )));
        }

        let name = format!(
            "fs-{}",
            root.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        );

        Ok(Self {
            name,
            root,
            chunk_size: config.chunk_size,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Canonical root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` lexically, then make sure symlinks do not lead out of the root
    async fn locate(&self, path: &str) -> Result<(StoragePath, PathBuf)> {
        let resolved = self.resolve(path)?;
        let full = resolved.to_fs_path(&self.root);
        self.ensure_contained(&full).await?;
        Ok((resolved, full))
    }

    /// Check the deepest existing ancestor of `full` still lies under the root.
    async fn ensure_contained(&self, full: &Path) -> Result<()> {
        let mut candidate = full.to_path_buf();
        loop {
            match fs::canonicalize(&candidate).await {
                Ok(real) if real.starts_with(&self.root) => return Ok(()),
                Ok(_) => {
                    return Err(Error::InvalidPath(format!(
                        "{} resolves outside the storage root",
                        full.display()
                    )));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    if !candidate.pop() {
                        return Ok(());
                    }
                }
                Err(e) => return Err(Error::io_at(full.display(), e)),
            }
        }
    }

    async fn stage(&self, target: PathBuf) -> Result<TempFileSink> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io_at(parent.display(), e))?;
        }
        TempFileSink::create(target).await
    }
}

/// Root-relative `/`-separated form of `full`, if it is valid UTF-8
fn relative(root: &Path, full: &Path) -> Option<String> {
    let rel = full.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = rel.iter().map(|c| c.to_str()).collect();
    Some(parts?.join("/"))
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}

fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let unique = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    target.with_file_name(format!(
        ".{name}.{}-{unique}{TEMP_SUFFIX}",
        std::process::id()
    ))
}

/// Write target staged in a hidden sibling file
struct TempFileSink {
    temp: PathBuf,
    target: PathBuf,
    file: Option<fs::File>,
    finished: bool,
}

impl TempFileSink {
    async fn create(target: PathBuf) -> Result<Self> {
        let temp = temp_path_for(&target);
        let file = fs::File::create(&temp)
            .await
            .map_err(|e| Error::io_at(target.display(), e))?;
        Ok(Self {
            temp,
            target,
            file: Some(file),
            finished: false,
        })
    }
}

#[async_trait]
impl ChunkSink for TempFileSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::General("write after commit".into()))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| Error::io_at(self.target.display(), e))
    }

    async fn commit(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .map_err(|e| Error::io_at(self.target.display(), e))?;
            file.sync_all()
                .await
                .map_err(|e| Error::io_at(self.target.display(), e))?;
        }
        fs::rename(&self.temp, &self.target)
            .await
            .map_err(|e| Error::io_at(self.target.display(), e))?;
        self.finished = true;
        Ok(())
    }

    async fn abort(&mut self) {
        self.file.take();
        if let Err(e) = fs::remove_file(&self.temp).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(temp = %self.temp.display(), error = %e, "failed to remove staged file");
        }
        self.finished = true;
    }
}

impl Drop for TempFileSink {
    fn drop(&mut self) {
        if !self.finished {
            self.file.take();
            let _ = std::fs::remove_file(&self.temp);
        }
    }
}

struct Walk {
    root: PathBuf,
    recursive: bool,
    pending: Vec<PathBuf>,
    current: Option<fs::ReadDir>,
}

impl Walk {
    async fn next_entry(&mut self) -> Result<Option<ListEntry>> {
        loop {
            let entry = match self.current.as_mut() {
                Some(dir) => dir.next_entry().await?,
                None => {
                    let Some(next) = self.pending.pop() else {
                        return Ok(None);
                    };
                    let read_dir = fs::read_dir(&next)
                        .await
                        .map_err(|e| Error::io_at(next.display(), e))?;
                    self.current = Some(read_dir);
                    continue;
                }
            };
            let Some(entry) = entry else {
                self.current = None;
                continue;
            };

            let full = entry.path();
            let Some(rel) = relative(&self.root, &full) else {
                warn!(path = %full.display(), "skipping entry with a non UTF-8 name");
                continue;
            };
            if rel.rsplit('/').next().is_some_and(is_temp_name) {
                continue;
            }

            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                if self.recursive {
                    self.pending.push(full);
                    continue;
                }
                return Ok(Some(ListEntry::dir(rel)));
            }
            // symlinks and special files are never listed
            if !file_type.is_file() {
                continue;
            }

            let meta = entry.metadata().await?;
            let modified = meta
                .modified()
                .ok()
                .and_then(|t| jiff::Timestamp::try_from(t).ok());
            return Ok(Some(ListEntry::file(rel, meta.len()).modified(modified)));
        }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    #[instrument(skip(self, options), fields(backend = %self.name))]
    async fn list(&self, prefix: &str, options: ListOptions) -> Result<EntryStream> {
        let (resolved, full) = self.locate(prefix).await?;
        let meta = fs::metadata(&full)
            .await
            .map_err(|e| Error::io_at(&resolved, e))?;
        if !meta.is_dir() {
            return Err(Error::NotFound(format!("{resolved} is not a directory")));
        }

        let walk = Walk {
            root: self.root.clone(),
            recursive: options.recursive,
            pending: vec![full],
            current: None,
        };

        Ok(Box::pin(stream::try_unfold(walk, |mut walk| async move {
            Ok(walk.next_entry().await?.map(|entry| (entry, walk)))
        })))
    }

    #[instrument(skip(self, progress), fields(backend = %self.name))]
    async fn read(&self, path: &str, progress: Option<Progress>) -> Result<ByteStream> {
        let (resolved, full) = self.locate(path).await?;
        let meta = fs::metadata(&full)
            .await
            .map_err(|e| Error::io_at(&resolved, e))?;
        if meta.is_dir() {
            return Err(Error::InvalidPath(format!("{resolved} is a directory")));
        }
        let file = fs::File::open(&full)
            .await
            .map_err(|e| Error::io_at(&resolved, e))?;

        debug!(size = meta.len(), "opened for reading");
        Ok(with_progress(
            from_async_read(file, self.chunk_size),
            Some(meta.len()),
            progress,
        ))
    }

    #[instrument(skip(self, source, progress), fields(backend = %self.name))]
    async fn write(
        &self,
        path: &str,
        source: ByteStream,
        size_hint: Option<u64>,
        progress: Option<Progress>,
    ) -> Result<()> {
        let (resolved, full) = self.locate(path).await?;
        if resolved.is_root() {
            return Err(Error::InvalidPath("cannot write to the storage root".into()));
        }
        if let Ok(meta) = fs::symlink_metadata(&full).await
            && meta.is_dir()
        {
            return Err(Error::InvalidPath(format!("{resolved} is a directory")));
        }

        let mut sink = self.stage(full).await?;
        let written = drain_into(with_progress(source, size_hint, progress), &mut sink).await?;
        info!(path = %resolved, bytes = written, "stored");
        Ok(())
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn delete(&self, path: &str) -> Result<()> {
        let (resolved, full) = self.locate(path).await?;
        let meta = match fs::symlink_metadata(&full).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::io_at(&resolved, e)),
        };
        if !meta.is_file() {
            return Err(Error::InvalidPath(format!("{resolved} is not a file")));
        }
        match fs::remove_file(&full).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(Error::io_at(&resolved, e)),
            _ => Ok(()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let (resolved, full) = self.locate(path).await?;
        match fs::symlink_metadata(&full).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io_at(&resolved, e)),
        }
    }

    async fn copy(
        &self,
        src: &str,
        dst: &str,
        dst_backend: Option<&dyn Storage>,
        progress: Option<Progress>,
    ) -> Result<()> {
        copy::copy(self, src, dst_backend.unwrap_or(self), dst, progress).await
    }

    async fn native_copy(
        &self,
        src: &StoragePath,
        dst_backend: &dyn Storage,
        dst: &StoragePath,
    ) -> Result<bool> {
        let Some(dst_local) = dst_backend.as_any().downcast_ref::<LocalStorage>() else {
            return Ok(false);
        };

        let (src_resolved, src_full) = self.locate(&src.key()).await?;
        let (dst_resolved, dst_full) = dst_local.locate(&dst.key()).await?;
        let meta = fs::metadata(&src_full)
            .await
            .map_err(|e| Error::io_at(&src_resolved, e))?;
        if !meta.is_file() {
            return Err(Error::InvalidPath(format!("{src_resolved} is not a file")));
        }

        let mut sink = dst_local.stage(dst_full).await?;
        // the staged temp file is replaced wholesale by fs::copy
        sink.file.take();
        if let Err(e) = fs::copy(&src_full, &sink.temp).await {
            sink.abort().await;
            return Err(Error::io_at(&src_resolved, e));
        }
        if let Err(e) = sink.commit().await {
            sink.abort().await;
            return Err(e);
        }

        debug!(src = %src_resolved, dst = %dst_resolved, bytes = meta.len(), "copied on disk");
        Ok(true)
    }
}
