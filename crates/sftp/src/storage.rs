//! SFTP storage implementation

use std::any::Any;
use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use jiff::Timestamp;
use ssh2::{FileStat, RenameFlags, Sftp};
use stow_core::copy;
use stow_core::stream::{drain_into, from_blocking_read, with_progress};
use stow_core::{
    BackendKind, ByteStream, ChunkSink, EntryStream, Error, ListEntry, ListOptions, Progress,
    Result, SftpConfig, Storage, StoragePath,
};
use tracing::{debug, info, instrument, warn};

use crate::error::{classify, is_not_found};
use crate::session::SessionHandle;

const TEMP_SUFFIX: &str = ".stow-tmp";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Directory on an SFTP server as a storage backend
///
/// Construction does no I/O. Call [`SftpStorage::open`] (or use
/// [`SftpStorage::connect`]) before issuing operations, and
/// [`Storage::close`] to end the session.
pub struct SftpStorage {
    name: String,
    config: SftpConfig,
    root: String,
    chunk_size: usize,
    session: SessionHandle,
}

impl SftpStorage {
    pub fn new(config: &SftpConfig) -> Result<Self> {
        config.validate()?;
        let root = match config.root.trim_end_matches('/') {
            "" => "/".to_string(),
            trimmed => trimmed.to_string(),
        };
        Ok(Self {
            name: format!("sftp-{}", config.host),
            config: config.clone(),
            root,
            chunk_size: config.chunk_size,
            session: SessionHandle::default(),
        })
    }

    /// Build and open in one step
    pub async fn connect(config: &SftpConfig) -> Result<Self> {
        let storage = Self::new(config)?;
        storage.open().await?;
        Ok(storage)
    }

    /// Establish the session; a no-op when already open
    pub async fn open(&self) -> Result<()> {
        self.session.open(self.config.clone()).await
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_open()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Remote directory every path is resolved under
    pub fn root(&self) -> &str {
        &self.root
    }

    fn remote_path(&self, path: &StoragePath) -> String {
        join_remote(&self.root, &path.key())
    }

    fn object_path(&self, path: &str) -> Result<(StoragePath, String)> {
        let resolved = self.resolve(path)?;
        if resolved.is_root() {
            return Err(Error::InvalidPath(format!(
                "'{path}' does not name a file"
            )));
        }
        let remote = self.remote_path(&resolved);
        Ok((resolved, remote))
    }
}

fn join_remote(base: &str, rel: &str) -> String {
    match (base.trim_end_matches('/'), rel.is_empty()) {
        (base, true) if base.is_empty() => "/".to_string(),
        (base, true) => base.to_string(),
        (base, false) => format!("{base}/{rel}"),
    }
}

fn join_rel(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}

fn temp_path_for(target: &str) -> String {
    let (dir, name) = target.rsplit_once('/').unwrap_or(("", target));
    let unique = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{dir}/.{name}.{}-{unique}{TEMP_SUFFIX}", std::process::id())
}

fn to_timestamp(stat: &FileStat) -> Option<Timestamp> {
    stat.mtime
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(|secs| Timestamp::from_second(secs).ok())
}

/// Create every missing directory from `root` down through `segments`
fn ensure_dirs(sftp: &Sftp, root: &str, segments: &[String]) -> Result<()> {
    let mut current = root.trim_end_matches('/').to_string();
    for segment in segments {
        current.push('/');
        current.push_str(segment);
        let dir = Path::new(&current);
        match sftp.stat(dir) {
            Ok(stat) if stat.is_dir() => {}
            Ok(_) => {
                return Err(Error::InvalidPath(format!("{current} is not a directory")));
            }
            Err(e) if is_not_found(&e) => {
                if let Err(e) = sftp.mkdir(dir, 0o755) {
                    // another writer may have created it in the meantime
                    let created = sftp.stat(dir).map(|s| s.is_dir()).unwrap_or(false);
                    if !created {
                        return Err(classify(e, &current));
                    }
                }
            }
            Err(e) => return Err(classify(e, &current)),
        }
    }
    Ok(())
}

type SshResult = std::result::Result<(), ssh2::Error>;

/// Remote calls an overwrite is built from
trait RenameOps {
    fn rename(&self, from: &str, to: &str, overwrite: bool) -> SshResult;
    fn exists(&self, path: &str) -> bool;
    fn unlink(&self, path: &str) -> SshResult;
}

impl RenameOps for Sftp {
    fn rename(&self, from: &str, to: &str, overwrite: bool) -> SshResult {
        let flags = overwrite
            .then(|| RenameFlags::OVERWRITE | RenameFlags::ATOMIC | RenameFlags::NATIVE);
        Sftp::rename(self, Path::new(from), Path::new(to), flags)
    }

    fn exists(&self, path: &str) -> bool {
        self.lstat(Path::new(path)).is_ok()
    }

    fn unlink(&self, path: &str) -> SshResult {
        Sftp::unlink(self, Path::new(path))
    }
}

/// Move `temp` over `target`.
///
/// SFTPv3 servers refuse to rename onto an existing file. The old file is then
/// moved aside and only removed once `temp` is in place; if that fails it is
/// moved back, so `target` keeps its previous content.
fn replace(ops: &impl RenameOps, temp: &str, target: &str) -> Result<()> {
    let Err(first) = ops.rename(temp, target, true) else {
        return Ok(());
    };
    if !ops.exists(target) {
        return Err(classify(first, target));
    }

    let backup = temp_path_for(target);
    ops.rename(target, &backup, false)
        .map_err(|e| classify(e, target))?;
    if let Err(e) = ops.rename(temp, target, false) {
        if let Err(restore) = ops.rename(&backup, target, false) {
            warn!(
                path = %target,
                backup = %backup,
                error = %restore,
                "failed to restore previous file"
            );
        }
        return Err(classify(e, target));
    }
    if let Err(e) = ops.unlink(&backup) {
        warn!(backup = %backup, error = %e, "failed to remove previous file");
    }
    Ok(())
}

/// Listing entry for a readdir result; symlinks and special files have none
fn listing_entry(path: String, stat: &FileStat) -> Option<ListEntry> {
    if stat.file_type().is_symlink() {
        None
    } else if stat.is_dir() {
        Some(ListEntry::dir(path))
    } else if stat.is_file() {
        Some(ListEntry::file(path, stat.size.unwrap_or(0)).modified(to_timestamp(stat)))
    } else {
        None
    }
}

struct SftpSink {
    session: SessionHandle,
    file: Option<ssh2::File>,
    temp: String,
    target: String,
    finished: bool,
}

#[async_trait]
impl ChunkSink for SftpSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<()> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| Error::General(format!("{} is already closed", self.temp)))?;
        let (file, written) = tokio::task::spawn_blocking(move || {
            let written = file.write_all(&chunk);
            (file, written)
        })
        .await?;
        self.file = Some(file);
        written.map_err(|e| Error::io_at(&self.target, e))
    }

    async fn commit(&mut self) -> Result<()> {
        let file = self.file.take();
        let temp = self.temp.clone();
        let target = self.target.clone();
        self.session
            .run(move |sftp| {
                // closing the handle flushes outstanding writes
                drop(file);
                replace(sftp, &temp, &target)
            })
            .await?;
        self.finished = true;
        Ok(())
    }

    async fn abort(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        discard_staging(&self.session, self.file.take(), self.temp.clone()).await;
    }
}

/// Close the staging handle and unlink the file; a missing file counts as removed
async fn remove_staging(
    session: &SessionHandle,
    file: Option<ssh2::File>,
    temp: String,
) -> Result<()> {
    session
        .run(move |sftp| {
            drop(file);
            match Sftp::unlink(sftp, Path::new(&temp)) {
                Err(e) if !is_not_found(&e) => Err(classify(e, &temp)),
                _ => Ok(()),
            }
        })
        .await
}

async fn discard_staging(session: &SessionHandle, file: Option<ssh2::File>, temp: String) {
    if let Err(e) = remove_staging(session, file, temp.clone()).await {
        warn!(temp = %temp, error = %e, "failed to remove staging file");
    }
}

impl Drop for SftpSink {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(temp = %self.temp, "staging file left behind");
            return;
        };
        let session = self.session.clone();
        let file = self.file.take();
        let temp = std::mem::take(&mut self.temp);
        handle.spawn(async move { discard_staging(&session, file, temp).await });
    }
}

/// Depth-first directory walk, one remote directory per step
struct Walk {
    session: SessionHandle,
    recursive: bool,
    /// (remote directory, root-relative directory)
    pending: Vec<(String, String)>,
    buffered: VecDeque<ListEntry>,
}

impl Walk {
    async fn next_entry(&mut self) -> Result<Option<ListEntry>> {
        loop {
            if let Some(entry) = self.buffered.pop_front() {
                return Ok(Some(entry));
            }
            let Some((remote, rel)) = self.pending.pop() else {
                return Ok(None);
            };

            let dir = remote.clone();
            let entries = self
                .session
                .run(move |sftp| {
                    sftp.readdir(Path::new(&dir))
                        .map_err(|e| classify(e, &dir))
                })
                .await?;

            for (path, stat) in entries {
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if is_temp_name(name) {
                    continue;
                }
                let child = join_rel(&rel, name);
                if self.recursive && stat.is_dir() && !stat.file_type().is_symlink() {
                    self.pending.push((join_remote(&remote, name), child));
                } else if let Some(entry) = listing_entry(child, &stat) {
                    self.buffered.push_back(entry);
                }
            }
        }
    }
}

#[async_trait]
impl Storage for SftpStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::Sftp
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
        let resolved = self.resolve(prefix)?;
        let remote = self.remote_path(&resolved);

        let checked = remote.clone();
        self.session
            .run(move |sftp| match sftp.stat(Path::new(&checked)) {
                Ok(stat) if stat.is_dir() => Ok(()),
                Ok(_) => Err(Error::NotFound(format!("{checked} is not a directory"))),
                Err(e) => Err(classify(e, &checked)),
            })
            .await?;

        let walk = Walk {
            session: self.session.clone(),
            recursive: options.recursive,
            pending: vec![(remote, resolved.key())],
            buffered: VecDeque::new(),
        };
        Ok(Box::pin(stream::try_unfold(walk, |mut walk| async move {
            Ok(walk.next_entry().await?.map(|entry| (entry, walk)))
        })))
    }

    #[instrument(skip(self, progress), fields(backend = %self.name))]
    async fn read(&self, path: &str, progress: Option<Progress>) -> Result<ByteStream> {
        let (_, remote) = self.object_path(path)?;
        let (file, size) = self
            .session
            .run(move |sftp| {
                let location = Path::new(&remote);
                let stat = sftp.stat(location).map_err(|e| classify(e, &remote))?;
                if stat.is_dir() {
                    return Err(Error::InvalidPath(format!("{remote} is a directory")));
                }
                let file = sftp.open(location).map_err(|e| classify(e, &remote))?;
                Ok((file, stat.size))
            })
            .await?;

        debug!(size = ?size, "opened for reading");
        Ok(with_progress(
            from_blocking_read(file, self.chunk_size),
            size,
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
        let (resolved, target) = self.object_path(path)?;
        let temp = temp_path_for(&target);

        let root = self.root.clone();
        let parents = resolved.parent().map(|p| p.segments().to_vec()).unwrap_or_default();
        let (checked, staging) = (target.clone(), temp.clone());
        let file = self
            .session
            .run(move |sftp| {
                if let Ok(stat) = sftp.stat(Path::new(&checked))
                    && stat.is_dir()
                {
                    return Err(Error::InvalidPath(format!("{checked} is a directory")));
                }
                ensure_dirs(sftp, &root, &parents)?;
                sftp.create(Path::new(&staging))
                    .map_err(|e| classify(e, &staging))
            })
            .await?;

        let mut sink = SftpSink {
            session: self.session.clone(),
            file: Some(file),
            temp,
            target,
            finished: false,
        };
        let written = drain_into(with_progress(source, size_hint, progress), &mut sink).await?;
        info!(path = %resolved, bytes = written, "stored");
        Ok(())
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn delete(&self, path: &str) -> Result<()> {
        let (_, remote) = self.object_path(path)?;
        self.session
            .run(move |sftp| {
                let location = Path::new(&remote);
                match sftp.lstat(location) {
                    Ok(stat) if stat.is_dir() => {
                        Err(Error::InvalidPath(format!("{remote} is a directory")))
                    }
                    Ok(_) => match Sftp::unlink(sftp, location) {
                        Err(e) if !is_not_found(&e) => Err(classify(e, &remote)),
                        _ => Ok(()),
                    },
                    Err(e) if is_not_found(&e) => Ok(()),
                    Err(e) => Err(classify(e, &remote)),
                }
            })
            .await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let resolved = self.resolve(path)?;
        let remote = self.remote_path(&resolved);
        self.session
            .run(move |sftp| match sftp.lstat(Path::new(&remote)) {
                Ok(_) => Ok(true),
                Err(e) if is_not_found(&e) => Ok(false),
                Err(e) => Err(classify(e, &remote)),
            })
            .await
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

    async fn close(&self) -> Result<()> {
        self.session.close().await
    }
}
