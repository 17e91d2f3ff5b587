//! Test support shared by the backend crates
//!
//! [`MemoryStorage`] is an in-process backend with failure injection, and the
//! `check_*` functions assert the contract properties every backend must hold.
//! They panic on violation, so they are meant to be called from tests.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{TryStreamExt, stream};

use crate::copy;
use crate::error::{Error, Result};
use crate::path::StoragePath;
use crate::progress::{Progress, TransferProgress};
use crate::stream::{ByteStream, ChunkSink, collect, drain_into, from_bytes, rechunk, with_progress};
use crate::traits::{AccessMethod, BackendKind, EntryStream, ListEntry, ListOptions, Storage};

type Objects = Arc<Mutex<BTreeMap<String, Bytes>>>;

fn lock(objects: &Objects) -> std::sync::MutexGuard<'_, BTreeMap<String, Bytes>> {
    objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory backend
///
/// Handles cloned with [`MemoryStorage::sharing`] see the same objects, which
/// makes them eligible for the native copy path.
pub struct MemoryStorage {
    name: String,
    kind: BackendKind,
    chunk_size: usize,
    objects: Objects,
    fail_write_after: Mutex<Option<u64>>,
    reads: AtomicUsize,
    native_copies: AtomicUsize,
    closes: AtomicUsize,
}

impl MemoryStorage {
    pub fn new(kind: BackendKind, chunk_size: usize) -> Self {
        Self {
            name: format!("memory-{kind}"),
            kind,
            chunk_size,
            objects: Arc::default(),
            fail_write_after: Mutex::new(None),
            reads: AtomicUsize::new(0),
            native_copies: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    /// Another handle over the same objects
    pub fn sharing(&self) -> Self {
        Self {
            objects: self.objects.clone(),
            ..Self::new(self.kind, self.chunk_size)
        }
    }

    /// Make the next write fail once more than `bytes` have been staged
    pub fn fail_next_write_after(&self, bytes: u64) {
        *self
            .fail_write_after
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(bytes);
    }

    pub fn read_calls(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn native_copy_calls(&self) -> usize {
        self.native_copies.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        lock(&self.objects).get(key).cloned()
    }
}

struct MemorySink {
    objects: Objects,
    key: String,
    staged: Vec<u8>,
    fail_after: Option<u64>,
}

#[async_trait]
impl ChunkSink for MemorySink {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<()> {
        self.staged.extend_from_slice(&chunk);
        if let Some(limit) = self.fail_after
            && self.staged.len() as u64 > limit
        {
            return Err(Error::Io(std::io::Error::other(format!(
                "injected failure after {limit} bytes"
            ))));
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let data = Bytes::from(std::mem::take(&mut self.staged));
        lock(&self.objects).insert(self.key.clone(), data);
        Ok(())
    }

    async fn abort(&mut self) {
        self.staged.clear();
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn kind(&self) -> BackendKind {
        self.kind
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

    async fn list(&self, prefix: &str, options: ListOptions) -> Result<EntryStream> {
        let dir = self.resolve(prefix)?.key();
        let base = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };

        let mut entries: Vec<ListEntry> = Vec::new();
        for (key, data) in lock(&self.objects).iter() {
            let Some(rest) = key.strip_prefix(&base) else {
                continue;
            };
            match rest.split_once('/') {
                Some((child, _)) if !options.recursive => {
                    let entry = ListEntry::dir(format!("{base}{child}"));
                    if !entries.contains(&entry) {
                        entries.push(entry);
                    }
                }
                _ => entries.push(ListEntry::file(key.clone(), data.len() as u64)),
            }
        }
        Ok(Box::pin(stream::iter(entries.into_iter().map(Ok))))
    }

    async fn read(&self, path: &str, progress: Option<Progress>) -> Result<ByteStream> {
        let key = self.resolve(path)?.key();
        self.reads.fetch_add(1, Ordering::SeqCst);
        let data = self
            .object(&key)
            .ok_or_else(|| Error::NotFound(key.clone()))?;
        let total = data.len() as u64;
        Ok(with_progress(
            rechunk(from_bytes(data), self.chunk_size),
            Some(total),
            progress,
        ))
    }

    async fn write(
        &self,
        path: &str,
        source: ByteStream,
        size_hint: Option<u64>,
        progress: Option<Progress>,
    ) -> Result<()> {
        let resolved = self.resolve(path)?;
        if resolved.is_root() {
            return Err(Error::InvalidPath("cannot write to the storage root".into()));
        }
        let fail_after = self
            .fail_write_after
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        let mut sink = MemorySink {
            objects: self.objects.clone(),
            key: resolved.key(),
            staged: Vec::new(),
            fail_after,
        };
        drain_into(with_progress(source, size_hint, progress), &mut sink).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let key = self.resolve(path)?.key();
        lock(&self.objects).remove(&key);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let key = self.resolve(path)?.key();
        Ok(lock(&self.objects).contains_key(&key))
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
        let Some(other) = dst_backend.as_any().downcast_ref::<MemoryStorage>() else {
            return Ok(false);
        };
        if !Arc::ptr_eq(&self.objects, &other.objects) {
            return Ok(false);
        }
        let mut objects = lock(&self.objects);
        let data = objects
            .get(&src.key())
            .cloned()
            .ok_or_else(|| Error::NotFound(src.key()))?;
        objects.insert(dst.key(), data);
        self.native_copies.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Deterministic payload of `len` bytes
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Split `data` into uneven pieces so writers see arbitrary chunk boundaries
pub fn uneven_stream(data: &[u8]) -> ByteStream {
    let mut pieces = Vec::new();
    let mut rest = Bytes::copy_from_slice(data);
    let mut step = 1;
    while !rest.is_empty() {
        let take = step.min(rest.len());
        pieces.push(Ok(rest.split_to(take)));
        step = step * 3 + 1;
    }
    Box::pin(stream::iter(pieces))
}

fn join(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}/{name}", base.trim_end_matches('/'))
    }
}

/// Payload sizes around the chunk size: empty, tiny, exact and straddling
pub fn boundary_sizes(chunk_size: usize) -> Vec<usize> {
    let mut sizes = vec![
        0,
        1,
        chunk_size.saturating_sub(1),
        chunk_size,
        chunk_size + 1,
        2 * chunk_size + chunk_size / 2,
    ];
    sizes.dedup();
    sizes
}

/// `read` after `write` reproduces the payload byte for byte
pub async fn check_round_trip(storage: &dyn Storage, base: &str) {
    for size in boundary_sizes(storage.chunk_size()) {
        let path = join(base, &format!("round-trip-{size}.bin"));
        let data = payload(size);
        storage
            .write(&path, uneven_stream(&data), Some(size as u64), None)
            .await
            .unwrap_or_else(|e| panic!("write {path}: {e}"));

        let back = collect(storage.read(&path, None).await.unwrap_or_else(|e| panic!("read {path}: {e}")))
            .await
            .unwrap_or_else(|e| panic!("read {path}: {e}"));
        assert_eq!(back.len(), size, "size mismatch for {path}");
        assert!(back.as_ref() == data.as_slice(), "content mismatch for {path}");

        storage.delete(&path).await.unwrap();
    }
}

/// Deleting twice succeeds; `exists` flips from false to true and back
pub async fn check_exists_and_delete(storage: &dyn Storage, base: &str) {
    let path = join(base, "exists-check.txt");
    assert!(!storage.exists(&path).await.unwrap(), "{path} should not exist yet");
    storage.delete(&path).await.expect("deleting a missing path");

    storage
        .write(&path, from_bytes("check"), Some(5), None)
        .await
        .unwrap();
    assert!(storage.exists(&path).await.unwrap(), "{path} should exist after write");

    storage.delete(&path).await.unwrap();
    storage.delete(&path).await.expect("second delete");
    assert!(!storage.exists(&path).await.unwrap());
}

/// Progress during a write adds up to the payload size, ending at exactly N
pub async fn check_write_progress(storage: &dyn Storage, base: &str) {
    let size = storage.chunk_size() * 2 + 3;
    let data = payload(size);
    let path = join(base, "progress.bin");

    let seen = Arc::new(Mutex::new(Vec::<TransferProgress>::new()));
    let sink = seen.clone();
    let reporter: Progress = Arc::new(move |p: TransferProgress| {
        sink.lock().unwrap_or_else(|e| e.into_inner()).push(p)
    });

    storage
        .write(&path, uneven_stream(&data), Some(size as u64), Some(reporter))
        .await
        .unwrap();

    let seen = seen.lock().unwrap_or_else(|e| e.into_inner());
    assert!(!seen.is_empty(), "no progress reported");
    assert!(
        seen.windows(2).all(|w| w[0].transferred <= w[1].transferred),
        "progress went backwards"
    );
    assert!(seen.iter().all(|p| p.total == Some(size as u64)));
    assert_eq!(seen.last().map(|p| p.transferred), Some(size as u64));

    storage.delete(&path).await.unwrap();
}

/// Traversal out of the root fails with `InvalidPath` on every operation
pub async fn check_traversal_rejected(storage: &dyn Storage) {
    let escape = "../../outside.txt";
    let is_invalid = |e: &Error| matches!(e, Error::InvalidPath(_));

    assert!(is_invalid(&storage.read(escape, None).await.err().unwrap()));
    assert!(is_invalid(
        &storage.write(escape, from_bytes("x"), None, None).await.unwrap_err()
    ));
    assert!(is_invalid(&storage.delete(escape).await.unwrap_err()));
    assert!(is_invalid(&storage.exists(escape).await.unwrap_err()));
    assert!(is_invalid(
        &storage.list(escape, ListOptions::default()).await.err().unwrap()
    ));
}

/// Access URLs are not available on this backend
pub async fn check_access_url_unsupported(storage: &dyn Storage) {
    let err = storage
        .generate_access_url("any.txt", AccessMethod::Get, Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)), "got {err}");
}

/// Copy from `src` to `dst` yields the same bytes on the destination
pub async fn check_copy(src: &dyn Storage, src_base: &str, dst: &dyn Storage, dst_base: &str) {
    let size = src.chunk_size() + 17;
    let data = payload(size);
    let from = join(src_base, "copy-source.bin");
    let to = join(dst_base, "copied/copy-target.bin");

    src.write(&from, uneven_stream(&data), None, None).await.unwrap();
    src.copy(&from, &to, Some(dst), None).await.unwrap();

    let copied = collect(dst.read(&to, None).await.unwrap()).await.unwrap();
    assert!(copied.as_ref() == data.as_slice(), "copied content differs");
    assert!(src.exists(&from).await.unwrap(), "copy must not remove the source");

    src.delete(&from).await.unwrap();
    dst.delete(&to).await.unwrap();
}

/// Shallow listing shows direct children; recursive listing shows every file
pub async fn check_listing(storage: &dyn Storage, base: &str) {
    for name in ["list/a.txt", "list/sub/b.txt"] {
        storage
            .write(&join(base, name), from_bytes("x"), None, None)
            .await
            .unwrap();
    }
    let dir = join(base, "list");
    let dir_key = StoragePath::parse(&dir).unwrap().key();

    let mut shallow: Vec<ListEntry> = storage
        .list(&dir, ListOptions::default())
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    shallow.sort_by(|a, b| a.path.cmp(&b.path));
    let paths: Vec<&str> = shallow.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![format!("{dir_key}/a.txt"), format!("{dir_key}/sub/")]
    );
    assert!(!shallow[0].is_dir && shallow[1].is_dir);
    assert_eq!(shallow[0].size, 1);

    let mut deep: Vec<String> = storage
        .list(&dir, ListOptions::recursive())
        .await
        .unwrap()
        .map_ok(|e| e.path)
        .try_collect()
        .await
        .unwrap();
    deep.sort();
    assert_eq!(
        deep,
        vec![format!("{dir_key}/a.txt"), format!("{dir_key}/sub/b.txt")]
    );

    for name in ["list/a.txt", "list/sub/b.txt"] {
        storage.delete(&join(base, name)).await.unwrap();
    }
}

/// Every check that needs a single backend
pub async fn check_all(storage: &dyn Storage, base: &str) {
    check_traversal_rejected(storage).await;
    check_round_trip(storage, base).await;
    check_exists_and_delete(storage, base).await;
    check_write_progress(storage, base).await;
    check_listing(storage, base).await;
    check_copy(storage, base, storage, base).await;
}
