//! Contract tests for the local backend and the copy orchestrator

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream;
use stow_core::stream::{collect, from_bytes};
use stow_core::testing::{self, MemoryStorage, payload, uneven_stream};
use stow_core::{
    AccessMethod, BackendKind, ByteStream, Error, LocalConfig, LocalStorage, Storage,
};
use tempfile::TempDir;

fn local(dir: &TempDir, chunk_size: usize) -> LocalStorage {
    LocalStorage::new(&LocalConfig::new(dir.path()).chunk_size(chunk_size)).unwrap()
}

/// Yields `good` bytes, then fails
fn failing_after(good: usize) -> ByteStream {
    let items: Vec<stow_core::Result<Bytes>> = vec![
        Ok(Bytes::from(payload(good))),
        Err(Error::Connectivity("peer went away".into())),
    ];
    Box::pin(stream::iter(items))
}

#[tokio::test]
async fn local_backend_satisfies_contract() {
    let dir = TempDir::new().unwrap();
    testing::check_all(&local(&dir, 16), "").await;
}

#[tokio::test]
async fn local_backend_under_nested_base() {
    let dir = TempDir::new().unwrap();
    testing::check_all(&local(&dir, 7), "deep/er").await;
}

#[tokio::test]
async fn memory_backend_satisfies_contract() {
    testing::check_all(&MemoryStorage::new(BackendKind::S3, 5), "base").await;
}

#[tokio::test]
async fn local_access_url_unsupported() {
    let dir = TempDir::new().unwrap();
    testing::check_access_url_unsupported(&local(&dir, 16)).await;
}

#[tokio::test]
async fn failed_write_leaves_nothing_behind() {
    let dir = TempDir::new().unwrap();
    let store = local(&dir, 8);

    let err = store
        .write("upload.bin", failing_after(20), Some(100), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Connectivity(_)));
    assert!(!store.exists("upload.bin").await.unwrap());

    // no staging files linger in the directory
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn failed_overwrite_keeps_previous_content() {
    let dir = TempDir::new().unwrap();
    let store = local(&dir, 8);

    store
        .write("doc.txt", from_bytes("version one"), None, None)
        .await
        .unwrap();
    store
        .write("doc.txt", failing_after(30), None, None)
        .await
        .unwrap_err();

    let content = collect(store.read("doc.txt", None).await.unwrap()).await.unwrap();
    assert_eq!(content.as_ref(), b"version one");
}

#[tokio::test]
async fn local_to_local_copy_uses_disk_copy() {
    let src_dir = TempDir::new().unwrap();
    let dst_dir = TempDir::new().unwrap();
    let src = local(&src_dir, 16);
    let dst = local(&dst_dir, 16);

    testing::check_copy(&src, "from", &dst, "to").await;
}

#[tokio::test]
async fn cross_backend_copy_streams() {
    let dir = TempDir::new().unwrap();
    let disk = local(&dir, 6);
    let remote = MemoryStorage::new(BackendKind::Sftp, 4);

    testing::check_copy(&disk, "", &remote, "mirror").await;
    testing::check_copy(&remote, "mirror", &disk, "back").await;
    assert_eq!(remote.native_copy_calls(), 0);
}

#[tokio::test]
async fn same_kind_copy_prefers_native_path() {
    let a = MemoryStorage::new(BackendKind::S3, 4);
    let b = a.sharing();
    a.write("x.bin", from_bytes("payload"), None, None)
        .await
        .unwrap();

    a.copy("x.bin", "y.bin", Some(&b), None).await.unwrap();
    assert_eq!(a.native_copy_calls(), 1);
    assert_eq!(a.read_calls(), 0);
    assert_eq!(b.object("y.bin").unwrap().as_ref(), b"payload");
}

#[tokio::test]
async fn unrelated_same_kind_handles_fall_back_to_streaming() {
    let a = MemoryStorage::new(BackendKind::S3, 4);
    let b = MemoryStorage::new(BackendKind::S3, 4);
    a.write("x.bin", from_bytes("payload"), None, None)
        .await
        .unwrap();

    a.copy("x.bin", "y.bin", Some(&b), None).await.unwrap();
    assert_eq!(a.read_calls(), 1);
    assert_eq!(b.object("y.bin").unwrap().as_ref(), b"payload");
}

#[tokio::test]
async fn invalid_destination_fails_before_reading() {
    let a = MemoryStorage::new(BackendKind::Local, 4);
    let b = MemoryStorage::new(BackendKind::Sftp, 4);
    a.write("x.bin", from_bytes("payload"), None, None)
        .await
        .unwrap();

    let err = a
        .copy("x.bin", "../../escape.bin", Some(&b), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidPath(_)));
    assert_eq!(a.read_calls(), 0);
}

#[tokio::test]
async fn copy_onto_itself_is_noop() {
    let a = MemoryStorage::new(BackendKind::Local, 4);
    a.write("same.bin", from_bytes("keep"), None, None)
        .await
        .unwrap();

    a.copy("same.bin", "./same.bin", None, None).await.unwrap();
    assert_eq!(a.read_calls(), 0);
    assert_eq!(a.native_copy_calls(), 0);
    assert_eq!(a.object("same.bin").unwrap().as_ref(), b"keep");
}

#[tokio::test]
async fn copy_of_missing_object_onto_itself_is_not_found() {
    let a = MemoryStorage::new(BackendKind::Local, 4);
    let err = a.copy("ghost.bin", "ghost.bin", None, None).await.unwrap_err();
    assert!(err.is_not_found(), "got {err}");
    assert!(a.object("ghost.bin").is_none());
}

#[tokio::test]
async fn copy_of_missing_source_is_not_found() {
    let dir = TempDir::new().unwrap();
    let disk = local(&dir, 8);
    let remote = MemoryStorage::new(BackendKind::S3, 8);

    let err = disk
        .copy("ghost.bin", "out.bin", Some(&remote), None)
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "got {err}");
    assert!(!remote.exists("out.bin").await.unwrap());
}

#[tokio::test]
async fn interrupted_copy_leaves_destination_untouched() {
    let dir = TempDir::new().unwrap();
    let disk = local(&dir, 4);
    let remote = MemoryStorage::new(BackendKind::S3, 4);

    disk.write("big.bin", uneven_stream(&payload(64)), None, None)
        .await
        .unwrap();
    remote.fail_next_write_after(10);

    disk.copy("big.bin", "big.bin", Some(&remote), None)
        .await
        .unwrap_err();
    assert!(!remote.exists("big.bin").await.unwrap());
}

#[tokio::test]
async fn copy_reports_progress_on_destination() {
    use std::sync::Mutex;
    use stow_core::{Progress, TransferProgress};

    let dir = TempDir::new().unwrap();
    let disk = local(&dir, 4);
    let remote = MemoryStorage::new(BackendKind::Sftp, 4);
    disk.write("p.bin", uneven_stream(&payload(13)), None, None)
        .await
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let reporter: Progress =
        Arc::new(move |p: TransferProgress| sink.lock().unwrap().push(p.transferred));

    disk.copy("p.bin", "p.bin", Some(&remote), Some(reporter))
        .await
        .unwrap();
    assert_eq!(seen.lock().unwrap().last().copied(), Some(13));
}

#[tokio::test]
async fn symlink_out_of_root_is_rejected() {
    #[cfg(unix)]
    {
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), b"secret").unwrap();

        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();
        let store = local(&dir, 8);

        let err = store.read("escape/secret.txt", None).await.err().unwrap();
        assert!(matches!(err, Error::InvalidPath(_)));
        let err = store
            .write("escape/new.txt", from_bytes("x"), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
        assert!(!outside.path().join("new.txt").exists());
    }
}

#[tokio::test]
async fn access_url_ttl_is_irrelevant_when_unsupported() {
    let dir = TempDir::new().unwrap();
    let err = local(&dir, 8)
        .generate_access_url("a.txt", AccessMethod::Put, Duration::from_secs(3600))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
}
