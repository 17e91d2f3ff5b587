//! Contract tests against a running S3-compatible server
//!
//! Run with `--features integration` and point the tests at a disposable
//! bucket through `STOW_TEST_S3_BUCKET`, `STOW_TEST_S3_ENDPOINT`,
//! `STOW_TEST_S3_ACCESS_KEY` and `STOW_TEST_S3_SECRET_KEY`.

#![cfg(feature = "integration")]

use std::time::Duration;

use stow_core::testing;
use stow_core::{AccessMethod, S3Config, Storage};
use stow_s3::S3Storage;

async fn storage(prefix: &str) -> Option<S3Storage> {
    let Ok(bucket) = std::env::var("STOW_TEST_S3_BUCKET") else {
        eprintln!("STOW_TEST_S3_BUCKET not set, skipping");
        return None;
    };
    let mut config = S3Config::new(bucket);
    config.prefix = prefix.to_string();
    config.endpoint = std::env::var("STOW_TEST_S3_ENDPOINT").ok();
    config.access_key = std::env::var("STOW_TEST_S3_ACCESS_KEY").ok();
    config.secret_key = std::env::var("STOW_TEST_S3_SECRET_KEY").ok();
    config.force_path_style = config.endpoint.is_some();
    Some(S3Storage::new(&config).await.expect("s3 config"))
}

fn run_id() -> String {
    format!("stow-it-{}", jiff::Timestamp::now().as_millisecond())
}

#[tokio::test]
async fn s3_backend_satisfies_contract() {
    let Some(s3) = storage("").await else { return };
    testing::check_all(&s3, &run_id()).await;
}

#[tokio::test]
async fn s3_backend_under_prefix() {
    let Some(s3) = storage(&run_id()).await else { return };
    testing::check_listing(&s3, "").await;
    testing::check_exists_and_delete(&s3, "nested").await;
}

#[tokio::test]
async fn s3_server_side_copy_between_handles() {
    let Some(a) = storage("").await else { return };
    let Some(b) = storage(&run_id()).await else { return };
    testing::check_copy(&a, &run_id(), &b, "").await;
}

#[tokio::test]
async fn presigned_url_targets_object() {
    let Some(s3) = storage("").await else { return };
    let url = s3
        .generate_access_url("links/file.txt", AccessMethod::Get, Duration::from_secs(300))
        .await
        .unwrap();
    assert!(url.url.contains("links/file.txt"));
    assert!(!url.is_expired());
}
