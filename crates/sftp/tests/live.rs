//! Contract tests against a reachable SFTP server
//!
//! Run with `--features integration`. The server is taken from
//! `STOW_TEST_SFTP_HOST`, `STOW_TEST_SFTP_PORT`, `STOW_TEST_SFTP_USER`,
//! `STOW_TEST_SFTP_PASSWORD` (agent auth when unset) and `STOW_TEST_SFTP_ROOT`.
//! Its host key must be present in the user's known_hosts file.

#![cfg(feature = "integration")]

use stow_core::testing;
use stow_core::{Error, SftpAuth, SftpConfig, Storage};
use stow_sftp::SftpStorage;

fn config() -> Option<SftpConfig> {
    let Ok(host) = std::env::var("STOW_TEST_SFTP_HOST") else {
        eprintln!("STOW_TEST_SFTP_HOST not set, skipping");
        return None;
    };
    let user = std::env::var("STOW_TEST_SFTP_USER").unwrap_or_else(|_| "stow".into());
    let mut config = SftpConfig::new(host, user);
    if let Some(port) = std::env::var("STOW_TEST_SFTP_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
    {
        config.port = port;
    }
    if let Ok(password) = std::env::var("STOW_TEST_SFTP_PASSWORD") {
        config.auth = SftpAuth::Password { password };
    }
    if let Ok(root) = std::env::var("STOW_TEST_SFTP_ROOT") {
        config.root = root;
    }
    config.chunk_size = 64 * 1024;
    Some(config)
}

fn run_id() -> String {
    format!("stow-it-{}", jiff::Timestamp::now().as_millisecond())
}

#[tokio::test]
async fn sftp_backend_satisfies_contract() {
    let Some(config) = config() else { return };
    let sftp = SftpStorage::connect(&config).await.unwrap();
    testing::check_all(&sftp, &run_id()).await;
    sftp.close().await.unwrap();
}

#[tokio::test]
async fn closed_session_rejects_work_until_reopened() {
    let Some(config) = config() else { return };
    let sftp = SftpStorage::connect(&config).await.unwrap();
    sftp.close().await.unwrap();

    let err = sftp.exists("anything").await.unwrap_err();
    assert!(matches!(err, Error::Connectivity(_)));

    sftp.open().await.unwrap();
    assert!(!sftp.exists(&format!("{}/nothing", run_id())).await.unwrap());
    sftp.close().await.unwrap();
}
