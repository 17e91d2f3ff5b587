//! Profile resolution and backend construction

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use stow_core::{BackendConfig, LocalStorage, ProfileManager, Profiles, Storage};
use stow_s3::S3Storage;
use stow_sftp::SftpStorage;
use tracing::debug;

/// Profile selection taken from the global flags
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Profile named with `--profile`, otherwise the default one
    pub profile: Option<String>,
    /// Profiles file given with `--config`
    pub config: Option<PathBuf>,
}

/// An opened backend and the profile it came from
pub struct Backend {
    pub profile: String,
    pub storage: Arc<dyn Storage>,
}

impl Context {
    pub fn manager(&self) -> Result<ProfileManager> {
        match &self.config {
            Some(path) => Ok(ProfileManager::with_path(path)),
            None => ProfileManager::new().context("locating the profiles file"),
        }
    }

    pub fn profiles(&self) -> Result<Profiles> {
        let manager = self.manager()?;
        manager
            .load()
            .with_context(|| format!("loading {}", manager.path().display()))
    }

    /// Open the profile selected by the global flags
    pub async fn open(&self) -> Result<Backend> {
        self.open_named(self.profile.as_deref()).await
    }

    /// Open `name`, or the default profile when `None`
    pub async fn open_named(&self, name: Option<&str>) -> Result<Backend> {
        let profiles = self.profiles()?;
        let (profile, config) = profiles.get(name)?;
        let storage = connect(profile, config)
            .await
            .with_context(|| format!("opening profile '{profile}'"))?;
        Ok(Backend {
            profile: profile.to_string(),
            storage,
        })
    }
}

/// Build the backend described by `config`, connecting where the backend needs it
pub async fn connect(profile: &str, config: &BackendConfig) -> stow_core::Result<Arc<dyn Storage>> {
    debug!(profile, kind = %config.kind(), "opening backend");
    let storage: Arc<dyn Storage> = match config {
        BackendConfig::Local(local) => Arc::new(LocalStorage::new(local)?.with_name(profile)),
        BackendConfig::S3(s3) => Arc::new(S3Storage::new(s3).await?.with_name(profile)),
        BackendConfig::Sftp(sftp) => Arc::new(SftpStorage::connect(sftp).await?.with_name(profile)),
    };
    Ok(storage)
}

impl Backend {
    /// Run `work` against the backend, then close it whether `work` failed or not
    pub async fn run<T>(self, work: impl AsyncFnOnce(&Backend) -> Result<T>) -> Result<T> {
        let result = work(&self).await;
        self.close().await;
        result
    }

    /// Release the connection, logging rather than failing on error
    pub async fn close(self) {
        if let Err(e) = self.storage.close().await {
            tracing::warn!(profile = %self.profile, error = %e, "failed to close backend");
        }
    }
}
