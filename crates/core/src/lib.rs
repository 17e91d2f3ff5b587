//! stow-core: storage contract for stowage
//!
//! This crate provides everything that does not depend on a platform SDK:
//! - Path normalization and root containment
//! - Streaming adapters and progress reporting
//! - The `Storage` trait every backend implements
//! - Copy orchestration across backends
//! - The local filesystem backend
//! - Backend configuration and profiles
//!
//! The S3 and SFTP backends live in `stow-s3` and `stow-sftp`.

pub mod config;
pub mod copy;
pub mod error;
pub mod local;
pub mod path;
pub mod progress;
pub mod stream;
pub mod traits;

#[cfg(feature = "test-support")]
pub mod testing;

pub use config::{
    BackendConfig, LocalConfig, ProfileManager, Profiles, S3Config, SftpAuth, SftpConfig,
};
pub use error::{Error, Result};
pub use local::LocalStorage;
pub use path::StoragePath;
pub use progress::{LogProgress, Progress, ProgressReporter, TransferProgress};
pub use stream::{ByteStream, ChunkSink, DEFAULT_CHUNK_SIZE};
pub use traits::{
    AccessMethod, AccessUrl, BackendKind, EntryStream, ListEntry, ListOptions, Storage,
};
