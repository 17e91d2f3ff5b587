//! stow-sftp: SFTP backend for stowage
//!
//! Built on libssh2 through the `ssh2` crate. libssh2 calls block, so every
//! remote operation runs on tokio's blocking pool while the async side only
//! moves chunks in and out.

mod error;
mod session;
mod storage;

pub use storage::SftpStorage;
