//! stow-s3: S3 backend for stowage
//!
//! Wraps aws-sdk-s3 and implements the `Storage` trait from stow-core. Works
//! with AWS and any S3-compatible service reachable through a custom endpoint.

mod client;
mod error;
mod upload;

pub use client::{MAX_ACCESS_URL_TTL, MIN_PART_SIZE, S3Storage};
