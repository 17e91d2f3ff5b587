//! S3 storage implementation
//!
//! Wraps aws-sdk-s3 and implements the Storage trait from stow-core.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_sdk_s3::presigning::PresigningConfig;
use futures::stream;
use jiff::Timestamp;
use stow_core::copy;
use stow_core::stream::{drain_into, rechunk, with_progress};
use stow_core::traits::validate_ttl;
use stow_core::{
    AccessMethod, AccessUrl, BackendKind, ByteStream, EntryStream, Error, ListEntry, ListOptions,
    Progress, Result, S3Config, Storage, StoragePath,
};
use tracing::{debug, info, instrument};

use crate::error::classify;
use crate::upload::{MultipartSink, SdkUploads};

/// Smallest part size S3 accepts for all but the last part (5 MiB)
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Longest validity S3 allows for a pre-signed URL
pub const MAX_ACCESS_URL_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

const MAX_PARTS: u64 = 10_000;

/// Largest object `CopyObject` handles in one request
const MAX_COPY_OBJECT_SIZE: i64 = 5 * 1024 * 1024 * 1024;

/// S3 bucket (optionally below a key prefix) as a storage backend
pub struct S3Storage {
    name: String,
    inner: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
    chunk_size: usize,
    /// Endpoint, region and credential source; equal identities can copy server-side
    identity: String,
}

impl S3Storage {
    /// Build a client from configuration. No request is sent until first use.
    pub async fn new(config: &S3Config) -> Result<Self> {
        config.validate()?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .retry_config(RetryConfig::standard().with_max_attempts(config.max_attempts));

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(aws_credential_types::Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "stow-static-credentials",
            ));
        } else if let Some(profile) = &config.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style)
            .build();

        let identity = format!(
            "{}|{}|{}",
            config.endpoint.as_deref().unwrap_or("aws"),
            config.region,
            config
                .access_key
                .as_deref()
                .or(config.profile.as_deref())
                .unwrap_or("default-chain"),
        );

        Ok(Self {
            name: format!("s3-{}", config.bucket),
            inner: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            prefix: config.prefix.trim_matches('/').to_string(),
            chunk_size: config.chunk_size.max(MIN_PART_SIZE),
            identity,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Get the underlying aws-sdk-s3 client
    pub fn inner(&self) -> &aws_sdk_s3::Client {
        &self.inner
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_key(&self, path: &StoragePath) -> String {
        path.with_prefix(&self.prefix)
    }

    /// Listing prefix for a directory-like path: empty or ending in `/`
    fn dir_prefix(&self, path: &StoragePath) -> String {
        let key = path.with_prefix(&self.prefix);
        if key.is_empty() { key } else { format!("{key}/") }
    }

    fn object_path(&self, path: &str) -> Result<(StoragePath, String)> {
        let resolved = self.resolve(path)?;
        if resolved.is_root() {
            return Err(Error::InvalidPath(format!(
                "'{path}' does not name an object"
            )));
        }
        let key = self.object_key(&resolved);
        Ok((resolved, key))
    }

    /// Part size keeping an upload of `size_hint` bytes within the part limit
    fn part_size(&self, size_hint: Option<u64>) -> usize {
        match size_hint {
            Some(size) => self
                .chunk_size
                .max(usize::try_from(size.div_ceil(MAX_PARTS)).unwrap_or(usize::MAX)),
            None => self.chunk_size,
        }
    }

    async fn head_size(&self, key: &str) -> Result<Option<i64>> {
        let response = self
            .inner
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, key))?;
        Ok(response.content_length())
    }

    async fn has_children(&self, prefix: &str) -> Result<bool> {
        let response = self
            .inner
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys(1)
            .send()
            .await
            .map_err(|e| classify(e, prefix))?;
        Ok(response.key_count().unwrap_or(0) > 0 || !response.contents().is_empty())
    }
}

/// Strip the backend prefix from listed keys, dropping keys outside it
fn relative_key(root: &str, key: &str) -> Option<String> {
    if root.is_empty() {
        return Some(key.to_string());
    }
    key.strip_prefix(root)?
        .strip_prefix('/')
        .filter(|rest| !rest.is_empty())
        .map(str::to_string)
}

fn to_timestamp(dt: Option<&aws_smithy_types::DateTime>) -> Option<Timestamp> {
    dt.and_then(|dt| Timestamp::from_second(dt.secs()).ok())
}

/// Lazily walks `ListObjectsV2` pages
struct Pager {
    client: aws_sdk_s3::Client,
    bucket: String,
    root: String,
    prefix: String,
    recursive: bool,
    token: Option<String>,
    buffered: VecDeque<ListEntry>,
    exhausted: bool,
}

impl Pager {
    async fn next_entry(&mut self) -> Result<Option<ListEntry>> {
        loop {
            if let Some(entry) = self.buffered.pop_front() {
                return Ok(Some(entry));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let mut request = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .set_continuation_token(self.token.take());
        if !self.prefix.is_empty() {
            request = request.prefix(&self.prefix);
        }
        if !self.recursive {
            request = request.delimiter("/");
        }

        let response = request.send().await.map_err(|e| {
            let err = classify(e, &self.prefix);
            match err {
                Error::NotFound(_) => Error::NotFound(format!("bucket not found: {}", self.bucket)),
                other => other,
            }
        })?;

        for common in response.common_prefixes() {
            if let Some(rel) = common.prefix().and_then(|p| relative_key(&self.root, p)) {
                self.buffered.push_back(ListEntry::dir(rel));
            }
        }
        for object in response.contents() {
            let Some(key) = object.key() else { continue };
            // zero-byte directory markers created by consoles
            if key.ends_with('/') {
                continue;
            }
            if let Some(rel) = relative_key(&self.root, key) {
                let size = object.size().unwrap_or(0).max(0) as u64;
                self.buffered.push_back(
                    ListEntry::file(rel, size).modified(to_timestamp(object.last_modified())),
                );
            }
        }

        self.token = response.next_continuation_token().map(str::to_string);
        self.exhausted = !response.is_truncated().unwrap_or(false) || self.token.is_none();
        debug!(entries = self.buffered.len(), more = !self.exhausted, "fetched listing page");
        Ok(())
    }
}

#[async_trait]
impl Storage for S3Storage {
    fn kind(&self) -> BackendKind {
        BackendKind::S3
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
        let pager = Pager {
            client: self.inner.clone(),
            bucket: self.bucket.clone(),
            root: self.prefix.clone(),
            prefix: self.dir_prefix(&resolved),
            recursive: options.recursive,
            token: None,
            buffered: VecDeque::new(),
            exhausted: false,
        };

        Ok(Box::pin(stream::try_unfold(pager, |mut pager| async move {
            Ok(pager.next_entry().await?.map(|entry| (entry, pager)))
        })))
    }

    #[instrument(skip(self, progress), fields(backend = %self.name))]
    async fn read(&self, path: &str, progress: Option<Progress>) -> Result<ByteStream> {
        let (_, key) = self.object_path(path)?;
        let response = self
            .inner
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| classify(e, &key))?;

        let total = response.content_length().map(|n| n.max(0) as u64);
        debug!(size = ?total, "opened object for reading");

        let body: ByteStream = Box::pin(stream::try_unfold(
            response.body,
            |mut body| async move {
                match body.try_next().await {
                    Ok(Some(chunk)) => Ok(Some((chunk, body))),
                    Ok(None) => Ok(None),
                    Err(e) => Err(Error::Connectivity(format!("reading object body: {e}"))),
                }
            },
        ));
        Ok(with_progress(rechunk(body, self.chunk_size), total, progress))
    }

    #[instrument(skip(self, source, progress), fields(backend = %self.name))]
    async fn write(
        &self,
        path: &str,
        source: ByteStream,
        size_hint: Option<u64>,
        progress: Option<Progress>,
    ) -> Result<()> {
        let (resolved, key) = self.object_path(path)?;
        let content_type = mime_guess::from_path(&key)
            .first_or_octet_stream()
            .to_string();

        let uploads = Arc::new(SdkUploads::new(self.inner.clone(), &self.bucket));
        let mut sink = MultipartSink::new(uploads, &key, content_type);
        let source = rechunk(
            with_progress(source, size_hint, progress),
            self.part_size(size_hint),
        );
        let written = drain_into(source, &mut sink).await?;
        info!(path = %resolved, bytes = written, "stored");
        Ok(())
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn delete(&self, path: &str) -> Result<()> {
        let (_, key) = self.object_path(path)?;
        match self
            .inner
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => match classify(e, &key) {
                Error::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let resolved = self.resolve(path)?;
        if resolved.is_root() {
            return match self.inner.head_bucket().bucket(&self.bucket).send().await {
                Ok(_) => Ok(true),
                Err(e) => match classify(e, &self.bucket) {
                    Error::NotFound(_) => Ok(false),
                    other => Err(other),
                },
            };
        }

        match self.head_size(&self.object_key(&resolved)).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => self.has_children(&self.dir_prefix(&resolved)).await,
            Err(e) => Err(e),
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
        let Some(target) = dst_backend.as_any().downcast_ref::<S3Storage>() else {
            return Ok(false);
        };
        if target.identity != self.identity {
            debug!("different endpoint or credentials, streaming instead");
            return Ok(false);
        }

        let src_key = self.object_key(src);
        let dst_key = target.object_key(dst);
        let size = self.head_size(&src_key).await?.unwrap_or(0);
        if size > MAX_COPY_OBJECT_SIZE {
            debug!(size, "object too large for CopyObject, streaming instead");
            return Ok(false);
        }

        let encoded_key: Vec<String> = src_key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        let copy_source = format!("{}/{}", self.bucket, encoded_key.join("/"));

        target
            .inner
            .copy_object()
            .copy_source(copy_source)
            .bucket(&target.bucket)
            .key(&dst_key)
            .send()
            .await
            .map_err(|e| classify(e, &src_key))?;

        debug!(src = %src_key, dst = %dst_key, size, "server-side copy");
        Ok(true)
    }

    async fn generate_access_url(
        &self,
        path: &str,
        method: AccessMethod,
        ttl: Duration,
    ) -> Result<AccessUrl> {
        let (_, key) = self.object_path(path)?;
        validate_ttl(ttl)?;
        if ttl > MAX_ACCESS_URL_TTL {
            return Err(Error::Config(format!(
                "access URL expiry may not exceed {} days",
                MAX_ACCESS_URL_TTL.as_secs() / 86_400
            )));
        }
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|e| Error::Config(format!("invalid access URL expiry: {e}")))?;

        let signed_at = Timestamp::now();
        let request = match method {
            AccessMethod::Get => self
                .inner
                .get_object()
                .bucket(&self.bucket)
                .key(&key)
                .presigned(presigning)
                .await
                .map_err(|e| classify(e, &key))?,
            AccessMethod::Put => self
                .inner
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .presigned(presigning)
                .await
                .map_err(|e| classify(e, &key))?,
        };

        AccessUrl::new(request.uri(), method, signed_at, ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn storage(prefix: &str) -> S3Storage {
        let mut config = S3Config::new("media");
        config.prefix = prefix.to_string();
        config.endpoint = Some("http://127.0.0.1:9000".to_string());
        config.access_key = Some("AKIDEXAMPLE".to_string());
        config.secret_key = Some("wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string());
        config.force_path_style = true;
        config.chunk_size = 1024;
        S3Storage::new(&config).await.unwrap()
    }

    #[test]
    fn test_relative_key() {
        assert_eq!(relative_key("", "a/b.txt").as_deref(), Some("a/b.txt"));
        assert_eq!(relative_key("root", "root/a/b.txt").as_deref(), Some("a/b.txt"));
        assert_eq!(relative_key("root", "rootless/a.txt"), None);
        assert_eq!(relative_key("root", "root/"), None);
    }

    #[tokio::test]
    async fn test_chunk_size_raised_to_minimum_part() {
        let s3 = storage("").await;
        assert_eq!(s3.chunk_size(), MIN_PART_SIZE);
        assert_eq!(s3.name(), "s3-media");
        assert_eq!(s3.kind(), BackendKind::S3);
    }

    #[tokio::test]
    async fn test_part_size_respects_part_limit() {
        let s3 = storage("").await;
        assert_eq!(s3.part_size(None), MIN_PART_SIZE);
        assert_eq!(s3.part_size(Some(1024)), MIN_PART_SIZE);

        let huge = 200 * 1024 * 1024 * 1024u64;
        let part = s3.part_size(Some(huge)) as u64;
        assert!(part * MAX_PARTS >= huge);
    }

    #[tokio::test]
    async fn test_keys_are_placed_under_prefix() {
        let s3 = storage("/backups/").await;
        let path = StoragePath::parse("2024/db.dump").unwrap();
        assert_eq!(s3.object_key(&path), "backups/2024/db.dump");
        assert_eq!(s3.dir_prefix(&path), "backups/2024/db.dump/");
        assert_eq!(s3.dir_prefix(&StoragePath::root()), "backups/");

        let bare = storage("").await;
        assert_eq!(bare.dir_prefix(&StoragePath::root()), "");
    }

    #[tokio::test]
    async fn test_root_and_traversal_rejected_before_any_request() {
        let s3 = storage("").await;
        let err = s3.read("/", None).await.err().unwrap();
        assert!(matches!(err, Error::InvalidPath(_)));
        let err = s3.delete("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_presigned_get_url() {
        let s3 = storage("exports").await;
        let url = s3
            .generate_access_url("report.csv", AccessMethod::Get, Duration::from_secs(600))
            .await
            .unwrap();

        assert!(url.url.starts_with("http://127.0.0.1:9000/media/exports/report.csv?"));
        assert!(url.url.contains("X-Amz-Expires=600"));
        assert!(url.url.contains("X-Amz-Signature="));
        assert_eq!(url.method, AccessMethod::Get);
        assert!(url.expires_at > Timestamp::now());
    }

    #[tokio::test]
    async fn test_presigned_put_url() {
        let s3 = storage("").await;
        let url = s3
            .generate_access_url("incoming/upload.bin", AccessMethod::Put, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.url.contains("/media/incoming/upload.bin?"));
        assert_eq!(url.method, AccessMethod::Put);
    }

    #[tokio::test]
    async fn test_access_url_ttl_bounds() {
        let s3 = storage("").await;
        let err = s3
            .generate_access_url("a", AccessMethod::Get, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = s3
            .generate_access_url("a", AccessMethod::Get, MAX_ACCESS_URL_TTL + Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_native_copy_skipped_for_other_backends() {
        let s3 = storage("").await;
        let other = stow_core::testing::MemoryStorage::new(BackendKind::S3, 8);
        let src = StoragePath::parse("a").unwrap();
        assert!(!s3.native_copy(&src, &other, &src).await.unwrap());
    }
}
