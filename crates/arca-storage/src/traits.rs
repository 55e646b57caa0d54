//! Object storage client abstraction
//!
//! [`ObjectSource`] is the read side every provider family offers. [`ObjectStoreClient`]
//! is the full bucket/key API of S3-family providers and [`Presigner`] produces
//! time-limited URLs. The transfer proxies are written against these traits only.

use arca_core::models::UploadPartETag;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::lifecycle::TieringRule;

/// Storage client errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for storage client operations
pub type StorageResult<T> = Result<T, StorageError>;

pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// An open object body.
pub struct ObjectStream {
    pub reader: BoxedReader,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHead {
    pub size: u64,
    pub etag: Option<String>,
    pub metadata: HashMap<String, String>,
    pub storage_class: Option<String>,
    /// Raw restore marker (`ongoing-request="..."`).
    pub restore: Option<String>,
}

/// Head result. Access denied is a distinct answer, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadOutcome {
    Found(ObjectHead),
    NotFound,
    AccessDenied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    pub next_continuation_token: Option<String>,
    pub is_truncated: bool,
}

/// User metadata and storage class written with an object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectAttributes {
    pub metadata: HashMap<String, String>,
    pub storage_class: Option<String>,
}

#[async_trait]
pub trait ObjectSource: Send + Sync {
    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<HeadOutcome>;

    async fn get_stream(&self, bucket: &str, key: &str) -> StorageResult<ObjectStream>;
}

#[async_trait]
pub trait ObjectStoreClient: ObjectSource {
    /// Whether the bucket exists and is reachable with these credentials.
    async fn head_bucket(&self, bucket: &str) -> StorageResult<bool>;

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        max_keys: Option<i32>,
    ) -> StorageResult<ListPage>;

    /// Uploads a local file, multipart above the configured threshold. Returns the ETag.
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        attributes: &ObjectAttributes,
    ) -> StorageResult<String>;

    /// Uploads exactly `size` bytes from `body`. Returns the ETag.
    async fn put_stream(
        &self,
        bucket: &str,
        key: &str,
        size: u64,
        body: BoxedReader,
        attributes: &ObjectAttributes,
    ) -> StorageResult<String>;

    /// Downloads an object into a local file. Returns the number of bytes written.
    async fn get_to_file(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<u64>;

    /// Copy-to-self with metadata replacement. Returns the new ETag.
    async fn copy_in_place(
        &self,
        bucket: &str,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> StorageResult<String>;

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Opens a multipart session. Returns the provider's upload id.
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> StorageResult<String>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadPartETag],
    ) -> StorageResult<String>;

    async fn restore_object(&self, bucket: &str, key: &str, days: i32) -> StorageResult<()>;

    /// Current lifecycle rules. A bucket without a policy has none.
    async fn get_lifecycle_rules(&self, bucket: &str) -> StorageResult<Vec<TieringRule>>;

    /// Writes the full rule set, optionally with one extra request header.
    async fn put_lifecycle_rules(
        &self,
        bucket: &str,
        rules: &[TieringRule],
        extra_header: Option<(&str, &str)>,
    ) -> StorageResult<()>;
}

#[async_trait]
pub trait Presigner: Send + Sync {
    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
        checksum: Option<&str>,
    ) -> StorageResult<String>;

    async fn presign_upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        expires_in: Duration,
    ) -> StorageResult<String>;

    async fn presign_get(&self, bucket: &str, key: &str, expires_in: Duration)
        -> StorageResult<String>;
}

/// Strips the quotes providers put around ETags.
pub fn normalize_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_quotes_are_stripped() {
        assert_eq!(normalize_etag("\"abc123\""), "abc123");
        assert_eq!(normalize_etag("abc123"), "abc123");
    }
}
