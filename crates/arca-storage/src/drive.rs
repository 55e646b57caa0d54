//! Drive and cloud-storage sources read over their HTTP JSON APIs with a bearer token.

use arca_core::models::ProviderTag;
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use std::io;
use tokio_util::io::StreamReader;

use crate::traits::{
    HeadOutcome, ObjectHead, ObjectSource, ObjectStream, StorageError, StorageResult,
};

const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
const GCS_API_BASE: &str = "https://storage.googleapis.com/storage/v1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFileMetadata {
    size: Option<String>,
    md5_checksum: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcsObjectMetadata {
    size: Option<String>,
    md5_hash: Option<String>,
    storage_class: Option<String>,
}

/// Read-only client for Google Drive files and Google Cloud Storage objects.
///
/// Drive locations use the file id as `object_id`; the container is ignored.
#[derive(Clone)]
pub struct DriveClient {
    http: reqwest::Client,
    provider: ProviderTag,
    access_token: String,
    base_url: String,
}

impl DriveClient {
    pub fn new(http: reqwest::Client, provider: ProviderTag, access_token: String) -> Self {
        let base_url = match provider {
            ProviderTag::GoogleCloudStorage => GCS_API_BASE,
            _ => DRIVE_API_BASE,
        };
        Self {
            http,
            provider,
            access_token,
            base_url: base_url.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn object_url(&self, container: &str, object: &str) -> String {
        match self.provider {
            ProviderTag::GoogleCloudStorage => format!(
                "{}/b/{}/o/{}",
                self.base_url,
                container,
                urlencoding::encode(object)
            ),
            _ => format!(
                "{}/files/{}",
                self.base_url,
                urlencoding::encode(object)
            ),
        }
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> StorageResult<reqwest::Response> {
        self.http
            .get(url)
            .bearer_auth(&self.access_token)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    provider = %self.provider,
                    url = %url,
                    "Drive source request failed"
                );
                StorageError::Backend(e.to_string())
            })
    }
}

fn parse_size(size: Option<&str>) -> StorageResult<u64> {
    size.unwrap_or("0")
        .parse::<u64>()
        .map_err(|e| StorageError::Backend(format!("invalid size in metadata: {}", e)))
}

#[async_trait]
impl ObjectSource for DriveClient {
    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<HeadOutcome> {
        let url = self.object_url(bucket, key);
        let query: &[(&str, &str)] = match self.provider {
            ProviderTag::GoogleCloudStorage => &[],
            _ => &[("fields", "size,md5Checksum"), ("supportsAllDrives", "true")],
        };
        let response = self.get(&url, query).await?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(HeadOutcome::NotFound),
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                return Ok(HeadOutcome::AccessDenied)
            }
            status if !status.is_success() => {
                return Err(StorageError::Backend(format!(
                    "metadata request for {} returned {}",
                    key, status
                )))
            }
            _ => {}
        }

        let head = match self.provider {
            ProviderTag::GoogleCloudStorage => {
                let metadata: GcsObjectMetadata = response
                    .json()
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
                ObjectHead {
                    size: parse_size(metadata.size.as_deref())?,
                    etag: metadata.md5_hash,
                    storage_class: metadata.storage_class,
                    ..ObjectHead::default()
                }
            }
            _ => {
                let metadata: DriveFileMetadata = response
                    .json()
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
                ObjectHead {
                    size: parse_size(metadata.size.as_deref())?,
                    etag: metadata.md5_checksum,
                    ..ObjectHead::default()
                }
            }
        };
        Ok(HeadOutcome::Found(head))
    }

    async fn get_stream(&self, bucket: &str, key: &str) -> StorageResult<ObjectStream> {
        let url = self.object_url(bucket, key);
        let response = self.get(&url, &[("alt", "media")]).await?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(StorageError::NotFound(key.to_string())),
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                return Err(StorageError::AccessDenied(key.to_string()))
            }
            status if !status.is_success() => {
                return Err(StorageError::Backend(format!(
                    "media request for {} returned {}",
                    key, status
                )))
            }
            _ => {}
        }

        let size = response.content_length();
        let body = response.bytes_stream().map_err(io::Error::other);
        Ok(ObjectStream {
            reader: Box::pin(StreamReader::new(body)),
            size,
        })
    }
}
