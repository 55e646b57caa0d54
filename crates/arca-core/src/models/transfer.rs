use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::str::FromStr;

use super::location::{ArchiveType, FileLocation};
use super::provider::ProviderAccount;

/// Transfer mechanism a task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataTransferType {
    S3,
    GoogleDrive,
    GoogleCloudStorage,
}

impl Display for DataTransferType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DataTransferType::S3 => write!(f, "s3"),
            DataTransferType::GoogleDrive => write!(f, "google_drive"),
            DataTransferType::GoogleCloudStorage => write!(f, "google_cloud_storage"),
        }
    }
}

impl FromStr for DataTransferType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s3" => Ok(DataTransferType::S3),
            "google_drive" => Ok(DataTransferType::GoogleDrive),
            "google_cloud_storage" => Ok(DataTransferType::GoogleCloudStorage),
            _ => Err(anyhow::anyhow!("Invalid data transfer type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferMethod {
    SyncFile,
    StreamingFromProvider,
    StreamingFromDriveSource,
    UrlSinglePart,
    UrlSinglePartWithCompletion,
    UrlMultiPart,
}

/// Status returned by the transfer layer for an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    UrlGenerated,
    StreamingInProgress,
    Archived,
    InTemporaryArchive,
    Failed,
}

impl TransferStatus {
    /// Terminal success status for a destination tier.
    pub fn archived_in(archive_type: ArchiveType) -> Self {
        match archive_type {
            ArchiveType::Archive => TransferStatus::Archived,
            ArchiveType::TemporaryArchive => TransferStatus::InTemporaryArchive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPartUrl {
    pub part_number: u32,
    pub upload_url: String,
    pub etag: Option<String>,
}

/// Multipart session opened for URL-based uploads. Parts are numbered 1..N.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartUpload {
    pub id: String,
    pub parts: Vec<UploadPartUrl>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPartETag {
    pub part_number: u32,
    pub etag: String,
}

/// Where the bytes of an upload come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum UploadSource {
    /// The caller uploads the bytes itself through pre-signed URL(s).
    UploadUrl {
        parts: u32,
        checksum: Option<String>,
        expiration_hours: Option<u32>,
        completion: bool,
    },
    /// A file on the local filesystem, uploaded synchronously.
    LocalFile { path: PathBuf },
    /// An object on another S3-family provider, streamed through its authenticated client.
    Provider {
        account: ProviderAccount,
        location: FileLocation,
    },
    /// An object on a drive / cloud-storage source, streamed through its HTTP API.
    DriveSource {
        account: ProviderAccount,
        location: FileLocation,
    },
    /// A readable URL (`https://` or `file://`) streamed as-is.
    Url { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub path: String,
    pub caller_object_id: Option<String>,
    pub source: UploadSource,
    pub source_size: Option<u64>,
}

impl UploadRequest {
    pub fn transfer_method(&self) -> TransferMethod {
        match &self.source {
            UploadSource::UploadUrl {
                parts, completion, ..
            } => {
                if *parts > 1 {
                    TransferMethod::UrlMultiPart
                } else if *completion {
                    TransferMethod::UrlSinglePartWithCompletion
                } else {
                    TransferMethod::UrlSinglePart
                }
            }
            UploadSource::LocalFile { .. } => TransferMethod::SyncFile,
            UploadSource::Provider { .. } | UploadSource::Url { .. } => {
                TransferMethod::StreamingFromProvider
            }
            UploadSource::DriveSource { .. } => TransferMethod::StreamingFromDriveSource,
        }
    }

    pub fn data_transfer_type(&self) -> DataTransferType {
        match &self.source {
            UploadSource::DriveSource { account, .. } => match account.provider {
                super::ProviderTag::GoogleCloudStorage => DataTransferType::GoogleCloudStorage,
                _ => DataTransferType::GoogleDrive,
            },
            _ => DataTransferType::S3,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(
            self.transfer_method(),
            TransferMethod::StreamingFromProvider | TransferMethod::StreamingFromDriveSource
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub archive_location: FileLocation,
    pub data_transfer_type: DataTransferType,
    pub method: TransferMethod,
    pub status: TransferStatus,
    pub request_id: Option<String>,
    pub upload_request_url: Option<String>,
    pub multipart_upload: Option<MultipartUpload>,
    pub checksum: Option<String>,
    pub source_size: Option<u64>,
    pub transfer_started: DateTime<Utc>,
    pub transfer_completed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum DownloadDestination {
    File {
        path: PathBuf,
    },
    Provider {
        account: ProviderAccount,
        location: FileLocation,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub archive_location: FileLocation,
    pub destination: DownloadDestination,
    pub size: Option<u64>,
    /// Direct archive URL for POSIX-style archives (`file://...`).
    pub archive_url: Option<String>,
}
