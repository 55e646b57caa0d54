use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user metadata attribute attached to an archived object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub attribute: String,
    pub value: String,
}

impl MetadataEntry {
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TierStatus {
    Standard,
    Glacier,
    DeepArchive,
}

impl TierStatus {
    /// Maps a provider storage class. Unknown or absent classes are standard.
    pub fn from_storage_class(storage_class: Option<&str>) -> Self {
        match storage_class.map(|s| s.to_ascii_uppercase()) {
            Some(s) if s == "GLACIER" || s == "GLACIER_IR" => TierStatus::Glacier,
            Some(s) if s == "DEEP_ARCHIVE" => TierStatus::DeepArchive,
            _ => TierStatus::Standard,
        }
    }

    pub fn is_cold(&self) -> bool {
        !matches!(self, TierStatus::Standard)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RestorationStatus {
    NotInProgress,
    InProgress,
    Success,
}

impl RestorationStatus {
    /// Parses the object's restore marker, e.g. `ongoing-request="false", expiry-date="..."`.
    pub fn from_restore_header(restore: Option<&str>) -> Self {
        match restore {
            Some(value) if value.contains("ongoing-request=\"true\"") => {
                RestorationStatus::InProgress
            }
            Some(value) if value.contains("ongoing-request=\"false\"") => {
                RestorationStatus::Success
            }
            _ => RestorationStatus::NotInProgress,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveObjectMetadata {
    pub checksum: String,
    pub tier_status: TierStatus,
    pub restoration_status: RestorationStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathAttributes {
    pub exists: bool,
    pub is_file: bool,
    pub is_directory: bool,
    pub is_accessible: bool,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryScanItem {
    pub path: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetMetadataResponse {
    pub metadata_added: bool,
    pub checksum: String,
}
