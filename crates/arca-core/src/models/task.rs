use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::location::{ArchiveDestination, FileLocation};
use super::metadata::MetadataEntry;
use super::transfer::{
    DataTransferType, DownloadDestination, TransferStatus, UploadRequest, UploadResponse,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskFamily {
    Download,
    BulkRegistration,
    Migration,
    UploadQueue,
}

impl Display for TaskFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskFamily::Download => write!(f, "download"),
            TaskFamily::BulkRegistration => write!(f, "bulk_registration"),
            TaskFamily::Migration => write!(f, "migration"),
            TaskFamily::UploadQueue => write!(f, "upload_queue"),
        }
    }
}

impl FromStr for TaskFamily {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "download" => Ok(TaskFamily::Download),
            "bulk_registration" => Ok(TaskFamily::BulkRegistration),
            "migration" => Ok(TaskFamily::Migration),
            "upload_queue" => Ok(TaskFamily::UploadQueue),
            _ => Err(anyhow::anyhow!("Invalid task family: {}", s)),
        }
    }
}

/// Status shared by every task family.
///
/// `Completed` is the success status of download, bulk-registration and migration
/// tasks. Uploads end in `Archived` or `InTemporaryArchive`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Received,
    UrlGenerated,
    StreamingInProgress,
    InProgress,
    Archived,
    InTemporaryArchive,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Archived
                | TaskStatus::InTemporaryArchive
                | TaskStatus::Completed
                | TaskStatus::Failed
        )
    }

    /// Terminal statuses the cleanup sweep may delete. `InTemporaryArchive` stays
    /// for the downstream move to permanent archive.
    pub fn is_sweepable(&self) -> bool {
        matches!(
            self,
            TaskStatus::Archived | TaskStatus::Completed | TaskStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Received => "received",
            TaskStatus::UrlGenerated => "url_generated",
            TaskStatus::StreamingInProgress => "streaming_in_progress",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Archived => "archived",
            TaskStatus::InTemporaryArchive => "in_temporary_archive",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(TaskStatus::Received),
            "url_generated" => Ok(TaskStatus::UrlGenerated),
            "streaming_in_progress" => Ok(TaskStatus::StreamingInProgress),
            "in_progress" => Ok(TaskStatus::InProgress),
            "archived" => Ok(TaskStatus::Archived),
            "in_temporary_archive" => Ok(TaskStatus::InTemporaryArchive),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid task status: {}", s)),
        }
    }
}

impl From<TransferStatus> for TaskStatus {
    fn from(status: TransferStatus) -> Self {
        match status {
            TransferStatus::UrlGenerated => TaskStatus::UrlGenerated,
            TransferStatus::StreamingInProgress => TaskStatus::StreamingInProgress,
            TransferStatus::Archived => TaskStatus::Archived,
            TransferStatus::InTemporaryArchive => TaskStatus::InTemporaryArchive,
            TransferStatus::Failed => TaskStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskOwner {
    pub user_id: String,
    /// Organisational unit ("doc") the user belongs to.
    pub doc: String,
}

impl TaskOwner {
    pub fn new(user_id: impl Into<String>, doc: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            doc: doc.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTask {
    pub archive_configuration_id: String,
    pub archive_location: FileLocation,
    pub destination: DownloadDestination,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkRegistrationItem {
    pub request: UploadRequest,
    pub metadata: Vec<MetadataEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    pub path: String,
    pub status: ItemStatus,
    pub checksum: Option<String>,
    pub error_message: Option<String>,
}

impl ItemResult {
    pub fn pending(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            status: ItemStatus::Pending,
            checksum: None,
            error_message: None,
        }
    }

    pub fn success(path: impl Into<String>, checksum: Option<String>) -> Self {
        Self {
            path: path.into(),
            status: ItemStatus::Success,
            checksum,
            error_message: None,
        }
    }

    pub fn failed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            status: ItemStatus::Failed,
            checksum: None,
            error_message: Some(reason.into()),
        }
    }
}

/// Aggregated per-item outcome of a batch. Partial success is a normal outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkRegistrationResult {
    pub items: Vec<ItemResult>,
}

impl BulkRegistrationResult {
    pub fn success_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.status == ItemStatus::Success)
            .count()
    }

    pub fn failure_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.status == ItemStatus::Failed)
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.items.iter().all(|i| i.status != ItemStatus::Pending)
    }

    pub fn all_succeeded(&self) -> bool {
        self.items.iter().all(|i| i.status == ItemStatus::Success)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkRegistrationTask {
    pub archive_configuration_id: String,
    pub items: Vec<BulkRegistrationItem>,
    pub result: BulkRegistrationResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationType {
    DataObject,
    Collection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationTask {
    pub source_configuration_id: String,
    pub source_location: FileLocation,
    pub target_configuration_id: String,
    /// Catalog path of the object or collection in the target archive.
    pub target_path: String,
    pub migration_type: MigrationType,
    pub items: Vec<ItemResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadQueueEntry {
    pub archive_configuration_id: String,
    pub request: UploadRequest,
    pub metadata: Vec<MetadataEntry>,
    pub storage_class: Option<String>,
    pub destination: Option<ArchiveDestination>,
    pub response: Option<UploadResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "family")]
pub enum TaskKind {
    Download(DownloadTask),
    BulkRegistration(BulkRegistrationTask),
    Migration(MigrationTask),
    UploadQueue(UploadQueueEntry),
}

impl TaskKind {
    pub fn family(&self) -> TaskFamily {
        match self {
            TaskKind::Download(_) => TaskFamily::Download,
            TaskKind::BulkRegistration(_) => TaskFamily::BulkRegistration,
            TaskKind::Migration(_) => TaskFamily::Migration,
            TaskKind::UploadQueue(_) => TaskFamily::UploadQueue,
        }
    }
}

/// Durable record of one in-flight transfer, registration or migration.
///
/// `id` is `None` until the task store assigns one on first insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTask {
    pub id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub data_transfer_type: DataTransferType,
    pub request_id: Option<String>,
    pub owner: TaskOwner,
    pub in_process: bool,
    pub failure_reason: Option<String>,
    pub bytes_transferred: u64,
    pub kind: TaskKind,
}

impl TransferTask {
    pub fn new(owner: TaskOwner, data_transfer_type: DataTransferType, kind: TaskKind) -> Self {
        // Postgres keeps microseconds; truncate so stored and in-memory copies compare equal.
        let now = Utc::now().trunc_subsecs(6);
        Self {
            id: None,
            created_at: now,
            updated_at: now,
            status: TaskStatus::Received,
            data_transfer_type,
            request_id: None,
            owner,
            in_process: false,
            failure_reason: None,
            bytes_transferred: 0,
            kind,
        }
    }

    pub fn family(&self) -> TaskFamily {
        self.kind.family()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now().trunc_subsecs(6);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "family")]
pub enum TaskResultDetail {
    Download {
        archive_location: FileLocation,
        destination: DownloadDestination,
        size_bytes: Option<u64>,
    },
    BulkRegistration(BulkRegistrationResult),
    Migration {
        source_location: FileLocation,
        target_configuration_id: String,
        items: Vec<ItemResult>,
    },
}

/// Historical record of a finished task. Outlives the working task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: Uuid,
    pub family: TaskFamily,
    pub owner: TaskOwner,
    pub data_transfer_type: DataTransferType,
    pub result: bool,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub detail: TaskResultDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerScope {
    User(String),
    OrgUnit(String),
}

impl OwnerScope {
    pub fn matches(&self, owner: &TaskOwner) -> bool {
        match self {
            OwnerScope::User(user_id) => owner.user_id == *user_id,
            OwnerScope::OrgUnit(doc) => owner.doc == *doc,
        }
    }
}

/// Listing filter. `None` fields do not filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskQuery {
    pub family: Option<TaskFamily>,
    pub status: Option<TaskStatus>,
    pub data_transfer_type: Option<DataTransferType>,
    pub scope: Option<OwnerScope>,
    pub offset: i64,
    pub limit: i64,
}

impl Default for TaskQuery {
    fn default() -> Self {
        Self {
            family: None,
            status: None,
            data_transfer_type: None,
            scope: None,
            offset: 0,
            limit: i64::MAX,
        }
    }
}

impl TaskQuery {
    pub fn matches(&self, task: &TransferTask) -> bool {
        self.family.map_or(true, |f| f == task.family())
            && self.status.map_or(true, |s| s == task.status)
            && self
                .data_transfer_type
                .map_or(true, |t| t == task.data_transfer_type)
            && self.scope.as_ref().map_or(true, |s| s.matches(&task.owner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_its_own_display() {
        for status in [
            TaskStatus::Received,
            TaskStatus::StreamingInProgress,
            TaskStatus::InTemporaryArchive,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<TaskStatus>().unwrap(), status);
        }
    }

    #[test]
    fn streaming_is_neither_terminal_nor_sweepable() {
        assert!(!TaskStatus::StreamingInProgress.is_terminal());
        assert!(!TaskStatus::StreamingInProgress.is_sweepable());
        assert!(TaskStatus::InTemporaryArchive.is_terminal());
        assert!(!TaskStatus::InTemporaryArchive.is_sweepable());
        assert!(TaskStatus::Failed.is_sweepable());
    }

    #[test]
    fn bulk_result_counts() {
        let result = BulkRegistrationResult {
            items: vec![
                ItemResult::success("/a", Some("etag-a".to_string())),
                ItemResult::failed("/b", "write denied"),
                ItemResult::pending("/c"),
            ],
        };
        assert_eq!(result.success_count(), 1);
        assert_eq!(result.failure_count(), 1);
        assert!(!result.is_complete());
        assert!(!result.all_succeeded());
    }

    #[test]
    fn owner_scope_matching() {
        let owner = TaskOwner::new("jdoe", "NCI");
        assert!(OwnerScope::User("jdoe".to_string()).matches(&owner));
        assert!(OwnerScope::OrgUnit("NCI".to_string()).matches(&owner));
        assert!(!OwnerScope::OrgUnit("NIH".to_string()).matches(&owner));
    }
}
