pub mod location;
pub mod metadata;
pub mod provider;
pub mod task;
pub mod transfer;

pub use location::{ArchiveDestination, ArchiveType, FileLocation};
pub use metadata::{
    ArchiveObjectMetadata, DirectoryScanItem, MetadataEntry, PathAttributes, RestorationStatus,
    SetMetadataResponse, TierStatus,
};
pub use provider::{Credentials, Endpoint, ProviderAccount, ProviderFamily, ProviderTag};
pub use task::{
    BulkRegistrationItem, BulkRegistrationResult, BulkRegistrationTask, DownloadTask, ItemResult,
    ItemStatus, MigrationTask, MigrationType, OwnerScope, TaskFamily, TaskKind, TaskOwner,
    TaskQuery, TaskResult, TaskResultDetail, TaskStatus, TransferTask, UploadQueueEntry,
};
pub use transfer::{
    DataTransferType, DownloadDestination, DownloadRequest, MultipartUpload, TransferMethod,
    TransferStatus, UploadPartETag, UploadPartUrl, UploadRequest, UploadResponse, UploadSource,
};
