use arca_core::models::{
    ArchiveObjectMetadata, DownloadRequest, FileLocation, PathAttributes, ProviderTag,
    RestorationStatus, TierStatus,
};
use arca_core::{ArcaError, ArcaResult};
use async_trait::async_trait;
use std::sync::Arc;

use super::{download_from, file_attributes, transfer_error, TransferProxy};
use crate::connection::{ConnectionHandle, ConnectionRegistry};
use crate::progress::ProgressListener;
use crate::source::StreamOrigin;
use crate::traits::{normalize_etag, HeadOutcome};

/// Read-only proxy for drive and cloud-storage sources.
///
/// Only reads are meaningful here: metadata, reachability and downloads. Every
/// bucket operation falls back to the trait's unsupported default.
pub struct DriveTransferProxy {
    registry: Arc<ConnectionRegistry>,
    handle: ConnectionHandle,
}

impl DriveTransferProxy {
    pub fn new(registry: Arc<ConnectionRegistry>, handle: ConnectionHandle) -> Self {
        Self { registry, handle }
    }

    async fn head(&self, location: &FileLocation, operation: &str) -> ArcaResult<HeadOutcome> {
        self.handle
            .source()
            .head_object(&location.container_id, &location.object_id)
            .await
            .map_err(|e| transfer_error(self.handle.provider(), operation, e))
    }
}

#[async_trait]
impl TransferProxy for DriveTransferProxy {
    fn provider(&self) -> ProviderTag {
        self.handle.provider()
    }

    #[tracing::instrument(
        skip(self, request, listener),
        fields(provider = %self.handle.provider(), location = %request.archive_location)
    )]
    async fn download_data_object(
        &self,
        request: &DownloadRequest,
        listener: Option<Arc<dyn ProgressListener>>,
    ) -> ArcaResult<String> {
        let origin = StreamOrigin::Object {
            source: self.handle.source(),
            location: request.archive_location.clone(),
        };
        download_from(
            &self.registry,
            self.handle.provider(),
            origin,
            request,
            listener,
        )
        .await
    }

    async fn get_path_attributes(
        &self,
        location: &FileLocation,
        compute_size: bool,
    ) -> ArcaResult<PathAttributes> {
        let outcome = self.head(location, "get path attributes").await?;
        Ok(file_attributes(&outcome, compute_size).unwrap_or(PathAttributes {
            exists: false,
            is_accessible: true,
            ..PathAttributes::default()
        }))
    }

    async fn get_data_object_metadata(
        &self,
        location: &FileLocation,
    ) -> ArcaResult<ArchiveObjectMetadata> {
        match self.head(location, "get metadata").await? {
            HeadOutcome::Found(head) => Ok(ArchiveObjectMetadata {
                checksum: head.etag.as_deref().map(normalize_etag).unwrap_or_default(),
                tier_status: TierStatus::from_storage_class(head.storage_class.as_deref()),
                restoration_status: RestorationStatus::NotInProgress,
            }),
            HeadOutcome::NotFound => Err(ArcaError::data_transfer(
                self.handle.provider(),
                "get metadata",
                format!("object {} not found", location),
            )),
            HeadOutcome::AccessDenied => Err(ArcaError::data_transfer(
                self.handle.provider(),
                "get metadata",
                format!("access denied to {}", location),
            )),
        }
    }

    async fn check_source_reachable(&self, location: &FileLocation) -> ArcaResult<bool> {
        let outcome = self.head(location, "check source").await?;
        Ok(matches!(outcome, HeadOutcome::Found(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryClientFactory;
    use arca_core::models::{
        ArchiveDestination, ArchiveType, Credentials, DownloadDestination, Endpoint,
        ProviderAccount,
    };
    use arca_core::TransferConfig;

    fn drive_account() -> ProviderAccount {
        ProviderAccount {
            provider: ProviderTag::GoogleDrive,
            credentials: Credentials::Token {
                access_token: "ya29.token".to_string(),
            },
            endpoint: Endpoint::Default,
        }
    }

    #[tokio::test]
    async fn drive_sources_read_but_never_write() {
        let factory = Arc::new(MemoryClientFactory::new());
        let account = drive_account();
        factory
            .store_for(&account)
            .insert_object("", "1AbCdEf", "drive file");
        let registry =
            Arc::new(ConnectionRegistry::new(TransferConfig::default(), factory).unwrap());
        let proxy = registry.proxy_for(&account).await.unwrap();
        let location = FileLocation::new("", "1AbCdEf");

        assert!(proxy.check_source_reachable(&location).await.unwrap());
        let attributes = proxy.get_path_attributes(&location, true).await.unwrap();
        assert!(attributes.is_file);
        assert_eq!(attributes.size, Some(10));
        assert!(!proxy
            .check_source_reachable(&FileLocation::new("", "missing"))
            .await
            .unwrap());

        let err = proxy
            .delete_data_object(&location)
            .await
            .unwrap_err();
        assert!(matches!(err, ArcaError::InvalidRequest(_)));

        let request = arca_core::models::UploadRequest {
            path: "/p/file".to_string(),
            caller_object_id: None,
            source: arca_core::models::UploadSource::UploadUrl {
                parts: 1,
                checksum: None,
                expiration_hours: None,
                completion: false,
            },
            source_size: None,
        };
        let destination = ArchiveDestination {
            location: FileLocation::new("archive", "p/file"),
            archive_type: ArchiveType::Archive,
        };
        assert!(proxy
            .upload_data_object(&request, &destination, &[], None, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn drive_download_to_file_is_streamed() {
        let factory = Arc::new(MemoryClientFactory::new());
        let account = drive_account();
        factory
            .store_for(&account)
            .insert_object("", "1AbCdEf", "drive file");
        let registry =
            Arc::new(ConnectionRegistry::new(TransferConfig::default(), factory).unwrap());
        let proxy = registry.proxy_for(&account).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.bin");
        let request = DownloadRequest {
            archive_location: FileLocation::new("", "1AbCdEf"),
            destination: DownloadDestination::File { path: path.clone() },
            size: None,
            archive_url: None,
        };
        let (listener, receiver) = crate::progress::completion_channel();
        proxy
            .download_data_object(&request, Some(listener))
            .await
            .unwrap();
        assert!(matches!(
            receiver.outcome().await,
            crate::progress::TransferOutcome::Completed(_)
        ));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"drive file");
    }
}
