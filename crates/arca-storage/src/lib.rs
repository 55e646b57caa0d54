//! Arca Storage Library
//!
//! Provider connections and the transfer proxy. A [`ConnectionRegistry`] turns a
//! [`ProviderAccount`](arca_core::models::ProviderAccount) into an authenticated
//! [`ConnectionHandle`] and hands out the [`TransferProxy`] for its family.
//! Streaming transfers run on the registry's bounded [`TransferPool`] and report
//! through a [`ProgressListener`] exactly once.

pub mod connection;
pub mod drive;
pub mod lifecycle;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod pool;
pub mod progress;
pub mod proxy;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod source;
pub mod streaming;
pub mod traits;

// Re-export commonly used types
#[cfg(feature = "storage-s3")]
pub use connection::S3ClientFactory;
pub use connection::{
    ClientFactory, ClientSettings, ConnectedClient, ConnectionHandle, ConnectionRegistry,
};
pub use lifecycle::{TieringEndpoint, TieringRule};
pub use pool::TransferPool;
pub use progress::{
    completion_channel, CompletionReceiver, ProgressListener, TransferCompletion,
    TransferOutcome,
};
pub use proxy::{DriveTransferProxy, S3TransferProxy, TransferProxy};
#[cfg(feature = "storage-s3")]
pub use s3::S3ObjectClient;
pub use traits::{ObjectSource, ObjectStoreClient, Presigner, StorageError, StorageResult};
