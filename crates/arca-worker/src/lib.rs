//! Arca Worker Library
//!
//! The task engine and its cleanup sweep. [`TaskEngine`] persists every
//! submitted transfer as a task, drives it through the transfer proxy and
//! moves it to a terminal status when the transfer reports back.

pub mod catalog;
pub mod completion;
pub mod engine;
pub mod sweep;
pub mod telemetry;

pub use catalog::{
    ArchiveCatalog, ArchiveConfiguration, DefaultDestinationResolver, DestinationResolver,
    StaticArchiveCatalog,
};
pub use completion::{task_result, TaskCompletionListener};
pub use engine::{
    MigrationSubmission, ResultPage, TaskEngine, TaskPage, TaskView, UploadSubmission,
    INTERRUPTED_REASON, URL_EXPIRED_REASON,
};
pub use sweep::{SweepConfig, SweepReport, SweepService};
