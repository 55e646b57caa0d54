//! Arca Core Library
//!
//! This crate provides the domain models, error taxonomy and configuration
//! shared by the archive transfer engine crates.

pub mod config;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use config::{ArcaConfig, ArchiveSettings, TransferConfig};
pub use error::{ArcaError, ArcaResult, ErrorMetadata, LogLevel};
