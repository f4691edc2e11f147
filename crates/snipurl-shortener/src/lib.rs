//! URL shortener service implementation.
//!
//! This crate ties the code generator and a storage backend together into
//! the shortening service, and runs bulk soft-deletes through a bounded
//! producer/consumer pipeline. Core types are re-exported from `snipurl_core`.

pub mod deletion;
pub mod service;

pub use deletion::{DeletionPipeline, DeletionReport, DeletionSettings};
pub use service::ShortenerService;
pub use snipurl_core::{BatchEntry, BatchItem, OwnedUrl, Resolution, ShortenerError};
