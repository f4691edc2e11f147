//! Core types and traits for the snipurl URL shortener.
//!
//! This crate provides the types shared by the storage backends and the
//! shortener service: the short code, the stored record, the storage
//! contract and the error kinds that cross those boundaries.

pub mod error;
pub mod repository;
pub mod shortcode;
pub mod shortener;

pub use error::{ShortenerError, StorageError};
pub use repository::{BatchOutcome, ReadRepository, Repository, UrlRecord};
pub use shortcode::ShortCode;
pub use shortener::{BatchEntry, BatchItem, OwnedUrl, Resolution};
