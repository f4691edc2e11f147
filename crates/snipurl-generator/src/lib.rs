//! Short code generation.
//!
//! Codes are derived from the URL content, so the same URL always maps to
//! the same code no matter who submits it or how often.

pub mod content;

pub use content::{generate_id, ContentHashGenerator};

use snipurl_core::ShortCode;

/// Trait for generating short codes.
///
/// Implementations are pure generators that don't interact with storage.
/// Collisions between different URLs are possible and are surfaced by the
/// storage backend as a conflict, never resolved here.
pub trait Generator: Send + Sync + 'static {
    /// Derives the short code for `original_url`.
    ///
    /// The same input must always produce the same code.
    fn generate(&self, original_url: &str) -> ShortCode;
}
