use serde::{Deserialize, Serialize};

/// One URL of a batch shorten request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    /// Opaque token chosen by the caller, echoed back in the matching [`BatchEntry`].
    pub correlation_id: String,
    /// The URL to shorten.
    pub original_url: String,
}

impl BatchItem {
    pub fn new(correlation_id: impl Into<String>, original_url: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            original_url: original_url.into(),
        }
    }
}

/// A short URL computed for one item of a batch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    /// The correlation token of the originating [`BatchItem`].
    pub correlation_id: String,
    /// The full short URL (`<base>/<code>`).
    pub short_url: String,
}

/// A live URL owned by a user, as shown in the owner's listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedUrl {
    pub short_url: String,
    pub original_url: String,
}

/// The outcome of resolving a short code for a redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The code is live; redirect to the original URL.
    Redirect(String),
    /// The code existed but has been soft-deleted.
    Gone,
    /// The code was never stored.
    NotFound,
}
