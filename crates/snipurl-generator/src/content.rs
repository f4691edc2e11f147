use crate::Generator;
use snipurl_core::ShortCode;
use typed_builder::TypedBuilder;

/// Number of hex characters kept from the digest.
pub const DEFAULT_CODE_LENGTH: usize = 8;

/// MD5 hex digest is 32 characters long.
const MAX_CODE_LENGTH: usize = 32;

/// Derives the default short code for a URL: the first 8 hex characters of
/// the MD5 digest of its UTF-8 bytes.
pub fn generate_id(original_url: &str) -> ShortCode {
    hash_prefix(original_url, DEFAULT_CODE_LENGTH)
}

fn hash_prefix(original_url: &str, length: usize) -> ShortCode {
    let digest = format!("{:x}", md5::compute(original_url.as_bytes()));
    ShortCode::new_unchecked(&digest[..length])
}

/// A generator that truncates the MD5 digest of the URL.
#[derive(Debug, Clone, TypedBuilder)]
pub struct ContentHashGenerator {
    /// Hex characters kept from the digest, clamped to `3..=32`.
    #[builder(default = DEFAULT_CODE_LENGTH)]
    length: usize,
}

impl ContentHashGenerator {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn length(&self) -> usize {
        self.length.clamp(3, MAX_CODE_LENGTH)
    }
}

impl Default for ContentHashGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Generator for ContentHashGenerator {
    fn generate(&self, original_url: &str) -> ShortCode {
        hash_prefix(original_url, self.length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_id_is_deterministic() {
        let first = generate_id("https://example.com/a");
        let second = generate_id("https://example.com/a");
        assert_eq!(first, second);
    }

    #[test]
    fn generate_id_is_eight_lowercase_hex_chars() {
        let code = generate_id("https://example.com/a");
        assert_eq!(code.as_str().len(), 8);
        assert!(code
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn generate_id_matches_md5_prefix() {
        // md5("hello") = 5d41402abc4b2a76b9719d911017c592
        assert_eq!(generate_id("hello").as_str(), "5d41402a");
    }

    #[test]
    fn different_urls_get_different_codes() {
        assert_ne!(
            generate_id("https://example.com/a"),
            generate_id("https://example.com/b")
        );
    }

    #[test]
    fn generator_defaults_to_generate_id() {
        let generator = ContentHashGenerator::new();
        assert_eq!(
            generator.generate("https://example.com/a"),
            generate_id("https://example.com/a")
        );
    }

    #[test]
    fn generator_length_is_configurable_and_clamped() {
        let long = ContentHashGenerator::builder().length(12).build();
        assert_eq!(long.generate("hello").as_str(), "5d41402abc4b");

        let too_long = ContentHashGenerator::builder().length(64).build();
        assert_eq!(too_long.generate("hello").as_str().len(), 32);

        let too_short = ContentHashGenerator::builder().length(1).build();
        assert_eq!(too_short.generate("hello").as_str(), "5d4");
    }

    #[test]
    fn generator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ContentHashGenerator>();
    }
}
