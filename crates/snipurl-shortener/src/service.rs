use snipurl_core::{
    BatchEntry, BatchItem, OwnedUrl, Repository, Resolution, ShortCode, ShortenerError,
    StorageError, UrlRecord,
};
use snipurl_generator::Generator;
use std::sync::Arc;
use tracing::{debug, warn};

type Result<T> = std::result::Result<T, ShortenerError>;

/// Shortens URLs on top of a storage backend.
///
/// Codes come from the `Generator` and are derived from the URL content, so
/// re-submitting a URL always yields the same short URL. When the backend
/// reports a conflict the service still hands out the computed short URL,
/// wrapped in [`ShortenerError::Conflict`] so callers can answer
/// "already shortened" instead of failing.
pub struct ShortenerService<R: ?Sized, G> {
    repository: Arc<R>,
    generator: G,
    base_url: String,
}

impl<R: ?Sized, G: Clone> Clone for ShortenerService<R, G> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            generator: self.generator.clone(),
            base_url: self.base_url.clone(),
        }
    }
}

impl<R: Repository + ?Sized, G: Generator> ShortenerService<R, G> {
    /// Creates a service that builds short URLs under `base_url`.
    ///
    /// Trailing slashes of `base_url` are dropped.
    pub fn new(repository: Arc<R>, generator: G, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            repository,
            generator,
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The backend shared with this service.
    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// Shortens `original_url` on behalf of `owner_id`.
    pub async fn shorten(&self, original_url: &str, owner_id: &str) -> Result<String> {
        validate_url(original_url)?;

        let code = self.generator.generate(original_url);
        let short_url = code.to_url(&self.base_url);
        let record = UrlRecord::new(code, original_url, owner_id);

        match self.repository.save(record).await {
            Ok(()) => {
                debug!(short_url = %short_url, owner_id, "shortened url");
                Ok(short_url)
            }
            Err(StorageError::Conflict(code)) => {
                warn!(code = %code, owner_id, "url already shortened");
                Err(ShortenerError::Conflict { short_url })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Shortens every item of a batch on behalf of `owner_id`.
    ///
    /// The returned entries follow the input order. Conflicting items do not
    /// stop the rest of the batch; they are reported through
    /// [`ShortenerError::BatchConflict`], which still carries every entry.
    pub async fn shorten_batch(
        &self,
        items: Vec<BatchItem>,
        owner_id: &str,
    ) -> Result<Vec<BatchEntry>> {
        if items.is_empty() {
            return Err(ShortenerError::EmptyBatch);
        }
        if let Some(item) = items.iter().find(|item| item.original_url.trim().is_empty()) {
            return Err(ShortenerError::InvalidUrl(format!(
                "batch item '{}' has an empty url",
                item.correlation_id
            )));
        }

        let mut entries = Vec::with_capacity(items.len());
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            let code = self.generator.generate(&item.original_url);
            entries.push(BatchEntry {
                correlation_id: item.correlation_id,
                short_url: code.to_url(&self.base_url),
            });
            records.push(UrlRecord::new(code, item.original_url, owner_id));
        }

        let outcome = self.repository.save_batch(records).await?;
        debug!(
            owner_id,
            requested = entries.len(),
            inserted = outcome.inserted,
            conflicts = outcome.conflicts.len(),
            "shortened batch"
        );

        if outcome.is_clean() {
            Ok(entries)
        } else {
            Err(ShortenerError::BatchConflict {
                entries,
                conflicts: outcome.conflicts,
            })
        }
    }

    /// Looks up where `code` should redirect to.
    pub async fn resolve(&self, code: &ShortCode) -> Result<Resolution> {
        let resolution = match self.repository.get(code).await? {
            Some(record) if record.deleted => Resolution::Gone,
            Some(record) => Resolution::Redirect(record.original_url),
            None => Resolution::NotFound,
        };
        Ok(resolution)
    }

    /// Lists the live short URLs owned by `owner_id`.
    pub async fn owner_urls(&self, owner_id: &str) -> Result<Vec<OwnedUrl>> {
        let records = self.repository.owner_records(owner_id).await?;
        Ok(records
            .into_iter()
            .map(|record| OwnedUrl {
                short_url: record.code.to_url(&self.base_url),
                original_url: record.original_url,
            })
            .collect())
    }

    /// Checks that the backend is reachable.
    pub async fn ping(&self) -> Result<()> {
        Ok(self.repository.ping().await?)
    }
}

/// URLs are opaque; only emptiness is rejected.
fn validate_url(url: &str) -> Result<()> {
    if url.trim().is_empty() {
        return Err(ShortenerError::InvalidUrl("URL cannot be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use snipurl_core::ReadRepository;
    use snipurl_generator::{generate_id, ContentHashGenerator};
    use snipurl_storage::InMemoryRepository;

    const BASE_URL: &str = "http://localhost:8080/";

    /// Maps every URL to the same code, to force collisions.
    #[derive(Clone)]
    struct FixedGenerator(&'static str);

    impl Generator for FixedGenerator {
        fn generate(&self, _original_url: &str) -> ShortCode {
            ShortCode::new_unchecked(self.0)
        }
    }

    fn test_service() -> ShortenerService<InMemoryRepository, ContentHashGenerator> {
        ShortenerService::new(
            Arc::new(InMemoryRepository::new()),
            ContentHashGenerator::new(),
            BASE_URL,
        )
    }

    #[test]
    fn base_url_is_trimmed() {
        let service = test_service();
        assert_eq!(service.base_url(), "http://localhost:8080");
    }

    #[tokio::test]
    async fn shorten_stores_record_for_owner() {
        let service = test_service();
        let id = generate_id("https://example.com/a");

        let short_url = service
            .shorten("https://example.com/a", "u1")
            .await
            .unwrap();
        assert_eq!(short_url, format!("http://localhost:8080/{id}"));

        let record = service.repository().get(&id).await.unwrap().unwrap();
        assert_eq!(record.original_url, "https://example.com/a");
        assert_eq!(record.owner_id, "u1");
        assert!(!record.deleted);
    }

    #[tokio::test]
    async fn shorten_is_idempotent_for_same_owner() {
        let service = test_service();

        let first = service.shorten("https://example.com", "u1").await.unwrap();
        let second = service.shorten("https://example.com", "u1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(service.owner_urls("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn shorten_by_second_owner_returns_existing_url_with_conflict() {
        let service = test_service();

        let first = service.shorten("https://example.com", "u1").await.unwrap();
        let err = service
            .shorten("https://example.com", "u2")
            .await
            .unwrap_err();

        assert!(matches!(err, ShortenerError::Conflict { ref short_url } if *short_url == first));
        assert!(service.owner_urls("u2").await.unwrap().is_empty());
        assert_eq!(service.owner_urls("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn colliding_code_keeps_first_url() {
        let service = ShortenerService::new(
            Arc::new(InMemoryRepository::new()),
            FixedGenerator("deadbeef"),
            BASE_URL,
        );

        service.shorten("https://one.example", "u1").await.unwrap();
        let err = service
            .shorten("https://two.example", "u1")
            .await
            .unwrap_err();
        assert!(matches!(err, ShortenerError::Conflict { .. }));

        let resolution = service
            .resolve(&ShortCode::new_unchecked("deadbeef"))
            .await
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::Redirect("https://one.example".to_string())
        );
    }

    #[tokio::test]
    async fn shorten_rejects_empty_url() {
        let service = test_service();

        let err = service.shorten("", "u1").await.unwrap_err();
        assert!(matches!(err, ShortenerError::InvalidUrl(_)));
        let err = service.shorten("   ", "u1").await.unwrap_err();
        assert!(matches!(err, ShortenerError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn shorten_batch_preserves_input_order() {
        let service = test_service();

        let entries = service
            .shorten_batch(
                vec![
                    BatchItem::new("a", "https://x"),
                    BatchItem::new("b", "https://y"),
                ],
                "u1",
            )
            .await
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].correlation_id, "a");
        assert_eq!(entries[1].correlation_id, "b");
        assert_ne!(entries[0].short_url, entries[1].short_url);

        for (entry, url) in entries.iter().zip(["https://x", "https://y"]) {
            let id = generate_id(url);
            assert_eq!(entry.short_url, id.to_url(BASE_URL));
            let record = service.repository().get(&id).await.unwrap().unwrap();
            assert_eq!(record.original_url, url);
            assert_eq!(record.owner_id, "u1");
        }
    }

    #[tokio::test]
    async fn shorten_batch_rejects_empty_input() {
        let service = test_service();

        let err = service.shorten_batch(vec![], "u1").await.unwrap_err();
        assert!(matches!(err, ShortenerError::EmptyBatch));

        let err = service
            .shorten_batch(
                vec![BatchItem::new("a", "https://x"), BatchItem::new("b", "")],
                "u1",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ShortenerError::InvalidUrl(ref m) if m.contains("'b'")));
        assert!(service.owner_urls("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn shorten_batch_reports_conflicts_with_every_entry() {
        let service = test_service();
        service.shorten("https://taken", "u2").await.unwrap();

        let err = service
            .shorten_batch(
                vec![
                    BatchItem::new("a", "https://fresh"),
                    BatchItem::new("b", "https://taken"),
                ],
                "u1",
            )
            .await
            .unwrap_err();

        match err {
            ShortenerError::BatchConflict { entries, conflicts } => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[1].short_url, generate_id("https://taken").to_url(BASE_URL));
                assert_eq!(conflicts, vec![generate_id("https://taken")]);
            }
            other => panic!("expected batch conflict, got {other:?}"),
        }

        let owned = service.owner_urls("u1").await.unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].original_url, "https://fresh");
    }

    #[tokio::test]
    async fn resolve_distinguishes_gone_and_not_found() {
        let service = test_service();
        service.shorten("https://example.com", "u1").await.unwrap();
        let id = generate_id("https://example.com");

        assert_eq!(
            service.resolve(&id).await.unwrap(),
            Resolution::Redirect("https://example.com".to_string())
        );

        service
            .repository()
            .delete_owner_records("u1", &[id.clone()])
            .await
            .unwrap();
        assert_eq!(service.resolve(&id).await.unwrap(), Resolution::Gone);

        assert_eq!(
            service
                .resolve(&ShortCode::new_unchecked("00000000"))
                .await
                .unwrap(),
            Resolution::NotFound
        );
    }

    #[tokio::test]
    async fn owner_urls_lists_live_records_only() {
        let service = test_service();
        service.shorten("https://a.example", "u1").await.unwrap();
        service.shorten("https://b.example", "u1").await.unwrap();
        service
            .repository()
            .delete_owner_records("u1", &[generate_id("https://a.example")])
            .await
            .unwrap();

        let owned = service.owner_urls("u1").await.unwrap();
        assert_eq!(
            owned,
            vec![OwnedUrl {
                short_url: generate_id("https://b.example").to_url(BASE_URL),
                original_url: "https://b.example".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn works_over_a_trait_object() {
        let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
        let service = ShortenerService::new(repository, ContentHashGenerator::new(), BASE_URL);

        service.ping().await.unwrap();
        service.shorten("https://example.com", "u1").await.unwrap();
        assert_eq!(service.owner_urls("u1").await.unwrap().len(), 1);
    }
}
