use crate::index::{new_record, UrlIndex};
use async_trait::async_trait;
use burrow_core::error::Result;
use burrow_core::{Insertion, Lookup, Repository, ShortCode, UrlRecord};
use burrow_generator::{Generator, RandomGenerator};
use parking_lot::RwLock;
use tracing::{debug, trace};

/// Volatile implementation of the Repository trait.
///
/// One reader/writer lock guards the whole index: lookups and listings share
/// it, creates and deletes take it exclusively. That makes the
/// check-then-insert in [`Repository::create`] atomic, so concurrent callers
/// shortening the same URL always converge on one code.
///
/// Nothing is persisted; all state is lost when the process exits.
#[derive(Debug)]
pub struct InMemoryRepository<G = RandomGenerator> {
    index: RwLock<UrlIndex>,
    generator: G,
}

impl InMemoryRepository<RandomGenerator> {
    /// Creates a new in-memory repository with a randomly seeded generator.
    pub fn new() -> Self {
        Self::with_generator(RandomGenerator::new())
    }
}

impl<G: Generator> InMemoryRepository<G> {
    /// Creates a new in-memory repository drawing codes from `generator`.
    pub fn with_generator(generator: G) -> Self {
        Self {
            index: RwLock::new(UrlIndex::default()),
            generator,
        }
    }

    /// Number of records held, deleted ones included.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryRepository<RandomGenerator> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<G: Generator> Repository for InMemoryRepository<G> {
    async fn create(&self, owner_id: &str, original_url: &str) -> Result<Insertion> {
        let mut index = self.index.write();

        if let Some(existing) = index.code_for_url(original_url) {
            debug!(code = %existing, "url already shortened");
            return Ok(Insertion::Existing(existing.clone()));
        }

        let code = index.allocate(&self.generator)?;
        index.upsert(new_record(code.clone(), owner_id, original_url));
        debug!(code = %code, owner = owner_id, "short code created");
        Ok(Insertion::Created(code))
    }

    async fn get(&self, code: &ShortCode) -> Result<Lookup> {
        trace!(code = %code, "looking up short code");
        Ok(self.index.read().lookup(code))
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<UrlRecord>> {
        Ok(self.index.read().list_by_owner(owner_id))
    }

    async fn delete_batch(&self, owner_id: &str, codes: &[ShortCode]) -> Result<u64> {
        let mut index = self.index.write();
        let flipped = index.deletable(owner_id, codes);
        let count = flipped.len() as u64;
        index.mark_deleted(flipped.into_iter().map(|record| record.short_code));
        debug!(owner = owner_id, requested = codes.len(), deleted = count, "soft-deleted batch");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_generator::SeqGenerator;
    use burrow_core::StorageError;
    use std::sync::Arc;

    fn code(s: &str) -> ShortCode {
        ShortCode::new_unchecked(s)
    }

    fn seq_repo() -> InMemoryRepository<SeqGenerator> {
        InMemoryRepository::with_generator(SeqGenerator::with_prefix("bw"))
    }

    #[tokio::test]
    async fn create_and_get() {
        let repo = seq_repo();

        let inserted = repo.create("u1", "https://example.com").await.unwrap();
        assert_eq!(inserted, Insertion::Created(code("bw000000")));

        let result = repo.get(&code("bw000000")).await.unwrap();
        assert_eq!(result, Lookup::Found("https://example.com".to_string()));
    }

    #[tokio::test]
    async fn random_codes_are_eight_alphanumerics() {
        let repo = InMemoryRepository::new();

        let inserted = repo.create("u1", "https://example.com").await.unwrap();
        let code = inserted.code().as_str();
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn get_nonexistent() {
        let repo = seq_repo();

        assert_eq!(repo.get(&code("nope")).await.unwrap(), Lookup::NotFound);
    }

    #[tokio::test]
    async fn duplicate_url_returns_existing_code() {
        let repo = seq_repo();

        let first = repo.create("u1", "https://example.com").await.unwrap();
        let second = repo.create("u2", "https://example.com").await.unwrap();

        assert_eq!(first, Insertion::Created(code("bw000000")));
        assert_eq!(second, Insertion::Existing(code("bw000000")));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn colliding_code_is_regenerated() {
        let generator = Arc::new(SeqGenerator::with_period("c", 3));
        let repo = InMemoryRepository::with_generator(Arc::clone(&generator));

        repo.create("u1", "https://a.example").await.unwrap();
        // burn c000001 so the next create lands on c000002
        generator.generate();
        repo.create("u1", "https://b.example").await.unwrap();
        // the counter wraps to c000000, which is taken
        let third = repo.create("u1", "https://c.example").await.unwrap();

        assert_eq!(third, Insertion::Created(code("c000001")));
        assert_eq!(
            repo.get(&code("c000000")).await.unwrap(),
            Lookup::Found("https://a.example".to_string())
        );
    }

    #[tokio::test]
    async fn exhausted_code_space_is_an_error() {
        let repo = InMemoryRepository::with_generator(SeqGenerator::with_period("c", 1));

        repo.create("u1", "https://a.example").await.unwrap();
        let err = repo.create("u1", "https://b.example").await.unwrap_err();

        assert!(matches!(err, StorageError::CodeSpaceExhausted { .. }));
    }

    #[tokio::test]
    async fn list_by_owner_only_returns_live_owned_records() {
        let repo = seq_repo();

        repo.create("u1", "https://a.example").await.unwrap();
        repo.create("u1", "https://b.example").await.unwrap();
        repo.create("u2", "https://c.example").await.unwrap();
        repo.delete_batch("u1", &[code("bw000001")]).await.unwrap();

        let records = repo.list_by_owner("u1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].short_code, code("bw000000"));
        assert_eq!(records[0].owner_id.as_deref(), Some("u1"));
        assert!(!records[0].id.is_empty());
    }

    #[tokio::test]
    async fn delete_marks_record_deleted() {
        let repo = seq_repo();

        repo.create("u1", "https://example.com").await.unwrap();
        let deleted = repo.delete_batch("u1", &[code("bw000000")]).await.unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(repo.get(&code("bw000000")).await.unwrap(), Lookup::Deleted);
        // second delete flips nothing
        assert_eq!(repo.delete_batch("u1", &[code("bw000000")]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_by_other_owner_is_noop() {
        let repo = seq_repo();

        repo.create("u1", "https://example.com").await.unwrap();
        let deleted = repo.delete_batch("u2", &[code("bw000000")]).await.unwrap();

        assert_eq!(deleted, 0);
        assert_eq!(
            repo.get(&code("bw000000")).await.unwrap(),
            Lookup::Found("https://example.com".to_string())
        );
    }

    #[tokio::test]
    async fn deleted_url_stays_claimed() {
        let repo = seq_repo();

        repo.create("u1", "https://example.com").await.unwrap();
        repo.delete_batch("u1", &[code("bw000000")]).await.unwrap();

        let again = repo.create("u1", "https://example.com").await.unwrap();
        assert_eq!(again, Insertion::Existing(code("bw000000")));
    }

    #[tokio::test]
    async fn ping_and_close_are_noops() {
        let repo = seq_repo();
        repo.ping().await.unwrap();
        repo.close().await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_creates_of_same_url_converge() {
        let repo = Arc::new(InMemoryRepository::new());
        let mut handles = vec![];

        for i in 0..32 {
            let repo = Arc::clone(&repo);
            handles.push(tokio::spawn(async move {
                repo.create(&format!("u{i}"), "https://example.com/same")
                    .await
                    .unwrap()
            }));
        }

        let mut created = 0;
        let mut codes = std::collections::HashSet::new();
        for handle in handles {
            let insertion = handle.await.unwrap();
            if matches!(insertion, Insertion::Created(_)) {
                created += 1;
            }
            codes.insert(insertion.code().clone());
        }

        assert_eq!(created, 1);
        assert_eq!(codes.len(), 1);
    }
}
