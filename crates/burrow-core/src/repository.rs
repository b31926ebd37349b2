use crate::error::Result;
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A stored URL record in the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    /// Opaque identifier assigned when the record was persisted.
    pub id: String,
    /// The short code the record is keyed by.
    pub short_code: ShortCode,
    /// The original URL that was shortened.
    pub original_url: String,
    /// The owner on whose behalf the code was created.
    pub owner_id: Option<String>,
    /// Soft-delete flag. Once set it is never cleared.
    pub deleted: bool,
}

impl UrlRecord {
    /// Returns `true` if the record belongs to `owner_id`.
    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id.as_deref() == Some(owner_id)
    }
}

/// Outcome of allocating a short code for a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insertion {
    /// The URL was new and got a freshly generated code.
    Created(ShortCode),
    /// The URL was already shortened; carries the code that won.
    Existing(ShortCode),
}

impl Insertion {
    /// The code the URL maps to, regardless of which branch was taken.
    pub fn code(&self) -> &ShortCode {
        match self {
            Insertion::Created(code) | Insertion::Existing(code) => code,
        }
    }
}

/// Result of resolving a short code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The code maps to this URL.
    Found(String),
    /// The code was never allocated.
    NotFound,
    /// The code existed but its owner soft-deleted it.
    Deleted,
}

impl Lookup {
    /// Returns the URL if the lookup found a live record.
    pub fn into_url(self) -> Option<String> {
        match self {
            Lookup::Found(url) => Some(url),
            Lookup::NotFound | Lookup::Deleted => None,
        }
    }
}

/// The capability set shared by every storage backend.
#[async_trait]
pub trait Repository: Send + Sync + 'static {
    /// Allocates a short code for `original_url`.
    ///
    /// If the URL was shortened before (by any owner, deleted or not) the
    /// existing code is returned as [`Insertion::Existing`].
    async fn create(&self, owner_id: &str, original_url: &str) -> Result<Insertion>;

    /// Resolves a short code to its original URL.
    async fn get(&self, code: &ShortCode) -> Result<Lookup>;

    /// Returns every non-deleted record owned by `owner_id`, in no particular order.
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<UrlRecord>>;

    /// Soft-deletes the given codes that belong to `owner_id`.
    ///
    /// Codes that do not exist, are already deleted or belong to another
    /// owner are skipped. Returns the number of records that were flipped.
    async fn delete_batch(&self, owner_id: &str, codes: &[ShortCode]) -> Result<u64>;

    /// Liveness check of the underlying medium.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    /// Flushes state before the process exits.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<R: Repository + ?Sized> Repository for std::sync::Arc<R> {
    async fn create(&self, owner_id: &str, original_url: &str) -> Result<Insertion> {
        (**self).create(owner_id, original_url).await
    }

    async fn get(&self, code: &ShortCode) -> Result<Lookup> {
        (**self).get(code).await
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<UrlRecord>> {
        (**self).list_by_owner(owner_id).await
    }

    async fn delete_batch(&self, owner_id: &str, codes: &[ShortCode]) -> Result<u64> {
        (**self).delete_batch(owner_id, codes).await
    }

    async fn ping(&self) -> Result<()> {
        (**self).ping().await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}
