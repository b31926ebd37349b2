use crate::repository::{Lookup, UrlRecord};
use crate::shortcode::ShortCode;
use async_trait::async_trait;

type Result<T> = std::result::Result<T, crate::error::ShortenerError>;

/// Service-level outcome of shortening a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shortened {
    /// A new code was allocated.
    Created(ShortCode),
    /// The URL was already shortened; the boundary decides how to report it.
    Conflict(ShortCode),
}

impl Shortened {
    pub fn code(&self) -> &ShortCode {
        match self {
            Shortened::Created(code) | Shortened::Conflict(code) => code,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Shortened::Conflict(_))
    }
}

/// A soft-delete task handed to the asynchronous delete worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub owner_id: String,
    pub codes: Vec<ShortCode>,
}

#[async_trait]
pub trait Shortener: Send + Sync + 'static {
    /// Shortens `original_url` on behalf of `owner_id`.
    async fn shorten(&self, owner_id: &str, original_url: &str) -> Result<Shortened>;

    /// Resolves a short code to its original URL.
    async fn resolve(&self, code: &ShortCode) -> Result<Lookup>;

    /// Lists the live records created by `owner_id`.
    async fn list(&self, owner_id: &str) -> Result<Vec<UrlRecord>>;

    /// Schedules soft deletion of `codes` owned by `owner_id`.
    ///
    /// Returns once the request is queued; the deletion itself happens later
    /// and its failures are not reported back.
    async fn delete(&self, owner_id: &str, codes: Vec<ShortCode>) -> Result<()>;

    /// Liveness check of the configured backend.
    async fn ping(&self) -> Result<()>;
}
