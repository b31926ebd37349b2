//! Storage backends for the Burrow URL shortener.
//!
//! Three interchangeable implementations of [`Repository`]:
//!
//! - [`InMemoryRepository`]: volatile, a single lock-guarded index
//! - [`JournalRepository`]: the same index made durable by an fsync'd
//!   append-only JSON journal, compacted by checkpoints
//! - [`PostgresRepository`]: PostgreSQL as the only source of truth
//!
//! With the `testutil` feature, the `conformance` module holds the
//! behavioural checks every backend must pass.

#[cfg(any(test, feature = "testutil"))]
pub mod conformance;
mod index;
pub mod journal;
pub mod memory;
pub mod postgres;

pub use burrow_core::{Insertion, Lookup, Repository, ShortCode, StorageError, UrlRecord};
pub use index::MAX_GENERATE_ATTEMPTS;
pub use journal::{CheckpointStats, CompactorHandle, JournalCompactor, JournalRepository, ReplayStats};
pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;
