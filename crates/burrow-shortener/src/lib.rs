//! URL shortener service.
//!
//! [`ShortenerService`] is the facade the outer layers talk to: it forwards
//! creates and lookups to a [`Repository`](burrow_core::Repository) and hands
//! soft deletes to a background [`DeleteWorker`]. Core types are re-exported
//! from `burrow_core`.

pub mod service;
pub mod settings;
pub mod worker;

pub use burrow_core::{
    DeleteRequest, Lookup, ShortCode, Shortened, Shortener, ShortenerError, StorageError,
    UrlRecord,
};
pub use service::ShortenerService;
pub use settings::ShortenerSettings;
pub use worker::{DeleteWorker, WorkerStats};
