//! Core types and traits for the Burrow URL shortener.
//!
//! This crate provides the types shared by the storage backends and the
//! shortener service: the short code, the stored record, the outcome types
//! and the [`Repository`] contract every backend implements.

pub mod error;
pub mod repository;
pub mod shortcode;
pub mod shortener;

pub use error::{ShortenerError, StorageError};
pub use repository::{Insertion, Lookup, Repository, UrlRecord};
pub use shortcode::ShortCode;
pub use shortener::{DeleteRequest, Shortened, Shortener};
