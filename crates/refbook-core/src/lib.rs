//! Core types and traits for Refbook storage backends.
//!
//! This crate provides the `RefbookStore` trait and all associated types,
//! enabling pluggable storage implementations.

pub mod models;
pub mod storage;

// Re-export key types at crate root for convenience
pub use models::{format_date, parse_date, ElementId, Refbook, RefbookElement, RefbookId, RefbookVersion, VersionId};
pub use models::write::{CreateElementCommand, CreateRefbookCommand, CreateVersionCommand};
pub use storage::{RefbookStore, StorageError, TransactionId};
