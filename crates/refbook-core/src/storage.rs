use crate::models::{
    write::{CreateElementCommand, CreateRefbookCommand, CreateVersionCommand},
    ElementId, Refbook, RefbookElement, RefbookId, RefbookVersion, VersionId,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0}")]
    Other(String),
    #[error("refbook not found: {0}")]
    RefbookNotFound(RefbookId),
    #[error("refbook version not found: {0}")]
    VersionNotFound(VersionId),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("no active transaction")]
    NoActiveTransaction,
}

pub type TransactionId = u64;

/// Persistence for refbooks, their versions and elements.
///
/// Reads are the only thing the query path needs; the create and delete
/// operations exist for administrative loading. Implementations enforce the
/// uniqueness of refbook codes, of `(refbook, version)` and
/// `(refbook, start_date)`, and of `(version, code)`.
pub trait RefbookStore: Send + Sync {
    fn create_refbook(&self, command: &CreateRefbookCommand) -> Result<RefbookId, StorageError>;
    fn create_version(&self, command: &CreateVersionCommand) -> Result<VersionId, StorageError>;
    fn create_element(&self, command: &CreateElementCommand) -> Result<ElementId, StorageError>;
    /// Removes a refbook together with its versions and their elements.
    fn delete_refbook(&self, id: RefbookId) -> Result<(), StorageError>;

    fn get_refbook(&self, id: RefbookId) -> Result<Option<Refbook>, StorageError>;
    fn list_refbooks(&self) -> Result<Vec<Refbook>, StorageError>;
    /// Versions of one refbook, in no particular order.
    fn list_versions(&self, refbook_id: RefbookId) -> Result<Vec<RefbookVersion>, StorageError>;
    /// Elements of one version, ordered by code.
    fn list_elements(&self, version_id: VersionId) -> Result<Vec<RefbookElement>, StorageError>;

    fn begin_transaction(&self) -> Result<TransactionId, StorageError>;
    fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError>;
    fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError>;
}
