use std::sync::Arc;

use thiserror::Error;
use time::Date;

use refbook_core::{Refbook, RefbookElement, RefbookId, RefbookVersion};

use crate::{
    resolver::{self, UnknownVersion, VersionSelector},
    storage::{RefbookStore, StorageError},
};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("refbook not found: {0}")]
    RefbookNotFound(RefbookId),
    #[error("version {version:?} not found for refbook {refbook_id}")]
    VersionNotFound { refbook_id: RefbookId, version: String },
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Per-request state for the query path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryContext {
    /// Date used to pick a version when none is named.
    pub as_of: Date,
}

impl QueryContext {
    pub fn new(as_of: Date) -> Self {
        Self { as_of }
    }

    pub fn today() -> Self {
        Self::new(time::OffsetDateTime::now_utc().date())
    }
}

pub struct QueryService {
    storage: Arc<dyn RefbookStore>,
}

impl QueryService {
    pub fn new(storage: Arc<dyn RefbookStore>) -> Self {
        Self { storage }
    }

    /// Refbooks with at least one version started by `date`, sorted by code.
    /// Without a date every refbook that has any version qualifies.
    pub fn list_refbooks(&self, date: Option<Date>) -> Result<Vec<Refbook>, QueryError> {
        let mut result = Vec::new();
        for refbook in self.storage.list_refbooks()? {
            let versions = self.storage.list_versions(refbook.id)?;
            let qualifies = match date {
                Some(date) => resolver::any_started_by(&versions, date),
                None => !versions.is_empty(),
            };
            if qualifies {
                result.push(refbook);
            }
        }
        result.sort_by(|a, b| a.code.cmp(&b.code));
        tracing::debug!(date = ?date, count = result.len(), "Listed refbooks");
        Ok(result)
    }

    pub fn list_elements(&self, context: &QueryContext, refbook_id: RefbookId, version: Option<&str>) -> Result<Vec<RefbookElement>, QueryError> {
        match self.resolve(context, refbook_id, version)? {
            Some(resolved) => {
                let mut elements = self.storage.list_elements(resolved.id)?;
                elements.sort_by(|a, b| a.code.cmp(&b.code));
                Ok(elements)
            },
            None => Ok(Vec::new()),
        }
    }

    /// True when the resolved version holds an element with exactly this
    /// code and value.
    pub fn check_element(&self, context: &QueryContext, refbook_id: RefbookId, code: &str, value: &str, version: Option<&str>) -> Result<bool, QueryError> {
        let valid = match self.resolve(context, refbook_id, version)? {
            Some(resolved) => self.storage.list_elements(resolved.id)?
                .iter()
                .any(|e| e.matches(code, value)),
            None => false,
        };
        metrics::increment_counter!("refbook_element_checks_total", "valid" => valid.to_string());
        Ok(valid)
    }

    /// Finds the version a request applies to. `Ok(None)` means no version
    /// has started yet, which is not an error.
    pub fn resolve(&self, context: &QueryContext, refbook_id: RefbookId, version: Option<&str>) -> Result<Option<RefbookVersion>, QueryError> {
        if self.storage.get_refbook(refbook_id)?.is_none() {
            return Err(QueryError::RefbookNotFound(refbook_id));
        }
        let versions = self.storage.list_versions(refbook_id)?;
        let selector = VersionSelector::new(version, context.as_of);
        let resolved = resolver::resolve(&versions, selector)
            .map_err(|UnknownVersion(label)| QueryError::VersionNotFound { refbook_id, version: label })?;
        tracing::debug!(
            refbook_id,
            as_of = %context.as_of,
            requested = ?version,
            resolved = ?resolved.map(|v| v.version.as_ref()),
            "Resolved refbook version"
        );
        Ok(resolved.cloned())
    }
}
