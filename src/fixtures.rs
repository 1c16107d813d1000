//! Bootstrap data for a store, read from TOML:
//!
//! ```toml
//! [[refbooks]]
//! code = "RB1"
//! name = "Medical Specialties"
//!
//! [[refbooks.versions]]
//! version = "1.0"
//! start_date = "2022-01-01"
//! elements = [{ code = "1", value = "Therapist" }]
//! ```

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use refbook_core::{parse_date, CreateElementCommand, CreateRefbookCommand, CreateVersionCommand};

use crate::storage::{RefbookStore, StorageError};

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("cannot read fixture file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid fixture document: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid start_date {0:?} for version {1}")]
    InvalidDate(String, String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Deserialize)]
pub struct Fixtures {
    #[serde(default)]
    pub refbooks: Vec<RefbookFixture>,
}

#[derive(Debug, Deserialize)]
pub struct RefbookFixture {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub versions: Vec<VersionFixture>,
}

#[derive(Debug, Deserialize)]
pub struct VersionFixture {
    pub version: String,
    pub start_date: String,
    #[serde(default)]
    pub elements: Vec<ElementFixture>,
}

#[derive(Debug, Deserialize)]
pub struct ElementFixture {
    pub code: String,
    pub value: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub refbooks: usize,
    pub versions: usize,
    pub elements: usize,
}

impl Fixtures {
    pub fn from_path(path: &str) -> Result<Self, FixtureError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, FixtureError> {
        Ok(toml::from_str(contents)?)
    }

    /// Inserts everything in one transaction; nothing is kept if any record fails.
    pub fn load_into(&self, storage: &dyn RefbookStore) -> Result<LoadSummary, FixtureError> {
        let tx_id = storage.begin_transaction()?;
        match self.insert(storage) {
            Ok(summary) => {
                storage.commit_transaction(tx_id)?;
                tracing::info!(
                    refbooks = summary.refbooks,
                    versions = summary.versions,
                    elements = summary.elements,
                    "Fixtures loaded"
                );
                Ok(summary)
            }
            Err(e) => {
                storage.rollback_transaction(tx_id)?;
                Err(e)
            }
        }
    }

    fn insert(&self, storage: &dyn RefbookStore) -> Result<LoadSummary, FixtureError> {
        let mut summary = LoadSummary::default();
        for refbook in &self.refbooks {
            let refbook_id = storage.create_refbook(&CreateRefbookCommand {
                code: Arc::from(refbook.code.as_str()),
                name: Arc::from(refbook.name.as_str()),
                description: refbook.description.as_deref().map(Arc::from),
            })?;
            summary.refbooks += 1;

            for version in &refbook.versions {
                let start_date = parse_date(&version.start_date)
                    .map_err(|_| FixtureError::InvalidDate(version.start_date.clone(), version.version.clone()))?;
                let version_id = storage.create_version(&CreateVersionCommand {
                    refbook_id,
                    version: Arc::from(version.version.as_str()),
                    start_date,
                })?;
                summary.versions += 1;

                for element in &version.elements {
                    storage.create_element(&CreateElementCommand {
                        version_id,
                        code: Arc::from(element.code.as_str()),
                        value: Arc::from(element.value.as_str()),
                    })?;
                    summary.elements += 1;
                }
            }
        }
        Ok(summary)
    }
}
