use std::sync::Arc;

use time::Date;

use super::{RefbookId, VersionId};

#[derive(Debug, Clone, PartialEq)]
pub struct CreateRefbookCommand {
    pub code: Arc<str>,
    pub name: Arc<str>,
    pub description: Option<Arc<str>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateVersionCommand {
    pub refbook_id: RefbookId,
    pub version: Arc<str>,
    pub start_date: Date,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateElementCommand {
    pub version_id: VersionId,
    pub code: Arc<str>,
    pub value: Arc<str>,
}
