//! Query-string parameters, validated once at the HTTP boundary.
//!
//! Raw parameters arrive as optional strings. Empty values count as absent,
//! matching how form-encoded clients usually send unset fields.

use serde::Deserialize;
use thiserror::Error;
use time::Date;

use refbook_core::{parse_date, RefbookId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("invalid date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("invalid refbook id {0:?}")]
    InvalidId(String),
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),
}

#[derive(Debug, Default, Deserialize)]
pub struct RefbooksParams {
    pub date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ElementsParams {
    pub version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckElementParams {
    pub code: Option<String>,
    pub value: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRefbooksRequest {
    pub date: Option<Date>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListElementsRequest {
    pub refbook_id: RefbookId,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckElementRequest {
    pub refbook_id: RefbookId,
    pub code: String,
    pub value: String,
    pub version: Option<String>,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn parse_refbook_id(raw: &str) -> Result<RefbookId, RequestError> {
    raw.parse().map_err(|_| RequestError::InvalidId(raw.to_string()))
}

impl TryFrom<RefbooksParams> for ListRefbooksRequest {
    type Error = RequestError;

    fn try_from(params: RefbooksParams) -> Result<Self, Self::Error> {
        let date = match present(params.date) {
            Some(raw) => Some(parse_date(&raw).map_err(|_| RequestError::InvalidDate(raw))?),
            None => None,
        };
        Ok(Self { date })
    }
}

impl ListElementsRequest {
    pub fn parse(raw_id: &str, params: ElementsParams) -> Result<Self, RequestError> {
        Ok(Self {
            refbook_id: parse_refbook_id(raw_id)?,
            version: present(params.version),
        })
    }
}

impl CheckElementRequest {
    pub fn parse(raw_id: &str, params: CheckElementParams) -> Result<Self, RequestError> {
        Ok(Self {
            refbook_id: parse_refbook_id(raw_id)?,
            code: params.code.ok_or(RequestError::MissingParameter("code"))?,
            value: params.value.ok_or(RequestError::MissingParameter("value"))?,
            version: present(params.version),
        })
    }
}
