use std::sync::Arc;

use time::{format_description::FormatItem, macros::format_description, Date};

pub mod write;

pub type RefbookId = i64;
pub type VersionId = i64;
pub type ElementId = i64;

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// A named reference dictionary, e.g. "Medical Specialties".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refbook {
    pub id: RefbookId,
    pub code: Arc<str>,
    pub name: Arc<str>,
    pub description: Option<Arc<str>>,
}

/// A dated snapshot of a refbook's code/value pairs, effective from
/// `start_date` until superseded by a later version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefbookVersion {
    pub id: VersionId,
    pub refbook_id: RefbookId,
    pub version: Arc<str>,
    pub start_date: Date,
}

impl RefbookVersion {
    pub fn is_started_by(&self, date: Date) -> bool {
        self.start_date <= date
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefbookElement {
    pub id: ElementId,
    pub version_id: VersionId,
    pub code: Arc<str>,
    pub value: Arc<str>,
}

impl RefbookElement {
    pub fn matches(&self, code: &str, value: &str) -> bool {
        self.code.as_ref() == code && self.value.as_ref() == value
    }
}

/// Renders a date as ISO `YYYY-MM-DD`.
pub fn format_date(d: Date) -> String {
    format!("{:04}-{:02}-{:02}", d.year(), d.month() as u8, d.day())
}

/// Parses an ISO `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Result<Date, time::error::Parse> {
    Date::parse(s, DATE_FORMAT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Month;

    #[test]
    fn test_date_round_trip() {
        let d = Date::from_calendar_date(2022, Month::October, 1).unwrap();
        assert_eq!(format_date(d), "2022-10-01");
        assert_eq!(parse_date("2022-10-01").unwrap(), d);
    }

    #[test]
    fn test_parse_date_rejects_garbage() {
        assert!(parse_date("2022-13-01").is_err());
        assert!(parse_date("01.10.2022").is_err());
        assert!(parse_date("").is_err());
    }

    #[test]
    fn test_element_matches_requires_code_and_value() {
        let e = RefbookElement {
            id: 1,
            version_id: 1,
            code: Arc::from("1"),
            value: Arc::from("Therapist"),
        };
        assert!(e.matches("1", "Therapist"));
        assert!(!e.matches("1", "Unknown"));
        assert!(!e.matches("2", "Therapist"));
    }
}
