//! Picks the version of a refbook that applies to a request.
//!
//! An explicit label is an exact lookup and never falls back to dates. Without
//! a label the version in force on the as-of date wins: the latest
//! `start_date` that is not after it.

use std::cmp::Ordering;

use time::Date;

use refbook_core::RefbookVersion;

/// How a caller selects a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSelector<'a> {
    Label(&'a str),
    AsOf(Date),
}

impl<'a> VersionSelector<'a> {
    pub fn new(label: Option<&'a str>, as_of: Date) -> Self {
        match label {
            Some(label) => VersionSelector::Label(label),
            None => VersionSelector::AsOf(as_of),
        }
    }
}

/// Raised only for explicit labels that do not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVersion(pub String);

pub fn resolve<'v>(versions: &'v [RefbookVersion], selector: VersionSelector<'_>) -> Result<Option<&'v RefbookVersion>, UnknownVersion> {
    match selector {
        VersionSelector::Label(label) => versions.iter()
            .find(|v| v.version.as_ref() == label)
            .map(Some)
            .ok_or_else(|| UnknownVersion(label.to_string())),
        VersionSelector::AsOf(date) => Ok(current_version(versions, date)),
    }
}

/// The version in force on `date`, if any has started by then.
pub fn current_version(versions: &[RefbookVersion], date: Date) -> Option<&RefbookVersion> {
    versions.iter()
        .filter(|v| v.is_started_by(date))
        .max_by(|a, b| precedence(a, b))
}

/// True when at least one version has started by `date`.
pub fn any_started_by(versions: &[RefbookVersion], date: Date) -> bool {
    versions.iter().any(|v| v.is_started_by(date))
}

// Later start date first; on a (constraint-violating) tie the greater label wins.
fn precedence(a: &RefbookVersion, b: &RefbookVersion) -> Ordering {
    a.start_date.cmp(&b.start_date)
        .then_with(|| a.version.cmp(&b.version))
}
