//! Release lifecycle: identifiers, on-host layout, the ledger, activation, and retention.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::{self, Write as _};
use std::str::FromStr;

use crate::error::{Error, Result};

pub mod artifacts;
pub mod dependencies;
pub mod git;
pub mod keep_until;
pub mod ledger;
pub mod lifecycle;
pub mod offline;
pub mod paths;
pub mod retention;

pub use ledger::ReleaseRecord;
pub use lifecycle::{ReleaseLifecycle, ReleaseState};
pub use offline::OfflineTransfer;
pub use paths::{ReleaseLayout, ReleasePathSet};
pub use retention::{CleanRequest, RetentionManager, RetentionReport};

/// Basename of a release directory.
///
/// Always a single path component, so two distinct ids can never name the
/// same directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ReleaseId(String);

impl ReleaseId {
    pub fn parse(raw: &str) -> Result<Self> {
        let problem = if raw.is_empty() {
            Some("release id must not be empty")
        } else if raw == "." || raw == ".." {
            Some("release id must not be '.' or '..'")
        } else if raw.contains('/') {
            Some("release id must not contain '/'")
        } else if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            Some("release id must not contain whitespace or control characters")
        } else {
            None
        };

        match problem {
            Some(problem) => Err(Error::validation_invalid_argument(
                "releaseId",
                problem,
                Some(raw.to_string()),
            )),
            None => Ok(Self(raw.to_string())),
        }
    }

    /// New id from the wall clock using a strftime-style format.
    pub fn generate(format: &str, now: DateTime<Utc>) -> Result<Self> {
        let mut raw = String::new();
        write!(raw, "{}", now.format(format)).map_err(|_| {
            Error::config_invalid_value(
                "retention.releaseIdFormat",
                Some(format.to_string()),
                "not a valid date format",
            )
        })?;
        Self::parse(&raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ReleaseId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn accepts_timestamp_ids() {
        assert_eq!(ReleaseId::parse("2024-03-01_14.05").unwrap().as_str(), "2024-03-01_14.05");
        assert!(ReleaseId::parse("20230101").is_ok());
    }

    #[test]
    fn rejects_ids_that_escape_the_container() {
        for bad in ["", ".", "..", "a/b", "../etc", "has space", "tab\tid"] {
            assert!(ReleaseId::parse(bad).is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn generates_from_format() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 14, 5, 0).unwrap();
        let id = ReleaseId::generate("%Y-%m-%d_%H.%M", now).unwrap();
        assert_eq!(id.as_str(), "2024-03-01_14.05");
    }

    #[test]
    fn ids_order_chronologically() {
        let a = ReleaseId::parse("2024-01-31_23.59").unwrap();
        let b = ReleaseId::parse("2024-02-01_00.00").unwrap();
        assert!(a < b);
    }
}
