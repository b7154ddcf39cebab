//! KeepUntil markers: zero-byte files named `<prefix><date>` that shield a
//! release from retention until the date has passed.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::fmt::Write as _;

use crate::error::{Error, Result};

/// What the markers inside one release directory say.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerScan {
    /// Latest date among the readable markers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unreadable: Vec<String>,
}

impl MarkerScan {
    pub fn is_empty(&self) -> bool {
        self.until.is_none() && self.unreadable.is_empty()
    }
}

pub fn marker_name(prefix: &str, format: &str, until: NaiveDateTime) -> Result<String> {
    let mut name = prefix.to_string();
    write!(name, "{}", until.format(format)).map_err(|_| {
        Error::config_invalid_value(
            "retention.keepUntilFormat",
            Some(format.to_string()),
            "not a valid date format",
        )
    })?;
    Ok(name)
}

/// Parse a marker date; a date-only format means midnight of that day.
pub fn parse_date(raw: &str, format: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, format)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, format)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// Fold every marker file name into one verdict. The latest date wins.
pub fn scan<I, S>(file_names: I, prefix: &str, format: &str) -> MarkerScan
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut result = MarkerScan::default();

    for name in file_names {
        let name = name.as_ref();
        let Some(raw_date) = name.strip_prefix(prefix) else {
            continue;
        };
        match parse_date(raw_date, format) {
            Some(date) => {
                if result.until.map_or(true, |current| date > current) {
                    result.until = Some(date);
                }
            }
            None => result.unreadable.push(name.to_string()),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn name_embeds_formatted_date() {
        let name = marker_name("KEEP_UNTIL__", "%Y%m%d", date(2024, 7, 4)).unwrap();
        assert_eq!(name, "KEEP_UNTIL__20240704");
    }

    #[test]
    fn date_only_format_parses_to_midnight() {
        assert_eq!(parse_date("20240704", "%Y%m%d"), Some(date(2024, 7, 4)));
    }

    #[test]
    fn datetime_format_is_supported() {
        let parsed = parse_date("2024-07-04_13.30", "%Y-%m-%d_%H.%M").unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 7, 4)
            .unwrap()
            .and_hms_opt(13, 30, 0)
            .unwrap();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn latest_marker_wins() {
        let scan = scan(
            ["KEEP_UNTIL__20240101", "KEEP_UNTIL__20250101", "KEEP_UNTIL__20240601"],
            "KEEP_UNTIL__",
            "%Y%m%d",
        );
        assert_eq!(scan.until, Some(date(2025, 1, 1)));
        assert!(scan.unreadable.is_empty());
    }

    #[test]
    fn unreadable_markers_are_collected() {
        let scan = scan(["KEEP_UNTIL__someday", "README"], "KEEP_UNTIL__", "%Y%m%d");
        assert_eq!(scan.until, None);
        assert_eq!(scan.unreadable, ["KEEP_UNTIL__someday"]);
        assert!(!scan.is_empty());
    }
}
