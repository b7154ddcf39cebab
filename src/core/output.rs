//! Public output types for rollout command responses.
//!
//! These are shared by the CLI and by library consumers that drive a host
//! group and want one result per host.

use serde::Serialize;

use crate::error::Error;

/// Standardized per-host execution result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResult<T: Serialize> {
    pub action: String,
    pub results: Vec<HostOutcome<T>>,
    pub summary: BulkSummary,
}

/// Outcome for a single host in a fan-out.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostOutcome<T: Serialize> {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<HostError>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostError {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
}

impl From<&Error> for HostError {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code.as_str().to_string(),
            message: err.message.clone(),
            details: err.details.clone(),
        }
    }
}

/// Summary of bulk operation results.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl<T: Serialize> BulkResult<T> {
    pub fn new(action: impl Into<String>, results: Vec<HostOutcome<T>>) -> Self {
        let failed = results.iter().filter(|r| r.error.is_some()).count();
        let summary = BulkSummary {
            total: results.len(),
            succeeded: results.len() - failed,
            failed,
        };
        Self {
            action: action.into(),
            results,
            summary,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.summary.failed == 0
    }

    /// First host error, for callers that stop a multi-phase run on failure.
    pub fn first_error(&self) -> Option<(&str, &HostError)> {
        self.results
            .iter()
            .find_map(|r| r.error.as_ref().map(|e| (r.host.as_str(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_failures() {
        let err = Error::internal_unexpected("boom");
        let result = BulkResult::new(
            "release.activate",
            vec![
                HostOutcome {
                    host: "web1".to_string(),
                    result: Some(1u32),
                    error: None,
                },
                HostOutcome {
                    host: "web2".to_string(),
                    result: None,
                    error: Some(HostError::from(&err)),
                },
            ],
        );

        assert_eq!(result.summary.total, 2);
        assert_eq!(result.summary.failed, 1);
        assert!(!result.all_succeeded());
        assert_eq!(result.first_error().map(|(host, _)| host), Some("web2"));
    }
}
