use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod codes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationInvalidArgument,
    ValidationInvalidState,

    EnvironmentNotFound,
    HostGroupNotFound,
    ReleaseNotFound,

    SshIdentityFileNotFound,
    SshConnectFailed,

    RemoteCommandFailed,
    RemoteCommandTimeout,

    ReleaseCloneFailed,
    ReleaseCheckoutFailed,
    ReleaseDependencyFailed,
    ReleaseActivationFailed,

    LedgerInvalid,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",
            ErrorCode::ValidationInvalidState => "validation.invalid_state",

            ErrorCode::EnvironmentNotFound => "environment.not_found",
            ErrorCode::HostGroupNotFound => "host_group.not_found",
            ErrorCode::ReleaseNotFound => "release.not_found",

            ErrorCode::SshIdentityFileNotFound => "ssh.identity_file_not_found",
            ErrorCode::SshConnectFailed => "ssh.connect_failed",

            ErrorCode::RemoteCommandFailed => "remote.command_failed",
            ErrorCode::RemoteCommandTimeout => "remote.command_timeout",

            ErrorCode::ReleaseCloneFailed => "release.clone_failed",
            ErrorCode::ReleaseCheckoutFailed => "release.checkout_failed",
            ErrorCode::ReleaseDependencyFailed => "release.dependency_failed",
            ErrorCode::ReleaseActivationFailed => "release.activation_failed",

            ErrorCode::LedgerInvalid => "ledger.invalid",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMissingKeyDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidJsonDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFoundDetails {
    pub id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub available: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidStateDetails {
    pub operation: String,
    pub state: String,
    pub expected: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCommandFailedDetails {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub target: TargetDetails,
}

/// Details for a lifecycle step that failed because a lower-level call failed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseStepFailedDetails {
    pub step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_id: Option<String>,
    pub cause: CauseDetails,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CauseDetails {
    pub code: String,
    pub message: String,
    pub details: Value,
}

impl From<&Error> for CauseDetails {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code.as_str().to_string(),
            message: err.message.clone(),
            details: err.details.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerInvalidDetails {
    pub path: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.clone(),
            id,
        });

        Self::new(ErrorCode::ValidationInvalidArgument, problem, details)
    }

    pub fn validation_invalid_state(
        operation: impl Into<String>,
        state: impl Into<String>,
        expected: Vec<String>,
    ) -> Self {
        let operation = operation.into();
        let state = state.into();
        let message = format!("Cannot run '{}' while release is {}", operation, state);
        let details = to_details(InvalidStateDetails {
            operation,
            state,
            expected,
        });

        Self::new(ErrorCode::ValidationInvalidState, message, details)
    }

    pub fn environment_not_found(id: impl Into<String>, available: Vec<String>) -> Self {
        Self::not_found(
            ErrorCode::EnvironmentNotFound,
            "Environment not found",
            id,
            available,
        )
        .with_hint("Environments live in ~/.config/rollout/environments/<name>.json")
    }

    pub fn host_group_not_found(id: impl Into<String>, available: Vec<String>) -> Self {
        Self::not_found(
            ErrorCode::HostGroupNotFound,
            "Host group not found",
            id,
            available,
        )
        .with_hint("Host groups are the keys of the environment's 'hosts' object")
    }

    pub fn release_not_found(path: impl Into<String>) -> Self {
        Self::not_found(ErrorCode::ReleaseNotFound, "Release not found", path, Vec::new())
    }

    fn not_found(
        code: ErrorCode,
        message: &str,
        id: impl Into<String>,
        available: Vec<String>,
    ) -> Self {
        let details = to_details(NotFoundDetails {
            id: id.into(),
            available,
        });
        Self::new(code, message, details)
    }

    pub fn ssh_identity_file_not_found(
        host: impl Into<String>,
        identity_file: impl Into<String>,
    ) -> Self {
        let details = serde_json::json!({
            "host": host.into(),
            "identityFile": identity_file.into(),
        });

        Self::new(
            ErrorCode::SshIdentityFileNotFound,
            "SSH identity file not found",
            details,
        )
    }

    pub fn ssh_connect_failed(details: RemoteCommandFailedDetails) -> Self {
        let message = format!(
            "SSH connection to {} failed",
            details.target.host.as_deref().unwrap_or("host")
        );
        let mut err = Self::new(ErrorCode::SshConnectFailed, message, to_details(details));
        err.retryable = Some(true);
        err
    }

    pub fn remote_command_failed(details: RemoteCommandFailedDetails) -> Self {
        Self::new(
            ErrorCode::RemoteCommandFailed,
            "Remote command failed",
            to_details(details),
        )
    }

    pub fn remote_command_timeout(details: RemoteCommandFailedDetails) -> Self {
        Self::new(
            ErrorCode::RemoteCommandTimeout,
            "Remote command timed out",
            to_details(details),
        )
    }

    fn release_step_failed(
        code: ErrorCode,
        message: &str,
        step: &str,
        host: Option<&str>,
        release_id: Option<&str>,
        cause: &Error,
    ) -> Self {
        let details = to_details(ReleaseStepFailedDetails {
            step: step.to_string(),
            host: host.map(str::to_string),
            release_id: release_id.map(str::to_string),
            cause: CauseDetails::from(cause),
        });

        let mut err = Self::new(code, message, details);
        err.retryable = cause.retryable;
        err
    }

    pub fn release_clone_failed(host: &str, release_id: &str, cause: &Error) -> Self {
        Self::release_step_failed(
            ErrorCode::ReleaseCloneFailed,
            "Could not clone code into the new release",
            "clone",
            Some(host),
            Some(release_id),
            cause,
        )
        .with_hint("Check that the current release or the canonical repository is reachable")
    }

    pub fn release_checkout_failed(host: &str, git_ref: &str, cause: &Error) -> Self {
        Self::release_step_failed(
            ErrorCode::ReleaseCheckoutFailed,
            "Could not check out the requested ref",
            "checkout",
            Some(host),
            None,
            cause,
        )
        .with_hint(format!("Make sure '{}' exists on the remote", git_ref))
    }

    pub fn release_dependency_failed(host: &str, release_id: &str, cause: &Error) -> Self {
        Self::release_step_failed(
            ErrorCode::ReleaseDependencyFailed,
            "Dependency installation failed",
            "dependencies",
            Some(host),
            Some(release_id),
            cause,
        )
    }

    pub fn release_activation_failed(host: &str, target: &str, problem: &str) -> Self {
        let details = serde_json::json!({
            "host": host,
            "target": target,
            "problem": problem,
        });

        Self::new(
            ErrorCode::ReleaseActivationFailed,
            format!("Refusing to activate {}: {}", target, problem),
            details,
        )
    }

    pub fn ledger_invalid(
        path: impl Into<String>,
        problem: impl Into<String>,
        line: Option<usize>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(LedgerInvalidDetails {
            path: path.into(),
            problem: problem.clone(),
            line,
        });

        Self::new(
            ErrorCode::LedgerInvalid,
            format!("Release ledger is malformed: {}", problem),
            details,
        )
    }

    pub fn config_missing_key(key: impl Into<String>, path: Option<String>) -> Self {
        let details = to_details(ConfigMissingKeyDetails {
            key: key.into(),
            path,
        });

        Self::new(
            ErrorCode::ConfigMissingKey,
            "Missing required configuration key",
            details,
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        let details = to_details(ConfigInvalidJsonDetails {
            path: path.into(),
            error: err.to_string(),
        });

        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            details,
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let details = to_details(ConfigInvalidValueDetails {
            key: key.into(),
            value,
            problem: problem.into(),
        });

        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            details,
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalIoErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalIoError, "IO error", details)
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalJsonErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalJsonError, "JSON error", details)
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed_command() -> Error {
        Error::remote_command_failed(RemoteCommandFailedDetails {
            command: "git clone".to_string(),
            exit_code: 128,
            stdout: String::new(),
            stderr: "fatal: repository not found".to_string(),
            target: TargetDetails {
                host: Some("web1".to_string()),
                user: Some("deploy".to_string()),
            },
        })
    }

    #[test]
    fn step_failure_wraps_the_underlying_command() {
        let err = Error::release_clone_failed("web1", "2024-01-01_10.00", &failed_command());

        assert_eq!(err.code, ErrorCode::ReleaseCloneFailed);
        assert_eq!(err.details["step"], "clone");
        assert_eq!(err.details["cause"]["code"], "remote.command_failed");
        assert_eq!(err.details["cause"]["details"]["exitCode"], 128);
        assert!(!err.hints.is_empty());
    }

    #[test]
    fn step_failure_inherits_retryable_from_cause() {
        let mut cause = failed_command();
        cause.retryable = Some(true);

        let err = Error::release_dependency_failed("web1", "r1", &cause);

        assert_eq!(err.retryable, Some(true));
    }

    #[test]
    fn ledger_error_reports_line() {
        let err = Error::ledger_invalid("/srv/app/RELEASES.txt", "bad entry", Some(3));

        assert_eq!(err.code.as_str(), "ledger.invalid");
        assert_eq!(err.details["line"], 3);
    }
}
