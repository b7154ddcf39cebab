use super::ErrorCode;

pub fn all_codes() -> &'static [ErrorCode] {
    &[
        ErrorCode::ConfigMissingKey,
        ErrorCode::ConfigInvalidJson,
        ErrorCode::ConfigInvalidValue,
        ErrorCode::ValidationInvalidArgument,
        ErrorCode::ValidationInvalidState,
        ErrorCode::EnvironmentNotFound,
        ErrorCode::HostGroupNotFound,
        ErrorCode::ReleaseNotFound,
        ErrorCode::SshIdentityFileNotFound,
        ErrorCode::SshConnectFailed,
        ErrorCode::RemoteCommandFailed,
        ErrorCode::RemoteCommandTimeout,
        ErrorCode::ReleaseCloneFailed,
        ErrorCode::ReleaseCheckoutFailed,
        ErrorCode::ReleaseDependencyFailed,
        ErrorCode::ReleaseActivationFailed,
        ErrorCode::LedgerInvalid,
        ErrorCode::InternalIoError,
        ErrorCode::InternalJsonError,
        ErrorCode::InternalUnexpected,
    ]
}

pub fn parse_code(code: &str) -> Option<ErrorCode> {
    all_codes()
        .iter()
        .copied()
        .find(|candidate| candidate.as_str() == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_code_round_trips_through_its_string_form() {
        for code in all_codes() {
            assert_eq!(parse_code(code.as_str()), Some(*code));
        }
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert_eq!(parse_code("release.exploded"), None);
    }
}
