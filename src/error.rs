use serde::{Deserialize, Serialize};
use thiserror::Error;
use warp::http::StatusCode;
use warp::reject::Reject;

/// General result type for login_notifier, error type defaults to [`Error`].
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Reasons an OAuth callback did not produce an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum AuthError {
    #[error("the visitor denied consent")]
    AccessDenied,
    #[error("the provider reported `{0}`")]
    Provider(String),
    #[error("no session is attached to the callback")]
    InvalidSession,
    #[error("callback state does not match the pending login")]
    InvalidState,
    #[error("callback is missing the authorization code")]
    MissingCode,
    #[error("authorization code exchange failed")]
    OAuthExchangeFailed,
    #[error("the provider did not respond")]
    NoResponse,
    #[error("the provider returned an unreadable profile")]
    BadJson,
}

impl Reject for AuthError {}

impl From<&AuthError> for StatusCode {
    fn from(error: &AuthError) -> Self {
        match error {
            AuthError::AccessDenied => Self::FORBIDDEN,
            AuthError::InvalidSession | AuthError::InvalidState | AuthError::MissingCode => {
                Self::BAD_REQUEST
            }
            _ => Self::BAD_GATEWAY,
        }
    }
}

/// Errors from delivering a notification to the webhook.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("webhook responded with {0}")]
    Status(StatusCode),
    #[error("webhook did not answer within {0:?}")]
    Timeout(std::time::Duration),
}

/// Errors from the metadata lookups and the sink submission.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("lookup request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("lookup response has no `{0}` field")]
    MissingField(&'static str),
    #[error("sink responded with {0}")]
    Status(StatusCode),
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("required setting `{0}` is not set")]
    Missing(&'static str),
    #[error("setting `{name}` is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// General errors that can occur while serving requests.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
    #[error(transparent)]
    Collect(#[from] CollectError),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(reqwest::Error),
    #[error("provider returned an unusable redirect URL")]
    InvalidRedirect,
    #[error("could not encode a response header")]
    InvalidHeader,
    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(u64),
    #[error("request body could not be read")]
    BodyUnreadable,
    #[error("server failed to start: {0}")]
    ServerStartFailed(String),
}

impl Reject for Error {}

impl From<&Error> for StatusCode {
    fn from(error: &Error) -> Self {
        match error {
            Error::Auth(error) => error.into(),
            Error::Notify(_) | Error::Collect(_) => Self::BAD_GATEWAY,
            Error::BodyTooLarge(_) => Self::PAYLOAD_TOO_LARGE,
            Error::BodyUnreadable => Self::BAD_REQUEST,
            Error::Config(_)
            | Error::HttpClient(_)
            | Error::InvalidRedirect
            | Error::InvalidHeader
            | Error::ServerStartFailed(_) => Self::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_error_status_codes() {
        assert_eq!(StatusCode::from(&AuthError::AccessDenied), StatusCode::FORBIDDEN);
        assert_eq!(StatusCode::from(&AuthError::InvalidState), StatusCode::BAD_REQUEST);
        assert_eq!(StatusCode::from(&AuthError::NoResponse), StatusCode::BAD_GATEWAY);
        assert_eq!(
            StatusCode::from(&Error::from(AuthError::MissingCode)),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            StatusCode::from(&Error::BodyTooLarge(16)),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn auth_error_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&AuthError::OAuthExchangeFailed).unwrap(),
            "\"o_auth_exchange_failed\""
        );
    }
}
