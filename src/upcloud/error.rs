//! Error types for the UpCloud client.

use thiserror::Error;

use crate::cloud::CloudError;
use crate::config::ConfigError;

/// Errors raised by the UpCloud client.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum UpCloudError {
    /// Raised when the credentials are incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when the request never produced an HTTP response.
    #[error("request to {endpoint} failed: {message}")]
    Http {
        /// Method and path of the request.
        endpoint: String,
        /// Transport error message.
        message: String,
    },
    /// Raised when the API answers with a non-success status.
    #[error("{endpoint} returned {status} {code}: {message}")]
    Api {
        /// Method and path of the request.
        endpoint: String,
        /// HTTP status code.
        status: u16,
        /// Provider error code, for example `SERVER_NOT_FOUND`.
        code: String,
        /// Provider error message or the raw response body.
        message: String,
    },
    /// Raised when a success response cannot be decoded.
    #[error("failed to decode response from {endpoint}: {message}")]
    Decode {
        /// Method and path of the request.
        endpoint: String,
        /// Decoder error message.
        message: String,
    },
    /// Raised when a polling wait exceeds its timeout.
    #[error("timeout waiting for {resource} {uuid} to {target} (last state {last_state})")]
    Timeout {
        /// Resource kind, `server` or `storage`.
        resource: &'static str,
        /// Resource identifier.
        uuid: String,
        /// Rendered wait target.
        target: String,
        /// Last state observed before giving up.
        last_state: String,
    },
}

impl CloudError for UpCloudError {
    fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<ConfigError> for UpCloudError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
