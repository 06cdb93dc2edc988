//! Error types for dashboard-session.

use thiserror::Error;

/// Session error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Dashboard API error.
    #[error("API error: {0}")]
    Api(#[from] dashboard_api::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No full token is installed.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Input rejected before any request was made.
    #[error("Validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Returns true if this error means the session is no longer usable
    /// and a fresh login is required.
    pub fn is_auth_error(&self) -> bool {
        match self {
            Error::Api(e) => e.is_auth_error(),
            Error::NotAuthenticated => true,
            _ => false,
        }
    }
}

/// Result type alias for dashboard-session.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A rejected login, carrying a message that can be shown to the user as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct LoginFailure {
    pub message: String,
}

impl LoginFailure {
    pub fn new<S: ToString>(message: S) -> Self {
        Self {
            message: message.to_string(),
        }
    }

    /// Classify an API error into a displayable message. The server's own
    /// `detail` wins when it sent one.
    pub fn from_api_error(err: &dashboard_api::Error) -> Self {
        if let Some(detail) = err.detail().filter(|d| !d.trim().is_empty()) {
            return Self::new(detail);
        }
        if err.is_transport() {
            Self::new("Could not reach the server")
        } else if err.is_auth_error() {
            Self::new("Invalid email or password")
        } else {
            Self::new("Login failed")
        }
    }
}
