//! Error taxonomy for the authentication service.

/// Every fallible operation in this crate returns an [`AuthError`].
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Token missing, malformed, expired, or revoked.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Policy evaluation refused the request.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Identity, role, or policy name not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Signing secret too short, or another configuration problem.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Caller error; never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidToken(_) => "INVALID_TOKEN",
            AuthError::AccessDenied(_) => "ACCESS_DENIED",
            AuthError::NotFound(_) => "NOT_FOUND",
            AuthError::InvalidConfiguration(_) => "INVALID_CONFIGURATION",
            AuthError::InvalidArgument(_) => "INVALID_ARGUMENT",
        }
    }
}
