//! Error types for credential operations
//!
//! The `Display` text of each variant is the message a client sees, so the
//! wording here is part of the external contract.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Unknown username or wrong secret. Both collapse to one message.
    #[error("Invalid username or password.")]
    InvalidCredentials,

    /// Malformed request input, rejected before any store is contacted
    #[error("{0}")]
    Validation(String),

    /// The credential store refused to create an identity
    #[error("{0}")]
    IdentityRejected(String),

    /// Role assignment failed after the identity was created
    #[error("User registered but failed to assign role: {0}")]
    RoleAssignment(String),

    /// Any renewal value that cannot be redeemed now
    #[error("Invalid or expired refresh token.")]
    InvalidOrExpiredRefreshToken,

    #[error("Missing required configuration value: {0}")]
    ConfigurationMissing(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    /// Concurrent logins kept replacing the renewal slot
    #[error("Renewal token was replaced concurrently, please retry the login")]
    RenewalConflict,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Token encoding error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Password hashing error: {0}")]
    PasswordHash(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<password_hash::Error> for Error {
    fn from(err: password_hash::Error) -> Self {
        Error::PasswordHash(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Internal(format!("background task failed: {}", err))
    }
}

impl Error {
    /// True for failures caused by the caller's input rather than by this service
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidCredentials
                | Error::Validation(_)
                | Error::IdentityRejected(_)
                | Error::RoleAssignment(_)
                | Error::InvalidOrExpiredRefreshToken
                | Error::UserNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
