//! Error types for ssh-iam-bridge

use std::fmt::Display;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Directory Errors
    #[error("User {0} does not exist in the directory")]
    UserNotFound(String),

    #[error("Directory request {operation} failed for {target}: {message}")]
    Directory {
        operation: &'static str,
        target: String,
        message: String,
    },

    // Local Account Errors
    #[error("Local account operation {operation} failed for {target}: {message}")]
    Account {
        operation: &'static str,
        target: String,
        message: String,
    },

    #[error("Could not acquire creation lock {path}: {message}")]
    Lock { path: String, message: String },

    // Validation Errors
    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn directory(operation: &'static str, target: impl Into<String>, message: impl Display) -> Self {
        Error::Directory {
            operation,
            target: target.into(),
            message: message.to_string(),
        }
    }

    pub fn account(operation: &'static str, target: impl Into<String>, message: impl Display) -> Self {
        Error::Account {
            operation,
            target: target.into(),
            message: message.to_string(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Error::UserNotFound(_) => "UserNotFound",
            Error::Directory { .. } => "DirectoryError",
            Error::Account { .. } => "AccountError",
            Error::Lock { .. } => "LockError",
            Error::InvalidName(_) => "InvalidName",
            Error::InvalidConfig(_) => "InvalidConfig",
            Error::Io(_) => "IoError",
            Error::Other(_) => "InternalError",
        }
    }

    /// True when the directory answered that the user does not exist, as
    /// opposed to the lookup itself failing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::UserNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context() {
        let err = Error::directory("GetGroup", "system-admins", "throttled");
        assert_eq!(
            err.to_string(),
            "Directory request GetGroup failed for system-admins: throttled"
        );
        assert_eq!(err.code(), "DirectoryError");
        assert!(!err.is_not_found());

        let err = Error::UserNotFound("alice".into());
        assert!(err.is_not_found());
        assert_eq!(err.code(), "UserNotFound");
    }
}
