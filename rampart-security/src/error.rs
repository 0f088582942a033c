use std::fmt;

use rampart_core::AppError;
use rampart_data::DataError;

/// Errors raised while resolving or persisting access lists.
#[derive(Debug)]
pub enum SecurityError {
    /// An access list save lost against a concurrent writer.
    VersionConflict(String),
    /// A stored or submitted access list is malformed.
    InvalidAcl(String),
    /// The backing store failed.
    Data(DataError),
}

impl fmt::Display for SecurityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityError::VersionConflict(msg) => write!(f, "ACL version conflict: {msg}"),
            SecurityError::InvalidAcl(msg) => write!(f, "Invalid ACL: {msg}"),
            SecurityError::Data(err) => write!(f, "ACL store error: {err}"),
        }
    }
}

impl std::error::Error for SecurityError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SecurityError::Data(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DataError> for SecurityError {
    fn from(err: DataError) -> Self {
        SecurityError::Data(err)
    }
}

impl From<serde_json::Error> for SecurityError {
    fn from(err: serde_json::Error) -> Self {
        SecurityError::InvalidAcl(err.to_string())
    }
}

impl From<SecurityError> for AppError {
    fn from(err: SecurityError) -> Self {
        match err {
            SecurityError::VersionConflict(msg) => AppError::VersionConflict(msg),
            SecurityError::InvalidAcl(msg) => AppError::Validation(msg),
            SecurityError::Data(err) => AppError::from(err),
        }
    }
}
