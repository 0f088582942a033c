use http::StatusCode;

/// Top-level error taxonomy shared by every Rampart component.
///
/// Component crates keep their own error enums (`DataError`, `SecurityError`,
/// ...) and convert into `AppError` at the repository boundary, the same way
/// handlers map their failures onto an HTTP status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// No repository/backend configured, or the record is absent.
    NotFound(String),
    /// The access resolver denied the operation.
    PermissionDenied(String),
    /// A create collided with an existing identifier.
    DuplicateIdentifier(String),
    /// Stale version on update or ACL save. Callers re-fetch and retry.
    VersionConflict(String),
    /// Malformed request (bad `range`, `me` without a subject, uid mismatch, ...).
    Validation(String),
    /// Unexpected backend failure.
    Internal(String),
}

impl AppError {
    /// Status classification of the error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::DuplicateIdentifier(_) | AppError::VersionConflict(_) => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Human readable message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            AppError::NotFound(msg)
            | AppError::PermissionDenied(msg)
            | AppError::DuplicateIdentifier(msg)
            | AppError::VersionConflict(msg)
            | AppError::Validation(msg)
            | AppError::Internal(msg) => msg,
        }
    }

    /// JSON body in the `{ "error": message }` shape used across the framework.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.message(),
            "status": self.status().as_u16(),
        })
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not Found: {msg}"),
            AppError::PermissionDenied(msg) => write!(f, "Permission Denied: {msg}"),
            AppError::DuplicateIdentifier(msg) => write!(f, "Duplicate Identifier: {msg}"),
            AppError::VersionConflict(msg) => write!(f, "Version Conflict: {msg}"),
            AppError::Validation(msg) => write!(f, "Validation Error: {msg}"),
            AppError::Internal(msg) => write!(f, "Internal Error: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}
