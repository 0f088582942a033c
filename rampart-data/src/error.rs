use rampart_core::AppError;

/// Errors that can occur in the data layer.
#[derive(Debug)]
pub enum DataError {
    NotFound(String),
    /// A record with the same identity already exists.
    Duplicate(String),
    /// Compare-and-write lost against a concurrent writer.
    Conflict(String),
    /// Malformed filter or query input.
    Validation(String),
    Database(Box<dyn std::error::Error + Send + Sync>),
    Other(String),
}

impl DataError {
    /// Construct a `Database` variant from any driver error.
    pub fn database(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        DataError::Database(Box::new(err))
    }
}

impl std::fmt::Display for DataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataError::NotFound(msg) => write!(f, "Not found: {msg}"),
            DataError::Duplicate(msg) => write!(f, "Duplicate record: {msg}"),
            DataError::Conflict(msg) => write!(f, "Write conflict: {msg}"),
            DataError::Validation(msg) => write!(f, "Invalid query: {msg}"),
            DataError::Database(err) => write!(f, "Database error: {err}"),
            DataError::Other(msg) => write!(f, "Data error: {msg}"),
        }
    }
}

impl std::error::Error for DataError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DataError::Database(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for DataError {
    fn from(err: serde_json::Error) -> Self {
        DataError::Other(err.to_string())
    }
}

impl From<DataError> for AppError {
    fn from(err: DataError) -> Self {
        match err {
            DataError::NotFound(msg) => AppError::NotFound(msg),
            DataError::Duplicate(msg) => AppError::DuplicateIdentifier(msg),
            DataError::Conflict(msg) => AppError::VersionConflict(msg),
            DataError::Validation(msg) => AppError::Validation(msg),
            DataError::Database(e) => AppError::Internal(e.to_string()),
            DataError::Other(msg) => AppError::Internal(msg),
        }
    }
}
