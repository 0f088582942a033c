use rampart_data::DataError;

/// Conversion from `sqlx::Error` into `DataError`.
///
/// Orphan rules forbid `From<sqlx::Error> for DataError` here.
pub trait SqlxErrorExt {
    fn into_data_error(self) -> DataError;

    /// The statement touched a table that does not exist.
    fn is_missing_table(&self) -> bool;
}

impl SqlxErrorExt for sqlx::Error {
    fn into_data_error(self) -> DataError {
        match &self {
            sqlx::Error::RowNotFound => DataError::NotFound("Row not found".into()),
            sqlx::Error::Database(db) if db.is_unique_violation() => DataError::Duplicate(db.message().to_string()),
            _ => DataError::database(self),
        }
    }

    fn is_missing_table(&self) -> bool {
        matches!(self, sqlx::Error::Database(db) if db.message().contains("no such table"))
    }
}

pub type SqlxResult<T> = Result<T, DataError>;
