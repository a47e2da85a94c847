use http::StatusCode;
use sea_orm::error::DbErr;

/// Error taxonomy of the ledger core.
///
/// `Conflict` is the only kind that is ever retried, and only inside the
/// bounded retry loop of [`crate::retry`]; every other kind propagates to
/// the caller immediately.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::InvalidInput(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

/// Message fragments that identify a storage error as a concurrency
/// conflict rather than a plain failure. Covers unique-constraint races,
/// lock-wait timeouts, deadlocks, serialization failures, and SQLite's
/// busy/locked states.
const CONFLICT_FRAGMENTS: [&str; 5] = [
    "unique",
    "locked",
    "lock wait",
    "deadlock",
    "could not serialize",
];

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// Classifies a storage error raised on the write path: errors that
    /// signal a race with a concurrent writer become `Conflict` (eligible
    /// for retry), everything else stays a `DatabaseError`.
    pub fn from_write_error(error: DbErr) -> Self {
        let message = error.to_string().to_ascii_lowercase();
        if CONFLICT_FRAGMENTS.iter().any(|f| message.contains(f)) {
            ServiceError::Conflict(format!("concurrent modification detected: {}", error))
        } else {
            ServiceError::DatabaseError(error)
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ServiceError::Conflict(_))
    }

    /// Returns the HTTP status code for this error. The HTTP adapter is out
    /// of scope for this crate, but this mapping is the single source of
    /// truth it consumes.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::InsufficientStock(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::DatabaseError(_) | Self::EventError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error message suitable for callers. Internal errors map
    /// to generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::EventError(_) | Self::InternalError(_) => "Internal error".to_string(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_mapping() {
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::InvalidInput("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InsufficientStock("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::db_error("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::db_error("connection refused at 10.0.0.7").response_message(),
            "Database error"
        );
        assert_eq!(
            ServiceError::InsufficientStock("available 1, requested 2".into()).response_message(),
            "Insufficient stock: available 1, requested 2"
        );
    }

    #[test]
    fn write_errors_with_race_signatures_become_conflicts() {
        let unique = DbErr::Custom("UNIQUE constraint failed: items.sku".into());
        assert!(ServiceError::from_write_error(unique).is_conflict());

        let busy = DbErr::Custom("database is locked".into());
        assert!(ServiceError::from_write_error(busy).is_conflict());

        let deadlock = DbErr::Custom("Deadlock found when trying to get lock".into());
        assert!(ServiceError::from_write_error(deadlock).is_conflict());

        let io = DbErr::Custom("disk I/O error".into());
        assert!(!ServiceError::from_write_error(io).is_conflict());
    }
}
