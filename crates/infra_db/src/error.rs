//! Database error types
//!
//! The taxonomy callers branch on:
//! - `NotFound`: a `get_*` scan returned no rows
//! - `ConcurrencyConflict`: a write affected a different number of rows than
//!   it must (stale `version_number`, missing target row, lost insert)
//! - `Persistence`: driver or connection failure, prefixed with the
//!   repository operation that hit it
//!
//! Repositories never retry. Callers retry concurrency conflicts after a
//! fresh read and fail the request on everything else.

use domain_billing::BillingError;
use thiserror::Error;

/// Errors that can occur during database operations
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to establish a database connection
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Entity not found in database
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// A write affected an unexpected number of rows
    #[error("Concurrency conflict in {operation}: expected {expected} row(s) affected, got {actual}")]
    ConcurrencyConflict {
        operation: String,
        expected: u64,
        actual: u64,
    },

    /// Unique constraint violation
    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    /// Foreign key constraint violation
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Check constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Exclusion constraint violation (overlapping periods or ratio windows)
    #[error("Temporal overlap detected: {0}")]
    TemporalOverlap(String),

    /// Migration error
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Pool exhaustion - no available connections
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Driver error wrapped with the operation that hit it
    #[error("{operation}: {source}")]
    Persistence {
        operation: String,
        #[source]
        source: sqlx::Error,
    },

    /// A stored row violates a billing rule
    #[error(transparent)]
    Domain(#[from] BillingError),
}

impl DatabaseError {
    /// Creates a not found error for a specific entity type and identifier
    ///
    /// # Arguments
    ///
    /// * `entity` - The type of entity (e.g., "BillItem", "StudentProduct")
    /// * `id` - The identifier that was not found
    ///
    /// # Example
    ///
    /// ```rust
    /// use infra_db::DatabaseError;
    ///
    /// let error = DatabaseError::not_found("BillItem", 42);
    /// assert!(error.to_string().contains("BillItem"));
    /// ```
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        DatabaseError::NotFound(format!("{} with id '{}' not found", entity, id))
    }

    /// A write that must touch exactly `expected` rows touched `actual`
    pub fn conflict(operation: impl Into<String>, expected: u64, actual: u64) -> Self {
        DatabaseError::ConcurrencyConflict {
            operation: operation.into(),
            expected,
            actual,
        }
    }

    /// A compare-and-swap update found no row at `version`
    pub fn stale_version(operation: &str, id: impl std::fmt::Display, version: i32) -> Self {
        Self::conflict(
            format!("{} on {} with stale version_number {}", operation, id, version),
            1,
            0,
        )
    }

    /// Classifies a driver error raised by `operation`
    pub fn from_sqlx(operation: &str, error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::RowNotFound => DatabaseError::NotFound(operation.to_string()),
            sqlx::Error::PoolTimedOut => DatabaseError::PoolExhausted,
            sqlx::Error::Database(db_err) => {
                // PostgreSQL error codes
                // https://www.postgresql.org/docs/current/errcodes-appendix.html
                let message = format!("{}: {}", operation, db_err.message());
                match db_err.code().as_deref() {
                    Some("23505") => DatabaseError::DuplicateEntry(message),
                    Some("23503") => DatabaseError::ForeignKeyViolation(message),
                    Some("23514") => DatabaseError::ConstraintViolation(message),
                    Some("23P01") => DatabaseError::TemporalOverlap(message),
                    _ => DatabaseError::Persistence {
                        operation: operation.to_string(),
                        source: error,
                    },
                }
            }
            _ => DatabaseError::Persistence {
                operation: operation.to_string(),
                source: error,
            },
        }
    }

    /// Checks if this error indicates a record was not found
    pub fn is_not_found(&self) -> bool {
        matches!(self, DatabaseError::NotFound(_))
    }

    /// True for conflicts a caller should resolve by re-reading and retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, DatabaseError::ConcurrencyConflict { .. })
    }

    /// True for failures that recur on every retry of the same input
    pub fn is_permanent(&self) -> bool {
        matches!(self, DatabaseError::Domain(e) if e.is_permanent())
    }

    /// Checks if this error is a constraint violation
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            DatabaseError::DuplicateEntry(_)
                | DatabaseError::ForeignKeyViolation(_)
                | DatabaseError::ConstraintViolation(_)
                | DatabaseError::TemporalOverlap(_)
        )
    }

    /// Checks if this error is a connection-related issue
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            DatabaseError::ConnectionFailed(_) | DatabaseError::PoolExhausted
        )
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(error: sqlx::Error) -> Self {
        DatabaseError::from_sqlx("transaction", error)
    }
}

impl From<sqlx::migrate::MigrateError> for DatabaseError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        DatabaseError::MigrationFailed(error.to_string())
    }
}

/// Attaches the repository operation name to driver errors
pub trait OperationContext<T> {
    fn during(self, operation: &str) -> Result<T, DatabaseError>;
}

impl<T> OperationContext<T> for Result<T, sqlx::Error> {
    fn during(self, operation: &str) -> Result<T, DatabaseError> {
        self.map_err(|e| DatabaseError::from_sqlx(operation, e))
    }
}

/// Checks the affected-row count of a write
pub(crate) fn expect_rows(operation: &str, expected: u64, actual: u64) -> Result<(), DatabaseError> {
    if actual != expected {
        return Err(DatabaseError::conflict(operation, expected, actual));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(DatabaseError::conflict("BillItem.create", 1, 0).is_retryable());
        assert!(DatabaseError::stale_version("StudentProduct.update", "SP-1", 3).is_retryable());
        assert!(!DatabaseError::not_found("BillItem", 1).is_retryable());
        assert!(!DatabaseError::PoolExhausted.is_retryable());
    }

    #[test]
    fn test_only_unbillable_domain_errors_are_permanent() {
        assert!(DatabaseError::from(BillingError::unbillable("no schedule")).is_permanent());
        assert!(!DatabaseError::from(BillingError::validation("paused")).is_permanent());
        assert!(!DatabaseError::conflict("BillItem.create", 1, 0).is_permanent());
    }

    #[test]
    fn test_stale_version_message_names_version() {
        let err = DatabaseError::stale_version("StudentProduct.update_student_product_label", "SP-1", 3);
        let text = err.to_string();
        assert!(text.contains("stale version_number 3"));
        assert!(text.contains("expected 1 row(s) affected, got 0"));
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err = DatabaseError::from_sqlx("BillItem.get_by_sequence_number", sqlx::Error::RowNotFound);
        assert!(err.is_not_found());
    }

    #[test]
    fn test_persistence_keeps_operation_prefix() {
        let err = DatabaseError::from_sqlx("Order.create", sqlx::Error::PoolClosed);
        assert!(matches!(err, DatabaseError::Persistence { .. }));
        assert!(err.to_string().starts_with("Order.create: "));
    }

    #[test]
    fn test_expect_rows() {
        assert!(expect_rows("x", 1, 1).is_ok());
        let err = expect_rows("UpcomingBillItem.create", 1, 0).unwrap_err();
        assert!(matches!(err, DatabaseError::ConcurrencyConflict { expected: 1, actual: 0, .. }));
    }
}
