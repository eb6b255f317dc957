//! Billing domain errors

use thiserror::Error;

use core_kernel::TemporalError;

/// Errors that can occur in the billing domain
#[derive(Debug, Error)]
pub enum BillingError {
    /// No billing schedule period matches the requested date
    #[error("Billing schedule period not found: {0}")]
    PeriodNotFound(String),

    /// No billing ratio window matches the requested date
    #[error("Billing ratio not found: {0}")]
    RatioNotFound(String),

    /// Ratio numerator/denominator or window is malformed
    #[error("Invalid billing ratio: {0}")]
    InvalidRatio(String),

    /// A period set breaks the calendar ordering rules
    #[error("Invalid billing calendar: {0}")]
    InvalidCalendar(#[from] TemporalError),

    /// A state transition is not allowed from the current state
    #[error("Invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// The caller holds a stale version of a student product
    #[error("Version mismatch on student product {id}: expected {expected}, found {actual}")]
    VersionMismatch {
        id: String,
        expected: i32,
        actual: i32,
    },

    /// Amount calculation error
    #[error("Calculation error: {0}")]
    Calculation(String),

    /// Input does not satisfy a domain precondition
    #[error("Validation error: {0}")]
    Validation(String),

    /// A staged charge that no later attempt can produce
    #[error("Not billable: {0}")]
    Unbillable(String),
}

impl BillingError {
    pub fn invalid_transition(
        entity: &'static str,
        from: impl std::fmt::Debug,
        to: impl std::fmt::Debug,
    ) -> Self {
        BillingError::InvalidTransition {
            entity,
            from: format!("{:?}", from),
            to: format!("{:?}", to),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        BillingError::Validation(message.into())
    }

    pub fn unbillable(message: impl Into<String>) -> Self {
        BillingError::Unbillable(message.into())
    }

    /// Retrying the same input fails the same way
    pub fn is_permanent(&self) -> bool {
        matches!(self, BillingError::Unbillable(_))
    }
}
