// 🚫 Billing Errors - everything that aborts a scan or charge transaction
//
// Domain errors mean "the input is wrong, do not retry it as-is".
// Database errors mean "the engine failed", the caller may try again later.

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Toll location missing or inactive
    #[error("Invalid toll location: {0}")]
    InvalidLocation(String),

    /// Vehicle class has no multiplier
    #[error("Invalid vehicle class: {0}")]
    InvalidVehicleClass(String),

    /// Account missing or inactive
    #[error("Invalid account: {0}")]
    InvalidAccount(i32),

    /// A configuration parameter holds a value that cannot be used
    #[error("Invalid configuration parameter {name}: {value:?}")]
    InvalidConfiguration { name: String, value: String },

    /// A stored column holds a value that cannot be read back
    #[error("Corrupt value in column {column}: {value:?}")]
    CorruptColumn { column: &'static str, value: String },

    /// Money arithmetic left the representable decimal range
    #[error("Amount overflow while computing {operation}")]
    AmountOverflow { operation: &'static str },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl BillingError {
    /// True for the rejections caused by the caller's input (or reference data
    /// it points at). Re-submitting the same input will fail the same way.
    pub fn is_fatal_input(&self) -> bool {
        matches!(
            self,
            BillingError::InvalidLocation(_)
                | BillingError::InvalidVehicleClass(_)
                | BillingError::InvalidAccount(_)
                | BillingError::InvalidConfiguration { .. }
                | BillingError::AmountOverflow { .. }
        )
    }

    /// Short stable label, used for pipeline failure counters and API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            BillingError::InvalidLocation(_) => "INVALID_LOCATION",
            BillingError::InvalidVehicleClass(_) => "INVALID_VEHICLE_CLASS",
            BillingError::InvalidAccount(_) => "INVALID_ACCOUNT",
            BillingError::InvalidConfiguration { .. } => "INVALID_CONFIGURATION",
            BillingError::CorruptColumn { .. } => "CORRUPT_COLUMN",
            BillingError::AmountOverflow { .. } => "AMOUNT_OVERFLOW",
            BillingError::Database(_) => "DATABASE",
        }
    }
}
