//! Billing error types

use roomledger_shared::LedgerError;
use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BillingError {
    #[error("monthly price must be >= 0")]
    NegativePrice,

    #[error("end date must be on/after start date")]
    EndBeforeStart,
}

impl From<BillingError> for LedgerError {
    fn from(err: BillingError) -> Self {
        LedgerError::InvalidTransaction(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
