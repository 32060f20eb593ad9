//! Error taxonomy for the booking/payment engine
//!
//! Four caller-facing failure classes plus infrastructure errors:
//! - `InvalidTransaction`: a state transition or business invariant the
//!   caller can correct or retry (overlap, amount mismatch, bad transition)
//! - `InvalidInput`: malformed request shape/values, rejected before mutation
//! - `NotFound`: the referenced entity does not exist
//! - `Consistency`: a data-integrity violation that must abort the enclosing
//!   unit of work (e.g. multiple transactions matched for one payment)
//!
//! A duplicate webhook delivery is deliberately NOT an error; ingestion
//! reports it as a normal no-op outcome.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Consistency violation: {0}")]
    Consistency(String),

    #[error("Gateway error ({status}): {body}")]
    Gateway { status: u16, body: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
