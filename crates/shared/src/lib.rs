//! RoomLedger Shared Types and Utilities
//!
//! This crate contains the domain types, status transition tables, clock,
//! and error taxonomy shared across the RoomLedger engine and worker.

pub mod clock;
pub mod db;
pub mod error;
pub mod types;

pub use clock::{Clock, ClockMode};
pub use db::*;
pub use error::*;
pub use types::*;
