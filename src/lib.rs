//! banking_ledger Library
//!
//! Re-exports modules for integration testing and external use.

pub mod api;
pub mod domain;
pub mod queue;
pub mod store;
pub mod worker;

// Private modules (used only by the binary)
pub mod config;
pub mod db;
mod error;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use domain::{Amount, AmountError, Balance, DomainError};
pub use domain::{LedgerEntry, TransactionKind, TransactionRequest};
