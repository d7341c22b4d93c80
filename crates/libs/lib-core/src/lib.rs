//! # Core Library
//!
//! Configuration, the error taxonomy, and DTOs shared by the wallet layer and
//! the dashboard front end.

pub mod config;
pub mod dto;
pub mod error;

// Re-export commonly used types
pub use config::BlockchainConfig;
pub use dto::deal::DealRecord;
pub use error::{AppError, Result};
