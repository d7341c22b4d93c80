//! # Utilities Library
//!
//! Shared helpers for reading environment variables.

pub mod envs;

// Re-export commonly used functions
pub use envs::{get_env, get_env_or, get_env_parse, get_env_parse_or};
