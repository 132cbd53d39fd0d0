//! Utility functions and helpers.

pub mod id_generator;
pub mod options;
pub mod sql_validator;

// Re-export commonly used types
pub use id_generator::IdGenerator;
pub use options::{merge_options_or_default, DriverOptions};
pub use sql_validator::SqlValidator;
