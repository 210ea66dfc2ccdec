//!
//! Utility module for the auditor.
//!
//! Re-exports decimal serialization helpers and the address file reader used throughout the codebase.
/// Big integer serde helpers for decimal-string JSON fields
pub mod decimal;
/// Reader for newline-separated address lists
pub mod address_file;

pub use address_file::read_address_file;
