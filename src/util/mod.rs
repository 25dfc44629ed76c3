//! Utilities Module - shared infrastructure
//!
//! - `jsonpath`: Minimal path parser for projecting fields out of JSON outputs

pub mod jsonpath;
