//! Model Response Validation
//!
//! Shared parsing layer for model answers:
//! - JSON extraction and repair for malformed responses
//! - Structural format checks (required keys)
//!
//! Every agent goes through this module instead of parsing on its own; a
//! failure is always an `InvalidResponse` backend failure.

mod json_repair;
mod response;

pub use json_repair::{ParsedJson, parse_json_object, parse_json_response};
pub use response::{ExpectedFormat, FieldRule};
