//! API description → named operations.
//!
//! This crate is used by:
//! - `apigate-http-tools` (executes a compiled [`operation::Operation`])
//! - `apigate-gateway` (builds the dispatch table from an [`operation::OperationRegistry`])
//!
//! It intentionally contains **no** HTTP execution and **no** credential or policy logic.

pub mod compiler;
pub mod config;
pub mod error;
pub mod loader;
pub mod operation;
pub mod redact;
pub mod resolver;

pub use compiler::{compile, sanitize_name, validate_naming};
pub use operation::{HttpMethod, Operation, OperationRegistry};
