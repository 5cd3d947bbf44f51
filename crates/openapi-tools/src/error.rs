//! Error types for `apigate-openapi-tools`.

use thiserror::Error;

/// Main error type for operation compilation and spec loading.
#[derive(Error, Debug)]
pub enum OpenApiToolsError {
    /// Configuration errors (invalid prefix, name length too small for the prefix).
    #[error("Configuration error: {0}")]
    Config(String),

    /// `OpenAPI` errors (structural problems that make a document unusable).
    #[error("OpenAPI error: {0}")]
    OpenApi(String),

    #[error("OpenAPI error: failed to fetch spec from '{url}': {message}")]
    OpenApiSpecFetch { url: String, message: String },

    #[error("OpenAPI error: failed to read spec body from '{url}': {message}")]
    OpenApiSpecReadBody { url: String, message: String },

    #[error("OpenAPI error: failed to read spec file '{path}': {source}")]
    OpenApiSpecReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("OpenAPI error: failed to parse OpenAPI spec from '{location}': {source}")]
    OpenApiSpecParse {
        location: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("OpenAPI error: spec hash mismatch for '{location}' (expected {expected}, got {actual})")]
    SpecHashMismatch {
        location: String,
        expected: String,
        actual: String,
    },

    /// `$ref` resolution failures.
    #[error("Reference error: {0}")]
    Reference(String),
}

/// Result type alias for `OpenAPI` tooling operations.
pub type Result<T> = std::result::Result<T, OpenApiToolsError>;
