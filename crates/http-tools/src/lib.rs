//! Executes compiled API operations over HTTP.
//!
//! Sits between `apigate-openapi-tools` (which produces [`apigate_openapi_tools::Operation`]s)
//! and `apigate-gateway` (which supplies credentials and policy). It owns request assembly,
//! outbound destination checks and the retry loop, and nothing else.

pub mod error;
pub mod executor;
pub mod request;
pub mod retry;
pub mod safety;

pub use error::{ExecutorError, TransportKind};
pub use executor::{ExecutorSettings, OperationExecutor};
pub use request::{Arguments, AuthProjection};
pub use retry::RetryPolicy;
pub use safety::OutboundPolicy;
