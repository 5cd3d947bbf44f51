//! Credential exchange, risk policy and dispatch for generated API operations.
//!
//! A [`dispatch::Dispatcher`] ties together:
//! - the compiled [`apigate_openapi_tools::OperationRegistry`]
//! - a [`credentials::CredentialStore`] that swaps a caller's session token for backend API
//!   credentials
//! - a [`tool_policy::PolicyEngine`] that blocks, gates or audits each call
//! - an [`apigate_http_tools::OperationExecutor`] that performs it

pub mod audit;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod tool_policy;

pub use config::GatewayConfig;
pub use credentials::{CredentialStore, GatewayError, GatewayErrorKind};
pub use dispatch::{DispatchError, Dispatcher};
pub use tool_policy::{PolicyAction, PolicyDecision, PolicyEngine, RiskLevel};
