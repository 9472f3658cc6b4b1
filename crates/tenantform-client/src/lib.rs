//! Transport for the tenant management API.
//!
//! Provides a paced, retrying HTTP [`Transport`](transport::Transport) with
//! response classification, request-scoped cancellation via
//! [`CallContext`](context::CallContext), bounded convergence polling, and
//! provider configuration loaded from `TENANTFORM_*` environment variables.

pub mod auth;
pub mod classify;
pub mod config;
pub mod context;
pub mod error;
pub mod link;
pub mod pacer;
pub mod retry;
pub mod transport;

pub use auth::Credentials;
pub use config::{ConfigError, ProviderConfig, ProviderSettings};
pub use context::CallContext;
pub use error::{ApiError, ApiResult, ErrorClass};
pub use link::CURSOR_PARAM;
pub use pacer::RateLimitPacer;
pub use retry::{BackoffPolicy, PollPolicy, Probe};
pub use transport::{ApiRequest, ApiResponse, OperationKind, ResponseMeta, Transport};
