//! 基础设施层：限流、重试、后端客户端

pub mod backend;
pub mod rate_limit;
pub mod retry;

pub use backend::{BackendClient, BackendRequest, BackendResponse, HttpBackendClient, HttpMethod};
pub use rate_limit::{RateLimiter, RateLimiterStats};
pub use retry::{RetryPolicy, execute_with_retry};
