//! Resilient platform REST client and rate-limit tracking for Courier.
//!
//! Every outbound call goes through [`ApiClient::send`], which owns bounded
//! retry on server rate limits, faithful per-attempt request duplication,
//! response classification, and telemetry tagging. Rate-limit state is parsed
//! fresh from every response's headers and never cached across requests.

mod client;
mod endpoint;
mod rate_limit;
mod types;

pub use client::{ApiClient, ApiClientConfig, PLATFORM_API_CLIENT_NAME};
pub use endpoint::normalize_endpoint;
pub use rate_limit::{parse_rate_limit_headers, retry_delay_ms, RateLimitState};
pub use types::{ApiError, ApiErrorBody, ApiRequest, ApiResponse};
