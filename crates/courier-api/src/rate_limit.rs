//! Rate-limit header parsing and server-directed backoff computation.
//!
//! Pure functions over response headers. The platform reports allowance per
//! bucket via `X-RateLimit-*` headers; a global throttle affects the whole
//! client rather than one route.

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";
pub const HEADER_RESET_AFTER: &str = "x-ratelimit-reset-after";
pub const HEADER_BUCKET: &str = "x-ratelimit-bucket";
pub const HEADER_GLOBAL: &str = "x-ratelimit-global";
pub const HEADER_SCOPE: &str = "x-ratelimit-scope";
pub const HEADER_RETRY_AFTER: &str = "retry-after";

/// Backoff used when a throttled response carries no usable delay hint.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Allowance window state derived from one response. Never cached.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitState {
    pub bucket_id: Option<String>,
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_at: Option<f64>,
    pub reset_after_seconds: Option<f64>,
    pub is_global: bool,
}

impl RateLimitState {
    /// True when the remaining allowance is at or below `low_water`.
    pub fn remaining_is_low(&self, low_water: u64) -> bool {
        matches!(self.remaining, Some(remaining) if remaining <= low_water)
    }

    /// Renders the state as span attributes, omitting absent fields.
    pub fn span_attributes(&self) -> Vec<(String, String)> {
        let mut attributes = Vec::new();
        if let Some(bucket_id) = &self.bucket_id {
            attributes.push(("ratelimit.bucket".to_string(), bucket_id.clone()));
        }
        if let Some(limit) = self.limit {
            attributes.push(("ratelimit.limit".to_string(), limit.to_string()));
        }
        if let Some(remaining) = self.remaining {
            attributes.push(("ratelimit.remaining".to_string(), remaining.to_string()));
        }
        if let Some(reset_at) = self.reset_at {
            attributes.push(("ratelimit.reset".to_string(), reset_at.to_string()));
        }
        if let Some(reset_after) = self.reset_after_seconds {
            attributes.push(("ratelimit.reset_after".to_string(), reset_after.to_string()));
        }
        attributes.push(("ratelimit.global".to_string(), self.is_global.to_string()));
        attributes
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let raw = headers.get(name)?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }
    Some(raw)
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    header_str(headers, name)?.parse().ok()
}

fn header_f64(headers: &HeaderMap, name: &str) -> Option<f64> {
    header_str(headers, name)?.parse().ok()
}

fn header_bool(headers: &HeaderMap, name: &str) -> bool {
    matches!(header_str(headers, name), Some(raw) if raw.eq_ignore_ascii_case("true"))
}

/// Parses the full rate-limit header set from one response.
pub fn parse_rate_limit_headers(headers: &HeaderMap) -> RateLimitState {
    let scope_global =
        matches!(header_str(headers, HEADER_SCOPE), Some(scope) if scope.eq_ignore_ascii_case("global"));
    RateLimitState {
        bucket_id: header_str(headers, HEADER_BUCKET).map(str::to_string),
        limit: header_u64(headers, HEADER_LIMIT),
        remaining: header_u64(headers, HEADER_REMAINING),
        reset_at: header_f64(headers, HEADER_RESET),
        reset_after_seconds: header_f64(headers, HEADER_RESET_AFTER),
        is_global: header_bool(headers, HEADER_GLOBAL) || scope_global,
    }
}

fn parse_retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    let raw = header_str(headers, HEADER_RETRY_AFTER)?;

    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds.saturating_mul(1_000));
    }

    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delay_ms = retry_at.signed_duration_since(Utc::now()).num_milliseconds();
    if delay_ms <= 0 {
        return Some(0);
    }
    u64::try_from(delay_ms).ok()
}

/// Computes the backoff before retrying a throttled request.
///
/// The precise `X-RateLimit-Reset-After` value (fractional seconds, rounded to
/// the nearest millisecond) is preferred over the generic `Retry-After`
/// header; with neither present the delay defaults to one second.
pub fn retry_delay_ms(headers: &HeaderMap) -> u64 {
    if let Some(reset_after) = header_f64(headers, HEADER_RESET_AFTER) {
        if reset_after.is_sign_negative() {
            return 0;
        }
        return (reset_after * 1_000.0).round() as u64;
    }
    parse_retry_after_ms(headers).unwrap_or(DEFAULT_RETRY_DELAY_MS)
}
