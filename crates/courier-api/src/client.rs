//! Resilient outbound REST client.
//!
//! Wraps every platform API call with bounded, server-directed retry on rate
//! limits, child-span telemetry under the current invocation's trace, and
//! latency recording on every path. Retries are invisible to callers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::StatusCode;
use tokio::sync::watch;

use courier_telemetry::{Invocation, LatencyTracker, TelemetrySpan, TraceSink};

use crate::endpoint::normalize_endpoint;
use crate::rate_limit::{parse_rate_limit_headers, retry_delay_ms};
use crate::types::{ApiError, ApiErrorBody, ApiRequest, ApiResponse};

/// Logical client name used for latency dashboarding.
pub const PLATFORM_API_CLIENT_NAME: &str = "platform-api";

const RETRY_ATTEMPT_HEADER: &str = "x-courier-retry-attempt";

/// Runtime configuration for the resilient API client.
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub api_base: String,
    pub user_agent: String,
    pub request_timeout_ms: u64,
    /// Total attempts per call, including the first. Three attempts means at
    /// most two retries.
    pub max_attempts: usize,
    /// Remaining-allowance threshold at which a proactive warning is logged.
    pub low_water_remaining: u64,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            user_agent: "courier-bot/0.1".to_string(),
            request_timeout_ms: 30_000,
            max_attempts: 3,
            low_water_remaining: 2,
        }
    }
}

/// Outbound platform REST client. Cheap to clone via inner `Arc`s.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: ApiClientConfig,
    trace: Arc<dyn TraceSink>,
    latency: Arc<dyn LatencyTracker>,
}

impl ApiClient {
    pub fn new(
        config: ApiClientConfig,
        trace: Arc<dyn TraceSink>,
        latency: Arc<dyn LatencyTracker>,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("failed to create platform api client")?;
        Ok(Self {
            http,
            config,
            trace,
            latency,
        })
    }

    /// Sends a request, retrying rate-limited responses up to the configured
    /// attempt bound. A 429 that survives the final attempt is returned as an
    /// ordinary response; transport faults and cancellation are errors.
    pub async fn send(
        &self,
        request: &ApiRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<ApiResponse, ApiError> {
        let started = Instant::now();
        let result = self.send_traced(request, cancel).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.latency
            .record_latency(PLATFORM_API_CLIENT_NAME, elapsed_ms);
        result
    }

    async fn send_traced(
        &self,
        request: &ApiRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<ApiResponse, ApiError> {
        let normalized = normalize_endpoint(&request.path);
        let span_name = format!("api {} {normalized}", request.method);
        let mut span = match Invocation::current() {
            Some(invocation) => TelemetrySpan::start_in_trace(
                self.trace.clone(),
                span_name,
                invocation.trace_id.clone(),
                Some(invocation.root_span_id.clone()),
            ),
            None => TelemetrySpan::start(self.trace.clone(), span_name),
        };
        span.set_tag("http.method", request.method.as_str());
        span.set_tag("endpoint", normalized.clone());

        let trace_id = span.trace_id().to_string();
        let root_id = span.id().to_string();
        let outcome = self
            .attempt_loop(request, &normalized, cancel, trace_id, root_id)
            .await;

        match &outcome {
            Ok((response, attempts)) => {
                span.set_tag("http.status", response.status.as_str());
                if *attempts > 1 {
                    span.set_tag("retry.count", (*attempts - 1).to_string());
                }
                let state = parse_rate_limit_headers(&response.headers);
                for (key, value) in state.span_attributes() {
                    span.set_tag(key, value);
                }
                if state.remaining_is_low(self.config.low_water_remaining) {
                    tracing::warn!(
                        endpoint = %normalized,
                        remaining = ?state.remaining,
                        bucket = ?state.bucket_id,
                        "rate limit allowance nearly exhausted"
                    );
                }
                if response.status.is_success() {
                    span.set_ok();
                } else {
                    let parsed = ApiErrorBody::parse(&response.body).unwrap_or_default();
                    if let Some(code) = parsed.code {
                        span.set_tag("api.error_code", code.to_string());
                    }
                    let message = parsed.message.map(|m| truncate_detail(&m)).unwrap_or_else(|| {
                        format!("api request failed with status {}", response.status.as_u16())
                    });
                    span.set_tag("api.error_message", message.clone());
                    span.set_error(message);
                }
            }
            Err(ApiError::Transport(error)) => {
                span.record_exception(&error.to_string());
            }
            Err(ApiError::Cancelled) => {
                span.set_tag("cancelled", "true");
                span.set_error("request cancelled");
            }
        }
        span.finish();
        outcome.map(|(response, _)| response)
    }

    async fn attempt_loop(
        &self,
        request: &ApiRequest,
        normalized: &str,
        cancel: watch::Receiver<bool>,
        trace_id: String,
        parent_span_id: String,
    ) -> Result<(ApiResponse, usize), ApiError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1_usize;
        loop {
            let response = tokio::select! {
                result = self.execute_attempt(request, attempt) => result?,
                _ = wait_for_cancellation(cancel.clone()) => return Err(ApiError::Cancelled),
            };

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok((read_response(response).await?, attempt));
            }
            if attempt >= max_attempts {
                tracing::warn!(
                    endpoint = %normalized,
                    attempt,
                    "still rate limited on final attempt, returning response"
                );
                return Ok((read_response(response).await?, attempt));
            }

            let delay_ms = retry_delay_ms(response.headers());
            let state = parse_rate_limit_headers(response.headers());
            if state.is_global {
                tracing::warn!(
                    endpoint = %normalized,
                    attempt,
                    delay_ms,
                    "global rate limit hit, backing off the whole client"
                );
            } else {
                tracing::debug!(
                    endpoint = %normalized,
                    attempt,
                    delay_ms,
                    bucket = ?state.bucket_id,
                    "route rate limited, backing off"
                );
            }

            let mut retry_span = TelemetrySpan::start_in_trace(
                self.trace.clone(),
                "api retry",
                trace_id.clone(),
                Some(parent_span_id.clone()),
            );
            retry_span.set_tag("retry.attempt", attempt.to_string());
            retry_span.set_tag("retry.backoff_ms", delay_ms.to_string());
            retry_span.set_tag("ratelimit.global", state.is_global.to_string());
            let cancelled = tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => false,
                _ = wait_for_cancellation(cancel.clone()) => true,
            };
            if cancelled {
                retry_span.set_error("cancelled during backoff");
                retry_span.finish();
                return Err(ApiError::Cancelled);
            }
            retry_span.set_ok();
            retry_span.finish();

            attempt = attempt.saturating_add(1);
        }
    }

    /// Builds and sends a fresh request from the owned [`ApiRequest`]. Each
    /// attempt duplicates the original method, URL, headers, and body bytes.
    async fn execute_attempt(
        &self,
        request: &ApiRequest,
        attempt: usize,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let url = format!(
            "{}/{}",
            self.config.api_base.trim_end_matches('/'),
            request.path.trim_start_matches('/')
        );
        let mut builder = self.http.request(request.method.clone(), url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = builder.header(RETRY_ATTEMPT_HEADER, attempt.saturating_sub(1).to_string());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        builder.send().await
    }
}

async fn read_response(response: reqwest::Response) -> Result<ApiResponse, ApiError> {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?.to_vec();
    Ok(ApiResponse {
        status,
        headers,
        body,
    })
}

/// Resolves when the watch signal flips to cancelled. If the sender is gone
/// without cancelling, the future never resolves.
async fn wait_for_cancellation(mut cancel: watch::Receiver<bool>) {
    if *cancel.borrow() {
        return;
    }
    loop {
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        if *cancel.borrow() {
            return;
        }
    }
}

fn truncate_detail(raw: &str) -> String {
    const LIMIT: usize = 512;
    if raw.chars().count() <= LIMIT {
        return raw.to_string();
    }
    let truncated: String = raw.chars().take(LIMIT).collect();
    format!("{truncated}...")
}
