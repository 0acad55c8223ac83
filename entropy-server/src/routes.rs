//! HTTP routes for entropy distribution
//!
//! - `GET /api/`          - service banner
//! - `GET /api/info/`     - server description and request limits
//! - `GET /api/entropy/`  - random bytes, `?bytes=N&encoding=array|hex|base64`
//! - `GET /api/status/`   - buffer and request statistics
//! - `GET /health`        - 200 while a minimum-size request can be served
//! - `GET /metrics`       - Prometheus metrics

use crate::rate_limit::RateLimiter;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use entropy_core::{
    buffer::EntropyBuffer,
    config::ServerConfig,
    metrics::Metrics,
    protocol::{EncodingFormat, EntropyResponse, HealthStatus, ServerInfo, ServerStatus},
    Error,
};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub buffer: EntropyBuffer,
    pub metrics: Metrics,
    pub rate_limiter: Arc<RateLimiter>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        buffer: EntropyBuffer,
        metrics: Metrics,
        shutdown: CancellationToken,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limits));
        Self {
            config: Arc::new(config),
            buffer,
            metrics,
            rate_limiter,
            shutdown,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api", get(banner))
        .route("/api/", get(banner))
        .route("/api/info", get(server_info))
        .route("/api/info/", get(server_info))
        .route("/api/entropy", get(serve_entropy))
        .route("/api/entropy/", get(serve_entropy))
        .route("/api/status", get(get_status))
        .route("/api/status/", get(get_status))
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /api/ - nobody should be using this, but it answers
async fn banner() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "RNG server" }))
}

/// GET /api/info/ - server description
async fn server_info(State(state): State<AppState>) -> Json<ServerInfo> {
    Json(ServerInfo::from(state.config.as_ref()))
}

/// Query parameters for /api/entropy/
#[derive(serde::Deserialize)]
struct EntropyQuery {
    /// Kept as text so junk clamps to the minimum instead of failing extraction
    bytes: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

/// GET /api/entropy/ - serve random bytes
async fn serve_entropy(
    State(state): State<AppState>,
    Query(params): Query<EntropyQuery>,
) -> Result<Json<EntropyResponse>, StatusCode> {
    let start = Instant::now();

    let encoding = match params.encoding.as_deref() {
        None => EncodingFormat::default(),
        Some(s) => EncodingFormat::parse(s).ok_or_else(|| {
            state.metrics.record_request_failure();
            StatusCode::BAD_REQUEST
        })?,
    };

    let requested = params.bytes.as_deref().and_then(parse_byte_count);
    let bytes = state.config.clamp_request(requested);

    if !state.rate_limiter.check() {
        state.metrics.record_rate_limited();
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    debug!(requested = ?requested, bytes, "Serving entropy");

    let deadline = tokio::time::Instant::now() + state.config.request_timeout();
    let data = state
        .buffer
        .pop_until(bytes, deadline, &state.shutdown)
        .await
        .map_err(|e| {
            match &e {
                Error::Timeout => {
                    state.metrics.record_request_timeout();
                    warn!(bytes, available = state.buffer.len(), "Timed out waiting for entropy");
                }
                Error::Cancelled => state.metrics.record_request_failure(),
                _ => {
                    state.metrics.record_request_failure();
                    error!("Failed to withdraw entropy: {}", e);
                }
            }
            status_for(&e)
        })?;

    let latency = start.elapsed().as_micros() as u64;
    state.metrics.record_request(bytes, latency);

    Ok(Json(EntropyResponse {
        bytes,
        entropy: encoding.encode(&data),
    }))
}

/// Leading decimal integer of `raw`, ignoring trailing junk and saturating on overflow
///
/// `"12abc"` reads as 12; text without leading digits yields `None`.
fn parse_byte_count(raw: &str) -> Option<i64> {
    let raw = raw.trim_start();
    let (negative, rest) = match raw.as_bytes().first() {
        Some(b'-') => (true, &raw[1..]),
        Some(b'+') => (false, &raw[1..]),
        _ => (false, raw),
    };

    let digits = rest.bytes().take_while(u8::is_ascii_digit);
    let mut seen = false;
    let magnitude = digits.fold(0i64, |acc, d| {
        seen = true;
        acc.saturating_mul(10).saturating_add(i64::from(d - b'0'))
    });

    seen.then_some(if negative { -magnitude } else { magnitude })
}

fn status_for(error: &Error) -> StatusCode {
    match error {
        e if e.is_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
        Error::RequestTooLarge { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// GET /api/status/ - system status
async fn get_status(State(state): State<AppState>) -> Json<ServerStatus> {
    let buffer = &state.buffer;
    let fill_percent = buffer.fill_percent();
    let available = buffer.len();
    let stats = buffer.stats();

    let status = if available < state.config.min_request_bytes {
        HealthStatus::Unhealthy
    } else if fill_percent < 10.0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    let mut warnings = Vec::new();
    if available < state.config.min_request_bytes {
        warnings.push("Buffer cannot serve a minimum-size request".to_string());
    }
    if stats.bytes_dropped > 0 {
        warnings.push(format!(
            "{} bytes dropped on full buffer",
            stats.bytes_dropped
        ));
    }
    if let Some(age) = buffer.freshness_seconds() {
        if age > 60 {
            warnings.push(format!("No data from device for {} seconds", age));
        }
    }

    Json(ServerStatus {
        status,
        watermark: buffer.watermark(),
        buffer_fill_percent: fill_percent,
        buffer_bytes_available: available,
        buffer_capacity: buffer.capacity(),
        last_data_received: stats.last_push,
        data_freshness_seconds: buffer.freshness_seconds(),
        uptime_seconds: state.metrics.uptime_seconds(),
        total_requests_served: state.metrics.requests_total(),
        total_bytes_served: state.metrics.bytes_served(),
        requests_per_second: state.metrics.requests_per_second(),
        buffer: stats,
        warnings,
    })
}

/// GET /health - simple health check
async fn health_check(State(state): State<AppState>) -> StatusCode {
    if state.buffer.len() >= state.config.min_request_bytes {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /metrics - Prometheus metrics
async fn get_metrics(State(state): State<AppState>) -> String {
    state.metrics.prometheus_format(&state.buffer)
}
