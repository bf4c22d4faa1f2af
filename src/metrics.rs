//! Lightweight metrics helpers for panino.
//!
//! Thin wrappers over the `metrics` crate macros. No exporter is embedded; the
//! embedding application installs whatever recorder it likes and these calls
//! become no-ops without one.
//!
//! Provided metrics:
//! * `panino_requests_total` (counter; labels: route, method, status)
//! * `panino_request_duration_seconds` (histogram; labels: route, method)
//! * `panino_websocket_connections_total` (counter)
//! * `panino_websocket_close_codes_total` (counter; label: code)
use std::time::{Duration, Instant};

use metrics::{Unit, counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::Lazy;

pub const PANINO_REQUESTS_TOTAL: &str = "panino_requests_total";
pub const PANINO_REQUEST_DURATION_SECONDS: &str = "panino_request_duration_seconds";
pub const PANINO_WEBSOCKET_CONNECTIONS_TOTAL: &str = "panino_websocket_connections_total";
pub const PANINO_WEBSOCKET_CLOSE_CODES_TOTAL: &str = "panino_websocket_close_codes_total";

static DESCRIBED: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        PANINO_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests dispatched by the application."
    );
    describe_histogram!(
        PANINO_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests dispatched by the application."
    );
    describe_counter!(
        PANINO_WEBSOCKET_CONNECTIONS_TOTAL,
        Unit::Count,
        "Total WebSocket connections dispatched."
    );
    describe_counter!(
        PANINO_WEBSOCKET_CLOSE_CODES_TOTAL,
        Unit::Count,
        "WebSocket connections closed (by code)."
    );
});

/// Register metric descriptions with the installed recorder (idempotent).
pub fn init_metrics() {
    Lazy::force(&DESCRIBED);
    tracing::debug!("panino metric descriptions registered");
}

/// Increment the request counter. `route` is the matched pattern, never the raw path.
pub fn increment_request_total(route: &str, method: &str, status: u16) {
    counter!(
        PANINO_REQUESTS_TOTAL,
        "route" => route.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_request_duration(route: &str, method: &str, duration: Duration) {
    histogram!(
        PANINO_REQUEST_DURATION_SECONDS,
        "route" => route.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn increment_websocket_connections() {
    counter!(PANINO_WEBSOCKET_CONNECTIONS_TOTAL).increment(1);
}

pub fn record_websocket_close(code: u16) {
    counter!(PANINO_WEBSOCKET_CLOSE_CODES_TOTAL, "code" => code.to_string()).increment(1);
}

/// Records request count and latency once the response status is known.
pub struct RequestTimer {
    start: Instant,
    method: String,
}

impl RequestTimer {
    pub fn new(method: &str) -> Self {
        Self {
            start: Instant::now(),
            method: method.to_string(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn finish(self, route: &str, status: u16) {
        increment_request_total(route, &self.method, status);
        record_request_duration(route, &self.method, self.start.elapsed());
    }
}
