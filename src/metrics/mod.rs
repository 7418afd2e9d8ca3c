use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;

/// Initialize metrics with descriptions
pub fn init_metrics() {
    describe_counter!("proxy_requests_total", "Requests forwarded to a backend");
    describe_histogram!(
        "proxy_request_duration_seconds",
        "Time until the backend returned response headers"
    );
    describe_counter!(
        "proxy_dispatch_failures_total",
        "Forwarding attempts that failed at the transport level"
    );
    describe_counter!(
        "proxy_unavailable_total",
        "Requests rejected because no backend could be selected"
    );
    describe_gauge!("backend_health", "Backend liveness (1=alive, 0=dead)");
    describe_gauge!("backend_active_connections", "In-flight requests per backend");
    describe_counter!("health_rounds_total", "Health check rounds by outcome");
}

/// Start Prometheus metrics server on given address
pub fn start_metrics_server(addr: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: std::net::SocketAddr = addr.parse()?;

    PrometheusBuilder::new().with_http_listener(addr).install()?;

    init_metrics();

    Ok(())
}

pub struct Metrics;

impl Metrics {
    #[inline]
    pub fn record_request(backend: &str, method: &str, status: u16, duration: Duration) {
        let labels = [
            ("backend", backend.to_string()),
            ("method", method.to_string()),
            ("status", status.to_string()),
        ];

        counter!("proxy_requests_total", &labels).increment(1);
        histogram!("proxy_request_duration_seconds", &labels).record(duration.as_secs_f64());
    }

    #[inline]
    pub fn record_dispatch_failure(backend: &str) {
        counter!("proxy_dispatch_failures_total", "backend" => backend.to_string()).increment(1);
    }

    #[inline]
    pub fn record_unavailable(reason: &'static str) {
        counter!("proxy_unavailable_total", "reason" => reason).increment(1);
    }

    #[inline]
    pub fn set_backend_health(backend: &str, alive: bool) {
        gauge!("backend_health", "backend" => backend.to_string()).set(if alive { 1.0 } else { 0.0 });
    }

    #[inline]
    pub fn set_active_connections(backend: &str, count: usize) {
        gauge!("backend_active_connections", "backend" => backend.to_string()).set(count as f64);
    }

    #[inline]
    pub fn record_health_round(skipped: bool) {
        let outcome = if skipped { "skipped" } else { "completed" };
        counter!("health_rounds_total", "outcome" => outcome).increment(1);
    }
}
