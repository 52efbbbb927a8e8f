//! Prometheus-compatible metrics endpoint
//!
//! Exposes visibility scheduler metrics in Prometheus format.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::visibility::scheduler::TickReport;

/// Samples kept for tick-time percentiles
const TICK_HISTORY: usize = 1000;

/// Metrics registry for the visibility server
#[derive(Debug)]
pub struct Metrics {
    // Population
    pub observers: AtomicU64,
    pub observables: AtomicU64,
    pub visible_pairs: AtomicU64,
    pub terrain_shapes: AtomicU64,

    // Per-tick work (last tick)
    pub pairs_evaluated: AtomicU64,
    pub ray_casts: AtomicU64,

    // Totals
    pub pairs_evaluated_total: AtomicU64,
    pub ray_casts_total: AtomicU64,
    pub occlusion_failures_total: AtomicU64,
    pub transitions_total: AtomicU64,

    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub budget_usage_percent: AtomicU64,

    pub tick_count: AtomicU64,

    start_time: Instant,

    // Rolling tick times for percentile calculation
    tick_history: RwLock<VecDeque<u64>>,

    // Ray segments of the most recent debug snapshot (JSON)
    debug_rays: RwLock<String>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            observers: AtomicU64::new(0),
            observables: AtomicU64::new(0),
            visible_pairs: AtomicU64::new(0),
            terrain_shapes: AtomicU64::new(0),
            pairs_evaluated: AtomicU64::new(0),
            ray_casts: AtomicU64::new(0),
            pairs_evaluated_total: AtomicU64::new(0),
            ray_casts_total: AtomicU64::new(0),
            occlusion_failures_total: AtomicU64::new(0),
            transitions_total: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            budget_usage_percent: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(TICK_HISTORY)),
            debug_rays: RwLock::new(String::from("{}")),
        }
    }

    /// Record a scheduler tick against its time budget
    pub fn record_tick(&self, report: &TickReport, budget: Duration) {
        self.observers.store(report.observers as u64, Ordering::Relaxed);
        self.observables.store(report.observables as u64, Ordering::Relaxed);
        self.terrain_shapes.store(report.terrain_shapes as u64, Ordering::Relaxed);
        self.pairs_evaluated.store(report.pairs_evaluated, Ordering::Relaxed);
        self.ray_casts.store(report.ray_casts, Ordering::Relaxed);

        self.pairs_evaluated_total.fetch_add(report.pairs_evaluated, Ordering::Relaxed);
        self.ray_casts_total.fetch_add(report.ray_casts, Ordering::Relaxed);
        self.occlusion_failures_total.fetch_add(report.occlusion_failures, Ordering::Relaxed);
        self.transitions_total.fetch_add(report.transitions, Ordering::Relaxed);

        let budget_us = budget.as_micros().max(1) as u64;
        let used_us = report.duration.as_micros() as u64;
        self.budget_usage_percent.store(used_us * 100 / budget_us, Ordering::Relaxed);

        self.record_tick_time(report.duration);
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > TICK_HISTORY {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.tick_time_p95_us.store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_p99_us.store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us.store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    pub fn set_debug_rays(&self, json: String) {
        *self.debug_rays.write() = json;
    }

    pub fn debug_rays(&self) -> String {
        self.debug_rays.read().clone()
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        // Population
        metric!("aoi_visibility_observers", "Registered observers", "gauge",
            self.observers.load(Ordering::Relaxed));
        metric!("aoi_visibility_observables", "Registered observables", "gauge",
            self.observables.load(Ordering::Relaxed));
        metric!("aoi_visibility_visible_pairs", "Observer/observable pairs currently visible", "gauge",
            self.visible_pairs.load(Ordering::Relaxed));
        metric!("aoi_visibility_terrain_shapes", "Cached static terrain shapes", "gauge",
            self.terrain_shapes.load(Ordering::Relaxed));

        // Work
        metric!("aoi_visibility_pairs_evaluated", "Pairs evaluated in the last tick", "gauge",
            self.pairs_evaluated.load(Ordering::Relaxed));
        metric!("aoi_visibility_ray_casts", "Occlusion rays cast in the last tick", "gauge",
            self.ray_casts.load(Ordering::Relaxed));
        metric!("aoi_visibility_pairs_evaluated_total", "Total pairs evaluated", "counter",
            self.pairs_evaluated_total.load(Ordering::Relaxed));
        metric!("aoi_visibility_ray_casts_total", "Total occlusion rays cast", "counter",
            self.ray_casts_total.load(Ordering::Relaxed));
        metric!("aoi_visibility_occlusion_failures_total", "Casts that failed closed", "counter",
            self.occlusion_failures_total.load(Ordering::Relaxed));
        metric!("aoi_visibility_transitions_total", "Visibility transitions published", "counter",
            self.transitions_total.load(Ordering::Relaxed));

        // Performance
        metric!("aoi_visibility_tick_time_microseconds", "Current tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("aoi_visibility_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("aoi_visibility_tick_time_p99_microseconds", "99th percentile tick time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("aoi_visibility_tick_time_max_microseconds", "Maximum tick time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("aoi_visibility_budget_usage_percent", "Tick budget usage percentage", "gauge",
            self.budget_usage_percent.load(Ordering::Relaxed));
        metric!("aoi_visibility_tick_count", "Total ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));
        metric!("aoi_visibility_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// Generate JSON format metrics
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "population": {
                "observers": self.observers.load(Ordering::Relaxed),
                "observables": self.observables.load(Ordering::Relaxed),
                "visible_pairs": self.visible_pairs.load(Ordering::Relaxed),
                "terrain_shapes": self.terrain_shapes.load(Ordering::Relaxed),
            },
            "work": {
                "pairs_evaluated": self.pairs_evaluated.load(Ordering::Relaxed),
                "ray_casts": self.ray_casts.load(Ordering::Relaxed),
                "pairs_evaluated_total": self.pairs_evaluated_total.load(Ordering::Relaxed),
                "ray_casts_total": self.ray_casts_total.load(Ordering::Relaxed),
                "occlusion_failures_total": self.occlusion_failures_total.load(Ordering::Relaxed),
                "transitions_total": self.transitions_total.load(Ordering::Relaxed),
            },
            "performance": {
                "tick_time_us": self.tick_time_us.load(Ordering::Relaxed),
                "tick_time_p95_us": self.tick_time_p95_us.load(Ordering::Relaxed),
                "tick_time_p99_us": self.tick_time_p99_us.load(Ordering::Relaxed),
                "tick_time_max_us": self.tick_time_max_us.load(Ordering::Relaxed),
                "budget_percent": self.budget_usage_percent.load(Ordering::Relaxed),
                "tick_count": self.tick_count.load(Ordering::Relaxed),
            },
            "uptime_seconds": self.uptime_seconds(),
        })
        .to_string()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn http_response(content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    )
}

/// Build the HTTP response for a raw request
fn route(request: &str, metrics: &Metrics) -> String {
    let path = request
        .lines()
        .next()
        .and_then(|line| line.strip_prefix("GET "))
        .and_then(|rest| rest.split_whitespace().next());

    match path {
        Some("/metrics") => http_response("text/plain; version=0.0.4", &metrics.to_prometheus()),
        Some("/metrics/json") | Some("/json") => http_response("application/json", &metrics.to_json()),
        Some("/debug/rays") => http_response("application/json", &metrics.debug_rays()),
        Some("/health") | Some("/") => http_response("text/plain", "OK"),
        _ => "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string(),
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);
                    let response = route(&request, &metrics);
                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> TickReport {
        TickReport {
            frame: 3,
            pairs_evaluated: 120,
            ray_casts: 7,
            occlusion_failures: 1,
            transitions: 4,
            frequency_changes: 0,
            observers: 2,
            observables: 60,
            terrain_shapes: 5,
            duration: Duration::from_micros(500),
        }
    }

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.observers.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_tick_time() {
        let metrics = Metrics::new();
        for i in 0..100 {
            metrics.record_tick_time(Duration::from_micros(100 + i * 10));
        }

        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 100);
        assert!(metrics.tick_time_p95_us.load(Ordering::Relaxed) > 0);
        assert!(metrics.tick_time_p99_us.load(Ordering::Relaxed) >= metrics.tick_time_p95_us.load(Ordering::Relaxed));
        assert_eq!(metrics.tick_time_max_us.load(Ordering::Relaxed), 1090);
    }

    #[test]
    fn test_record_tick_accumulates() {
        let metrics = Metrics::new();
        metrics.record_tick(&report(), Duration::from_millis(1));
        metrics.record_tick(&report(), Duration::from_millis(1));

        assert_eq!(metrics.ray_casts.load(Ordering::Relaxed), 7);
        assert_eq!(metrics.ray_casts_total.load(Ordering::Relaxed), 14);
        assert_eq!(metrics.occlusion_failures_total.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.transitions_total.load(Ordering::Relaxed), 8);
        assert_eq!(metrics.observables.load(Ordering::Relaxed), 60);
        assert_eq!(metrics.budget_usage_percent.load(Ordering::Relaxed), 50);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.record_tick(&report(), Duration::from_millis(33));
        metrics.visible_pairs.store(9, Ordering::Relaxed);

        let output = metrics.to_prometheus();

        assert!(output.contains("aoi_visibility_observers 2"));
        assert!(output.contains("aoi_visibility_visible_pairs 9"));
        assert!(output.contains("aoi_visibility_ray_casts_total 7"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE aoi_visibility_transitions_total counter"));
    }

    #[test]
    fn test_json_format() {
        let metrics = Metrics::new();
        metrics.record_tick(&report(), Duration::from_millis(33));

        let value: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(value["population"]["observables"], 60);
        assert_eq!(value["work"]["pairs_evaluated"], 120);
        assert!(value["performance"].is_object());
    }

    #[test]
    fn test_routes() {
        let metrics = Metrics::new();
        metrics.set_debug_rays(r#"{"frame":1}"#.to_string());

        let prometheus = route("GET /metrics HTTP/1.1\r\n\r\n", &metrics);
        assert!(prometheus.contains("text/plain; version=0.0.4"));

        let json = route("GET /metrics/json HTTP/1.1\r\n\r\n", &metrics);
        assert!(json.contains("application/json"));
        assert!(json.contains("\"population\""));

        let rays = route("GET /debug/rays HTTP/1.1\r\n\r\n", &metrics);
        assert!(rays.ends_with(r#"{"frame":1}"#));

        assert!(route("GET /health HTTP/1.1\r\n\r\n", &metrics).ends_with("OK"));
        assert!(route("GET /nope HTTP/1.1\r\n\r\n", &metrics).starts_with("HTTP/1.1 404"));
        assert!(route("POST /metrics HTTP/1.1\r\n\r\n", &metrics).starts_with("HTTP/1.1 404"));
    }
}
