//! Prometheus-compatible metrics endpoint
//!
//! Exposes sync-layer counters in Prometheus format.
//! Default endpoint: http://localhost:<NETSYNC_METRICS_PORT>/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;

/// Samples kept for interval percentiles
const INTERVAL_WINDOW: usize = 512;

/// Metrics registry for a sync client
#[derive(Debug)]
pub struct Metrics {
    // Traffic
    pub messages_received: AtomicU64,
    pub messages_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,

    // Decode failures
    pub malformed_envelopes: AtomicU64,
    pub payload_failures: AtomicU64,
    pub unrecognized_types: AtomicU64,

    // Buffers
    pub samples_buffered: AtomicU64,
    pub inbox_drops: AtomicU64,
    pub entities_tracked: AtomicU64,

    // Gap between consecutive samples of the same entity (milliseconds)
    pub sample_interval_p95_ms: AtomicU64,
    pub sample_interval_max_ms: AtomicU64,

    start_time: Instant,

    interval_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            malformed_envelopes: AtomicU64::new(0),
            payload_failures: AtomicU64::new(0),
            unrecognized_types: AtomicU64::new(0),
            samples_buffered: AtomicU64::new(0),
            inbox_drops: AtomicU64::new(0),
            entities_tracked: AtomicU64::new(0),
            sample_interval_p95_ms: AtomicU64::new(0),
            sample_interval_max_ms: AtomicU64::new(0),
            start_time: Instant::now(),
            interval_history: RwLock::new(VecDeque::with_capacity(INTERVAL_WINDOW)),
        }
    }

    pub fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record the gap between two samples of one entity and update percentiles
    pub fn record_sample_interval(&self, interval_ms: u64) {
        let mut history = self.interval_history.write();
        history.push_back(interval_ms);
        while history.len() > INTERVAL_WINDOW {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            self.sample_interval_p95_ms
                .store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.sample_interval_max_ms
                .store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

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

        metric!("netsync_messages_received_total", "Messages handed to the dispatcher", "counter",
            self.messages_received.load(Ordering::Relaxed));
        metric!("netsync_messages_sent_total", "Messages encoded for the transport", "counter",
            self.messages_sent.load(Ordering::Relaxed));
        metric!("netsync_bytes_received_total", "Total bytes received", "counter",
            self.bytes_received.load(Ordering::Relaxed));
        metric!("netsync_bytes_sent_total", "Total bytes sent", "counter",
            self.bytes_sent.load(Ordering::Relaxed));

        metric!("netsync_malformed_envelopes_total", "Messages dropped for a corrupt envelope", "counter",
            self.malformed_envelopes.load(Ordering::Relaxed));
        metric!("netsync_payload_failures_total", "Payloads that failed to parse", "counter",
            self.payload_failures.load(Ordering::Relaxed));
        metric!("netsync_unrecognized_types_total", "Messages with an unknown type code", "counter",
            self.unrecognized_types.load(Ordering::Relaxed));

        metric!("netsync_samples_buffered_total", "Pose samples pushed into entity buffers", "counter",
            self.samples_buffered.load(Ordering::Relaxed));
        metric!("netsync_inbox_drops_total", "Messages dropped by a full inbox", "counter",
            self.inbox_drops.load(Ordering::Relaxed));
        metric!("netsync_entities_tracked", "Networked entities in the registry", "gauge",
            self.entities_tracked.load(Ordering::Relaxed));

        metric!("netsync_sample_interval_p95_milliseconds", "95th percentile gap between samples", "gauge",
            self.sample_interval_p95_ms.load(Ordering::Relaxed));
        metric!("netsync_sample_interval_max_milliseconds", "Largest recent gap between samples", "gauge",
            self.sample_interval_max_ms.load(Ordering::Relaxed));
        metric!("netsync_uptime_seconds", "Uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// Generate JSON format metrics
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "network": {
                "messages_received": self.messages_received.load(Ordering::Relaxed),
                "messages_sent": self.messages_sent.load(Ordering::Relaxed),
                "bytes_received": self.bytes_received.load(Ordering::Relaxed),
                "bytes_sent": self.bytes_sent.load(Ordering::Relaxed),
            },
            "errors": {
                "malformed_envelopes": self.malformed_envelopes.load(Ordering::Relaxed),
                "payload_failures": self.payload_failures.load(Ordering::Relaxed),
                "unrecognized_types": self.unrecognized_types.load(Ordering::Relaxed),
                "inbox_drops": self.inbox_drops.load(Ordering::Relaxed),
            },
            "sync": {
                "samples_buffered": self.samples_buffered.load(Ordering::Relaxed),
                "entities_tracked": self.entities_tracked.load(Ordering::Relaxed),
                "sample_interval_p95_ms": self.sample_interval_p95_ms.load(Ordering::Relaxed),
                "sample_interval_max_ms": self.sample_interval_max_ms.load(Ordering::Relaxed),
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

#[cfg(feature = "metrics_server")]
pub use server::{serve_metrics, start_metrics_server};

#[cfg(feature = "metrics_server")]
mod server {
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tracing::{debug, info};

    use super::Metrics;

    /// Bind the metrics port and serve until the task is dropped
    pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
        let addr = format!("0.0.0.0:{}", port);
        let listener = TcpListener::bind(&addr).await?;

        info!("Metrics server listening on http://{}/metrics", addr);
        serve_metrics(listener, metrics).await
    }

    /// Accept loop over an already bound listener
    pub async fn serve_metrics(listener: TcpListener, metrics: Arc<Metrics>) -> anyhow::Result<()> {
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

    fn route(request: &str, metrics: &Metrics) -> String {
        let (content_type, body) = if request.starts_with("GET /metrics/json ")
            || request.starts_with("GET /json ")
        {
            ("application/json", metrics.to_json())
        } else if request.starts_with("GET /metrics ") {
            ("text/plain; version=0.0.4", metrics.to_prometheus())
        } else if request.starts_with("GET /health ") || request.starts_with("GET / ") {
            ("text/plain", "OK".to_string())
        } else {
            return "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string();
        };
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            content_type,
            body.len(),
            body
        )
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::sync::atomic::Ordering;
        use tokio::net::TcpStream;

        async fn fetch(port: u16, path: &str) -> String {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            stream
                .write_all(format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path).as_bytes())
                .await
                .unwrap();
            let mut response = String::new();
            stream.read_to_string(&mut response).await.unwrap();
            response
        }

        #[tokio::test]
        async fn test_serves_prometheus_and_json() {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            let metrics = Arc::new(Metrics::new());
            metrics.messages_received.store(7, Ordering::Relaxed);

            let server = tokio::spawn(serve_metrics(listener, metrics.clone()));

            let text = fetch(port, "/metrics").await;
            assert!(text.starts_with("HTTP/1.1 200 OK"));
            assert!(text.contains("netsync_messages_received_total 7"));

            let json = fetch(port, "/metrics/json").await;
            assert!(json.contains("application/json"));
            assert!(json.contains("\"messages_received\":7"));

            let missing = fetch(port, "/nope").await;
            assert!(missing.starts_with("HTTP/1.1 404"));

            server.abort();
        }
    }
}
