//! Client reception metrics
//!
//! Counters are updated from the tick loop and the receive task; the optional
//! HTTP endpoint renders them in Prometheus text format or JSON.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::client::{FrameDisposition, FrameReport};

/// Decode durations kept for percentiles
const DECODE_WINDOW: usize = 1000;

#[derive(Debug)]
pub struct ClientMetrics {
    // Frames
    pub frames_received: AtomicU64,
    pub frames_applied: AtomicU64,
    pub frames_duplicate: AtomicU64,
    pub frames_premature: AtomicU64,
    pub desyncs: AtomicU64,

    // Deltas
    pub deltas_applied: AtomicU64,
    pub deltas_skipped: AtomicU64,
    pub resends_received: AtomicU64,
    pub soft_failures: AtomicU64,

    // Network
    pub acks_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub packets_dropped: AtomicU64,

    // World
    pub client_mobjs: AtomicU64,

    // Frame decode+apply time (microseconds)
    pub decode_time_us: AtomicU64,
    pub decode_time_p95_us: AtomicU64,
    pub decode_time_max_us: AtomicU64,

    start_time: Instant,
    decode_history: RwLock<VecDeque<u64>>,
}

impl ClientMetrics {
    pub fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            frames_applied: AtomicU64::new(0),
            frames_duplicate: AtomicU64::new(0),
            frames_premature: AtomicU64::new(0),
            desyncs: AtomicU64::new(0),
            deltas_applied: AtomicU64::new(0),
            deltas_skipped: AtomicU64::new(0),
            resends_received: AtomicU64::new(0),
            soft_failures: AtomicU64::new(0),
            acks_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            client_mobjs: AtomicU64::new(0),
            decode_time_us: AtomicU64::new(0),
            decode_time_p95_us: AtomicU64::new(0),
            decode_time_max_us: AtomicU64::new(0),
            start_time: Instant::now(),
            decode_history: RwLock::new(VecDeque::with_capacity(DECODE_WINDOW)),
        }
    }

    /// Count one processed frame packet
    pub fn record_frame(&self, report: &FrameReport) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        let counter = match report.disposition {
            FrameDisposition::Applied => &self.frames_applied,
            FrameDisposition::Duplicate => &self.frames_duplicate,
            FrameDisposition::Premature => &self.frames_premature,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        self.deltas_applied
            .fetch_add(report.applied as u64, Ordering::Relaxed);
        self.deltas_skipped
            .fetch_add(report.skipped as u64, Ordering::Relaxed);
        self.resends_received
            .fetch_add(report.resends as u64, Ordering::Relaxed);
        self.soft_failures
            .fetch_add(report.soft_failures as u64, Ordering::Relaxed);
    }

    pub fn record_desync(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.desyncs.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how long decoding and applying a frame took
    pub fn record_decode_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.decode_time_us.store(us, Ordering::Relaxed);

        let mut history = self.decode_history.write();
        history.push_back(us);
        while history.len() > DECODE_WINDOW {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();
            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            self.decode_time_p95_us
                .store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.decode_time_max_us
                .store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn load(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Prometheus text format
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

        metric!("frame_sync_frames_received_total", "Frame packets received", "counter",
            Self::load(&self.frames_received));
        metric!("frame_sync_frames_applied_total", "Frame packets applied", "counter",
            Self::load(&self.frames_applied));
        metric!("frame_sync_frames_duplicate_total", "Duplicate frames re-acknowledged", "counter",
            Self::load(&self.frames_duplicate));
        metric!("frame_sync_frames_premature_total", "Frames before the first frame", "counter",
            Self::load(&self.frames_premature));
        metric!("frame_sync_desyncs_total", "Fatal protocol desyncs", "counter",
            Self::load(&self.desyncs));

        metric!("frame_sync_deltas_applied_total", "Delta records applied", "counter",
            Self::load(&self.deltas_applied));
        metric!("frame_sync_deltas_skipped_total", "Resent delta records already seen", "counter",
            Self::load(&self.deltas_skipped));
        metric!("frame_sync_resends_received_total", "Resent delta records received", "counter",
            Self::load(&self.resends_received));
        metric!("frame_sync_soft_failures_total", "Deltas referencing unknown objects", "counter",
            Self::load(&self.soft_failures));

        metric!("frame_sync_acks_sent_total", "Acknowledgments sent", "counter",
            Self::load(&self.acks_sent));
        metric!("frame_sync_bytes_received_total", "Datagram bytes received", "counter",
            Self::load(&self.bytes_received));
        metric!("frame_sync_packets_dropped_total", "Packets dropped on a full queue", "counter",
            Self::load(&self.packets_dropped));

        metric!("frame_sync_client_mobjs", "Live client mobjs", "gauge",
            Self::load(&self.client_mobjs));
        metric!("frame_sync_decode_time_microseconds", "Last frame decode time", "gauge",
            Self::load(&self.decode_time_us));
        metric!("frame_sync_decode_time_p95_microseconds", "p95 frame decode time", "gauge",
            Self::load(&self.decode_time_p95_us));
        metric!("frame_sync_decode_time_max_microseconds", "Maximum frame decode time", "gauge",
            Self::load(&self.decode_time_max_us));
        metric!("frame_sync_uptime_seconds", "Client uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// JSON snapshot
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "frames": {
                "received": Self::load(&self.frames_received),
                "applied": Self::load(&self.frames_applied),
                "duplicate": Self::load(&self.frames_duplicate),
                "premature": Self::load(&self.frames_premature),
                "desyncs": Self::load(&self.desyncs),
            },
            "deltas": {
                "applied": Self::load(&self.deltas_applied),
                "skipped": Self::load(&self.deltas_skipped),
                "resends": Self::load(&self.resends_received),
                "soft_failures": Self::load(&self.soft_failures),
            },
            "network": {
                "acks_sent": Self::load(&self.acks_sent),
                "bytes_received": Self::load(&self.bytes_received),
                "packets_dropped": Self::load(&self.packets_dropped),
            },
            "world": {
                "client_mobjs": Self::load(&self.client_mobjs),
            },
            "performance": {
                "decode_time_us": Self::load(&self.decode_time_us),
                "decode_time_p95_us": Self::load(&self.decode_time_p95_us),
                "decode_time_max_us": Self::load(&self.decode_time_max_us),
                "uptime_seconds": self.uptime_seconds(),
            },
        })
        .to_string()
    }
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serve `/metrics`, `/metrics/json` and `/health`
#[cfg(feature = "metrics_server")]
pub async fn start_metrics_server(
    metrics: std::sync::Arc<ClientMetrics>,
    port: u16,
) -> anyhow::Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tracing::{debug, info};

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
                    let response = http_response(&metrics, &request);
                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => debug!("Failed to read from metrics socket {}: {}", peer, e),
            }
        });
    }
}

#[cfg_attr(not(feature = "metrics_server"), allow(dead_code))]
fn http_response(metrics: &ClientMetrics, request: &str) -> String {
    let ok = |content_type: &str, body: String| {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            content_type,
            body.len(),
            body
        )
    };

    // Longest prefix first
    if request.starts_with("GET /metrics/json") {
        ok("application/json", metrics.to_json())
    } else if request.starts_with("GET /metrics") {
        ok("text/plain; version=0.0.4", metrics.to_prometheus())
    } else if request.starts_with("GET /health") {
        ok("text/plain", "OK".to_string())
    } else {
        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
    }
}
