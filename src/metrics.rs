//! Server counters and gauges, exposed in Prometheus text format
//!
//! `GET /metrics` on the metrics port returns the exposition, `GET /health`
//! returns `OK`.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

const TICK_WINDOW: usize = 512;
const PREFIX: &str = "arena_server";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Counter,
    Gauge,
}

impl Kind {
    fn as_str(self) -> &'static str {
        match self {
            Kind::Counter => "counter",
            Kind::Gauge => "gauge",
        }
    }
}

/// Fixed-size window of recent tick durations
#[derive(Debug)]
struct TickWindow {
    samples: Vec<u64>,
    next: usize,
}

impl TickWindow {
    fn push(&mut self, us: u64) {
        if self.samples.len() < TICK_WINDOW {
            self.samples.push(us);
        } else {
            self.samples[self.next] = us;
        }
        self.next = (self.next + 1) % TICK_WINDOW;
    }

    /// (p95, p99, max) over the window
    fn summary(&self) -> Option<(u64, u64, u64)> {
        if self.samples.len() < 10 {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let rank = |q: f64| sorted[((sorted.len() as f64 * q) as usize).min(sorted.len() - 1)];
        Some((rank(0.95), rank(0.99), sorted[sorted.len() - 1]))
    }
}

/// Process-wide metrics shared by rooms, transport and scheduler
#[derive(Debug)]
pub struct Metrics {
    pub players_active: AtomicU64,
    pub rooms_open: AtomicU64,

    // microseconds
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,

    pub connections_active: AtomicU64,
    pub frames_received: AtomicU64,
    pub frames_sent: AtomicU64,

    pub datagrams_received: AtomicU64,
    pub datagrams_sent: AtomicU64,
    pub datagrams_dropped: AtomicU64,
    pub bytes_received: AtomicU64,

    pub pending_acks: AtomicU64,
    pub acks_received: AtomicU64,
    pub resends: AtomicU64,
    pub duplicates_suppressed: AtomicU64,

    pub anticheat_drops: AtomicU64,
    pub kills: AtomicU64,
    pub games_over: AtomicU64,

    started: Instant,
    window: Mutex<TickWindow>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            players_active: AtomicU64::default(),
            rooms_open: AtomicU64::default(),
            tick_time_us: AtomicU64::default(),
            tick_time_p95_us: AtomicU64::default(),
            tick_time_p99_us: AtomicU64::default(),
            tick_time_max_us: AtomicU64::default(),
            tick_count: AtomicU64::default(),
            connections_active: AtomicU64::default(),
            frames_received: AtomicU64::default(),
            frames_sent: AtomicU64::default(),
            datagrams_received: AtomicU64::default(),
            datagrams_sent: AtomicU64::default(),
            datagrams_dropped: AtomicU64::default(),
            bytes_received: AtomicU64::default(),
            pending_acks: AtomicU64::default(),
            acks_received: AtomicU64::default(),
            resends: AtomicU64::default(),
            duplicates_suppressed: AtomicU64::default(),
            anticheat_drops: AtomicU64::default(),
            kills: AtomicU64::default(),
            games_over: AtomicU64::default(),
            started: Instant::now(),
            window: Mutex::new(TickWindow {
                samples: Vec::with_capacity(TICK_WINDOW),
                next: 0,
            }),
        }
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn incr(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros().min(u64::MAX as u128) as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut window = self.window.lock();
        window.push(us);
        if let Some((p95, p99, max)) = window.summary() {
            self.tick_time_p95_us.store(p95, Ordering::Relaxed);
            self.tick_time_p99_us.store(p99, Ordering::Relaxed);
            self.tick_time_max_us.store(max, Ordering::Relaxed);
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    fn series(&self) -> [(&'static str, &'static str, Kind, &AtomicU64); 21] {
        use Kind::{Counter, Gauge};
        [
            ("players_active", "Players currently in a room", Gauge, &self.players_active),
            ("rooms_open", "Rooms accepting commands", Gauge, &self.rooms_open),
            ("tick_time_microseconds", "Last tick time", Gauge, &self.tick_time_us),
            ("tick_time_p95_microseconds", "95th percentile tick time", Gauge, &self.tick_time_p95_us),
            ("tick_time_p99_microseconds", "99th percentile tick time", Gauge, &self.tick_time_p99_us),
            ("tick_time_max_microseconds", "Slowest recent tick", Gauge, &self.tick_time_max_us),
            ("ticks_total", "Move ticks processed", Counter, &self.tick_count),
            ("connections_active", "Open ordered-channel connections", Gauge, &self.connections_active),
            ("frames_received_total", "Ordered frames received", Counter, &self.frames_received),
            ("frames_sent_total", "Ordered frames queued", Counter, &self.frames_sent),
            ("datagrams_received_total", "Datagrams received", Counter, &self.datagrams_received),
            ("datagrams_sent_total", "Datagrams sent", Counter, &self.datagrams_sent),
            ("datagrams_dropped_total", "Malformed or unroutable datagrams", Counter, &self.datagrams_dropped),
            ("datagram_bytes_received_total", "Datagram bytes received", Counter, &self.bytes_received),
            ("pending_acks", "Events awaiting acknowledgement", Gauge, &self.pending_acks),
            ("acks_received_total", "Acknowledgements matched", Counter, &self.acks_received),
            ("resends_total", "Events resent", Counter, &self.resends),
            ("duplicates_suppressed_total", "Duplicate events acked but not applied", Counter, &self.duplicates_suppressed),
            ("anticheat_drops_total", "Commands dropped by range checks", Counter, &self.anticheat_drops),
            ("kills_total", "Kills", Counter, &self.kills),
            ("games_over_total", "Game-over events emitted", Counter, &self.games_over),
        ]
    }

    /// Prometheus text exposition
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(4096);
        let mut line = |name: &str, help: &str, kind: Kind, value: u64| {
            let _ = writeln!(out, "# HELP {PREFIX}_{name} {help}");
            let _ = writeln!(out, "# TYPE {PREFIX}_{name} {}", kind.as_str());
            let _ = writeln!(out, "{PREFIX}_{name} {value}");
        };
        for (name, help, kind, value) in self.series() {
            line(name, help, kind, value.load(Ordering::Relaxed));
        }
        line("uptime_seconds", "Seconds since start", Kind::Counter, self.uptime().as_secs());
        out
    }
}

fn respond(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

fn route(metrics: &Metrics, request: &str) -> String {
    let path = request
        .lines()
        .next()
        .and_then(|line| line.strip_prefix("GET "))
        .and_then(|rest| rest.split_whitespace().next());
    match path {
        Some("/metrics") => respond("200 OK", "text/plain; version=0.0.4", &metrics.render()),
        Some("/health") => respond("200 OK", "text/plain", "OK"),
        _ => respond("404 Not Found", "text/plain", ""),
    }
}

/// Serve `/metrics` and `/health` until the listener fails
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Metrics endpoint on http://{}/metrics", listener.local_addr()?);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];
            let n = match socket.read(&mut buffer).await {
                Ok(0) => return,
                Ok(n) => n,
                Err(e) => {
                    debug!("Metrics read from {} failed: {}", peer, e);
                    return;
                }
            };
            let response = route(&metrics, &String::from_utf8_lossy(&buffer[..n]));
            if let Err(e) = socket.write_all(response.as_bytes()).await {
                debug!("Metrics write to {} failed: {}", peer, e);
            }
        });
    }
}
