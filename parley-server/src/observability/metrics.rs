//! Metrics collection for parley
//!
//! Process-global counters for relay health, exported in Prometheus text
//! format by the HTTP endpoint.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

/// Point-in-time gauge values collected on each metrics request
#[derive(Debug, Default)]
pub struct GaugeSnapshot {
    /// Number of sessions currently in the registry
    pub active_sessions: u64,
    /// Process resident set size in bytes (Linux only)
    pub process_memory_bytes: Option<u64>,
    /// Number of open file descriptors (Linux only)
    pub process_open_fds: Option<u64>,
}

impl GaugeSnapshot {
    /// Collect gauge values from /proc on Linux
    #[cfg(target_os = "linux")]
    pub fn collect_process_metrics(&mut self) {
        if let Ok(content) = std::fs::read_to_string("/proc/self/statm") {
            let parts: Vec<&str> = content.split_whitespace().collect();
            if parts.len() >= 2 {
                // Second field is RSS in pages (assuming 4KB pages)
                if let Ok(pages) = parts[1].parse::<u64>() {
                    self.process_memory_bytes = Some(pages * 4096);
                }
            }
        }

        if let Ok(entries) = std::fs::read_dir("/proc/self/fd") {
            self.process_open_fds = Some(entries.count() as u64);
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub fn collect_process_metrics(&mut self) {}
}

/// Global metrics collector
pub struct Metrics {
    /// Connections accepted by the chat listener
    pub connections_accepted_total: AtomicU64,
    /// Failed accept calls
    pub accept_errors_total: AtomicU64,
    /// Join events processed by the registry
    pub sessions_joined_total: AtomicU64,
    /// Leave events that removed a session
    pub sessions_left_total: AtomicU64,
    /// Broadcast events processed by the registry
    pub broadcasts_total: AtomicU64,
    /// Lines enqueued on recipient outboxes
    pub deliveries_total: AtomicU64,
    /// Sessions disconnected by their idle watchdog
    pub idle_evictions_total: AtomicU64,
    /// Writer tasks that stopped on an I/O error
    pub write_failures_total: AtomicU64,
    /// Completed echo exchanges
    pub echo_exchanges_total: AtomicU64,
    /// Current registry membership size
    pub active_sessions: AtomicU64,
    /// Session terminations by reason
    pub disconnects_by_reason: DashMap<&'static str, AtomicU64>,
}

impl Metrics {
    /// Get the global metrics instance
    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<Metrics> = OnceLock::new();
        INSTANCE.get_or_init(Self::new)
    }

    fn new() -> Self {
        Self {
            connections_accepted_total: AtomicU64::new(0),
            accept_errors_total: AtomicU64::new(0),
            sessions_joined_total: AtomicU64::new(0),
            sessions_left_total: AtomicU64::new(0),
            broadcasts_total: AtomicU64::new(0),
            deliveries_total: AtomicU64::new(0),
            idle_evictions_total: AtomicU64::new(0),
            write_failures_total: AtomicU64::new(0),
            echo_exchanges_total: AtomicU64::new(0),
            active_sessions: AtomicU64::new(0),
            disconnects_by_reason: DashMap::new(),
        }
    }

    pub fn record_accept(&self) {
        self.connections_accepted_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accept_error(&self) {
        self.accept_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a join along with the resulting membership size
    pub fn record_join(&self, active: usize) {
        self.sessions_joined_total.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.store(active as u64, Ordering::Relaxed);
    }

    /// Record a leave along with the resulting membership size
    pub fn record_leave(&self, active: usize) {
        self.sessions_left_total.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.store(active as u64, Ordering::Relaxed);
    }

    /// Record one broadcast and how many outboxes it reached
    pub fn record_broadcast(&self, delivered: usize) {
        self.broadcasts_total.fetch_add(1, Ordering::Relaxed);
        self.deliveries_total.fetch_add(delivered as u64, Ordering::Relaxed);
    }

    pub fn record_idle_eviction(&self) {
        self.idle_evictions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        self.write_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_echo_exchange(&self) {
        self.echo_exchanges_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record why a session ended
    pub fn record_disconnect(&self, reason: &'static str) {
        self.disconnects_by_reason
            .entry(reason)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot gauges that are maintained by the registry
    pub fn gauges(&self) -> GaugeSnapshot {
        GaugeSnapshot {
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            ..Default::default()
        }
    }

    /// Export metrics in Prometheus text format
    pub fn to_prometheus(&self, gauges: &GaugeSnapshot) -> String {
        use std::fmt::Write;

        let mut output = String::with_capacity(2048);

        macro_rules! counter {
            ($name:expr, $help:expr, $value:expr) => {
                let _ = writeln!(output, "# HELP {} {}", $name, $help);
                let _ = writeln!(output, "# TYPE {} counter", $name);
                let _ = writeln!(output, "{} {}", $name, $value.load(Ordering::Relaxed));
            };
        }

        macro_rules! gauge {
            ($name:expr, $help:expr, $value:expr) => {
                let _ = writeln!(output, "# HELP {} {}", $name, $help);
                let _ = writeln!(output, "# TYPE {} gauge", $name);
                let _ = writeln!(output, "{} {}", $name, $value);
            };
        }

        // === Counters ===

        counter!(
            "parley_connections_accepted_total",
            "Total connections accepted by the chat listener",
            self.connections_accepted_total
        );
        counter!(
            "parley_accept_errors_total",
            "Total failed accept calls",
            self.accept_errors_total
        );
        counter!(
            "parley_sessions_joined_total",
            "Total sessions registered",
            self.sessions_joined_total
        );
        counter!(
            "parley_sessions_left_total",
            "Total sessions removed from the registry",
            self.sessions_left_total
        );
        counter!(
            "parley_broadcasts_total",
            "Total broadcast events processed",
            self.broadcasts_total
        );
        counter!(
            "parley_deliveries_total",
            "Total lines enqueued on recipient outboxes",
            self.deliveries_total
        );
        counter!(
            "parley_idle_evictions_total",
            "Total sessions disconnected for inactivity",
            self.idle_evictions_total
        );
        counter!(
            "parley_write_failures_total",
            "Total writer tasks stopped by an I/O error",
            self.write_failures_total
        );
        counter!(
            "parley_echo_exchanges_total",
            "Total completed echo exchanges",
            self.echo_exchanges_total
        );

        if !self.disconnects_by_reason.is_empty() {
            let _ = writeln!(
                output,
                "# HELP parley_disconnects_total Session terminations by reason"
            );
            let _ = writeln!(output, "# TYPE parley_disconnects_total counter");
            for entry in self.disconnects_by_reason.iter() {
                let _ = writeln!(
                    output,
                    "parley_disconnects_total{{reason=\"{}\"}} {}",
                    entry.key(),
                    entry.value().load(Ordering::Relaxed)
                );
            }
        }

        // === Gauges ===

        gauge!(
            "parley_active_sessions",
            "Sessions currently registered",
            gauges.active_sessions
        );
        if let Some(bytes) = gauges.process_memory_bytes {
            gauge!(
                "parley_process_memory_bytes",
                "Resident memory of the server process",
                bytes
            );
        }
        if let Some(fds) = gauges.process_open_fds {
            gauge!(
                "parley_process_open_fds",
                "Open file descriptors of the server process",
                fds
            );
        }

        output
    }
}
