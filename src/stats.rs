use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-node packet and computation counters.
#[derive(Debug, Default)]
pub struct RouterStats {
    hello_sent: AtomicU64,
    bye_sent: AtomicU64,
    route_received: AtomicU64,
    local_route_sent: AtomicU64,
    data_sent: AtomicU64,
    data_delivered: AtomicU64,
    data_dropped: AtomicU64,
    spf_runs: AtomicU64,
    decode_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub hello_sent: u64,
    pub bye_sent: u64,
    pub route_received: u64,
    pub local_route_sent: u64,
    pub data_sent: u64,
    pub data_delivered: u64,
    pub data_dropped: u64,
    pub spf_runs: u64,
    pub decode_errors: u64,
}

impl RouterStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hello_sent(&self) {
        self.hello_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bye_sent(&self) {
        self.bye_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn route_received(&self) {
        self.route_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn local_route_sent(&self) {
        self.local_route_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn data_sent(&self) {
        self.data_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn data_delivered(&self) {
        self.data_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn data_dropped(&self) {
        self.data_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn spf_run(&self) {
        self.spf_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hello_sent: self.hello_sent.load(Ordering::Relaxed),
            bye_sent: self.bye_sent.load(Ordering::Relaxed),
            route_received: self.route_received.load(Ordering::Relaxed),
            local_route_sent: self.local_route_sent.load(Ordering::Relaxed),
            data_sent: self.data_sent.load(Ordering::Relaxed),
            data_delivered: self.data_delivered.load(Ordering::Relaxed),
            data_dropped: self.data_dropped.load(Ordering::Relaxed),
            spf_runs: self.spf_runs.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = RouterStats::new();
        stats.hello_sent();
        stats.hello_sent();
        stats.data_dropped();
        let snap = stats.snapshot();
        assert_eq!(snap.hello_sent, 2);
        assert_eq!(snap.data_dropped, 1);
        assert_eq!(snap.spf_runs, 0);
    }
}
