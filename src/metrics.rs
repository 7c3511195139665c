#![forbid(unsafe_code)]

// Request tracking and run summary for the load test

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::info;
use uuid::Uuid;

/// Outstanding requests of one client plus acknowledgment round-trip samples.
///
/// Shared between the client (which registers requests) and its event
/// listener task (which acknowledges them).
#[derive(Debug, Default)]
pub struct RequestTracker {
    outstanding: Mutex<HashMap<Uuid, Instant>>,
    ack_latencies_ms: Mutex<Vec<u64>>,
    acknowledged: AtomicU64,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, request_id: Uuid) {
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request_id, Instant::now());
    }

    /// Removes `request_id` and records its round trip. Unknown ids return `None`.
    pub fn acknowledge(&self, request_id: &Uuid) -> Option<Duration> {
        let sent_at = self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(request_id)?;
        let elapsed = sent_at.elapsed();
        self.acknowledged.fetch_add(1, Ordering::Relaxed);
        self.ack_latencies_ms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(elapsed.as_millis() as u64);
        Some(elapsed)
    }

    pub fn is_outstanding(&self, request_id: &Uuid) -> bool {
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(request_id)
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn acknowledged_count(&self) -> u64 {
        self.acknowledged.load(Ordering::Relaxed)
    }

    pub fn latency_samples(&self) -> Vec<u64> {
        self.ack_latencies_ms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Latency statistics over acknowledgment round trips
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyStats {
    pub count: usize,
    pub min_ms: u64,
    pub max_ms: u64,
    pub avg_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

impl LatencyStats {
    pub fn from_samples(mut samples: Vec<u64>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_unstable();
        let count = samples.len();
        Self {
            count,
            min_ms: samples[0],
            max_ms: samples[count - 1],
            avg_ms: samples.iter().sum::<u64>() / count as u64,
            p50_ms: percentile(&samples, 0.50),
            p95_ms: percentile(&samples, 0.95),
            p99_ms: percentile(&samples, 0.99),
        }
    }
}

/// Final outcome of a load test run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub clients_requested: usize,
    pub clients_connected: usize,
    pub failed_connections: usize,
    pub rounds: u64,
    pub total_messages_sent: u64,
    pub failed_sends: u64,
    pub acknowledged: u64,
    /// Requests still unacknowledged when their client was torn down
    pub abandoned_requests: u64,
    pub ack_latency: LatencyStats,
}

impl RunSummary {
    pub fn log(&self) {
        info!("=== Load Test Summary ===");
        info!(
            "Clients: {} connected / {} requested ({} failed)",
            self.clients_connected, self.clients_requested, self.failed_connections
        );
        info!("Rounds: {}", self.rounds);
        info!(
            "Messages sent: {} ({} failed sends)",
            self.total_messages_sent, self.failed_sends
        );
        info!(
            "Acknowledged: {} ({} abandoned at shutdown)",
            self.acknowledged, self.abandoned_requests
        );
        if self.ack_latency.count > 0 {
            let l = &self.ack_latency;
            info!(
                "Ack latency: avg={}ms p50={}ms p95={}ms p99={}ms min={}ms max={}ms (n={})",
                l.avg_ms, l.p50_ms, l.p95_ms, l.p99_ms, l.min_ms, l.max_ms, l.count
            );
        }
        info!("=========================");
    }
}

fn percentile(sorted_data: &[u64], p: f64) -> u64 {
    if sorted_data.is_empty() {
        return 0;
    }
    let idx = (p * (sorted_data.len() - 1) as f64).round() as usize;
    sorted_data[idx.min(sorted_data.len() - 1)]
}
