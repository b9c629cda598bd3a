//! Process metrics for the status endpoint
//!
//! Counters are injected through `AppState` rather than living as module
//! globals, so tests construct a fresh instance per case.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Running counters surfaced by the health endpoint.
#[derive(Debug, Default)]
pub struct Metrics {
    messages: AtomicU64,
    conversions: AtomicU64,
    delivered: AtomicU64,
    delivery_failures: AtomicU64,
}

/// Point-in-time copy of all counters.
#[derive(Serialize, Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub messages: u64,
    pub conversions: u64,
    pub delivered: u64,
    pub delivery_failures: u64,
}

impl Metrics {
    pub fn record_message(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conversions(&self, count: u64) {
        self.conversions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            conversions: self.conversions.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}
