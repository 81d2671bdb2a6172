//! Storage health signal.
//!
//! Counts consecutive storage failures across the poller, the dispatcher, and
//! command handling. Crossing the threshold is logged once; any successful
//! store operation resets the count.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{error, info};
use woltbot_core::error::WoltbotError;

pub struct Health {
    threshold: u32,
    consecutive: AtomicU32,
    reported: AtomicBool,
}

impl Health {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: AtomicU32::new(0),
            reported: AtomicBool::new(false),
        }
    }

    /// Feed the outcome of a store operation. Non-storage errors are ignored.
    pub fn record<T>(&self, result: &Result<T, WoltbotError>) {
        match result {
            Ok(_) => self.record_ok(),
            Err(e) if e.is_storage() => self.record_failure(e),
            Err(_) => {}
        }
    }

    pub fn record_ok(&self) {
        let previous = self.consecutive.swap(0, Ordering::Relaxed);
        if self.reported.swap(false, Ordering::Relaxed) {
            info!("storage recovered after {previous} consecutive failure(s)");
        }
    }

    pub fn record_failure(&self, err: &WoltbotError) {
        let n = self.consecutive.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        if n >= self.threshold && !self.reported.swap(true, Ordering::Relaxed) {
            error!("storage unhealthy: {n} consecutive failures, last: {err}");
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures() < self.threshold
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive.load(Ordering::Relaxed)
    }
}
