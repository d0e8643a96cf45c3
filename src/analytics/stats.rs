use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

#[derive(Debug, Default)]
pub struct Stats {
    pub signals_detected: AtomicU64,
    pub buys_opened: AtomicU64,
    pub failed_trades: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_signals(&self) {
        self.signals_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_buys(&self) {
        self.buys_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.failed_trades.fetch_add(1, Ordering::Relaxed);
    }

    pub fn log_stats(&self) {
        info!(
            "STATS: signals {} | buys {} | failed {}",
            self.signals_detected.load(Ordering::Relaxed),
            self.buys_opened.load(Ordering::Relaxed),
            self.failed_trades.load(Ordering::Relaxed),
        );
    }
}
