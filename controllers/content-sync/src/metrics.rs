//! Prometheus metrics for the sync engine.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `sitehost_syncs_total` | Counter | `trigger`, `result` |
//! | `sitehost_cleanup_removed_total` | Counter | |

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Sync metrics
#[derive(Clone, Debug)]
pub struct SyncMetrics {
    registry: Registry,
    syncs_total: IntCounterVec,
    cleanup_removed_total: IntCounter,
}

impl SyncMetrics {
    /// Registers the metrics in a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let syncs_total = IntCounterVec::new(
            Opts::new("sitehost_syncs_total", "Content syncs by trigger and result"),
            &["trigger", "result"],
        )?;
        let cleanup_removed_total = IntCounter::new(
            "sitehost_cleanup_removed_total",
            "Orphaned content entries removed",
        )?;
        registry.register(Box::new(syncs_total.clone()))?;
        registry.register(Box::new(cleanup_removed_total.clone()))?;
        Ok(Self {
            registry,
            syncs_total,
            cleanup_removed_total,
        })
    }

    /// Counts one sync
    pub fn synced(&self, trigger: &str, result: &str) {
        self.syncs_total.with_label_values(&[trigger, result]).inc();
    }

    /// Counts removed orphan entries
    pub fn removed(&self, entries: usize) {
        self.cleanup_removed_total.inc_by(entries as u64);
    }

    #[cfg(test)]
    pub fn sync_count(&self, trigger: &str, result: &str) -> u64 {
        self.syncs_total.with_label_values(&[trigger, result]).get()
    }

    #[cfg(test)]
    pub fn removed_count(&self) -> u64 {
        self.cleanup_removed_total.get()
    }

    /// Text exposition of every registered metric
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
