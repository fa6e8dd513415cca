//! Prometheus metrics for the site controller.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `sitehost_reconciliations_total` | Counter | `result` |

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Reconciliation metrics
#[derive(Clone, Debug)]
pub struct ReconcileMetrics {
    registry: Registry,
    reconciliations_total: IntCounterVec,
}

impl ReconcileMetrics {
    /// Registers the metrics in a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let reconciliations_total = IntCounterVec::new(
            Opts::new("sitehost_reconciliations_total", "StaticSite reconciliations by result"),
            &["result"],
        )?;
        registry.register(Box::new(reconciliations_total.clone()))?;
        Ok(Self { registry, reconciliations_total })
    }

    /// Counts one reconciliation
    pub fn reconciled(&self, result: &str) {
        self.reconciliations_total.with_label_values(&[result]).inc();
    }

    /// Value of the counter for `result`
    #[cfg(test)]
    pub fn count(&self, result: &str) -> u64 {
        self.reconciliations_total.with_label_values(&[result]).get()
    }

    /// Text exposition of every registered metric
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
