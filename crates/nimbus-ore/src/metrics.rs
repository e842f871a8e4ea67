//! A thin wrapper around a process-wide [`prometheus::Registry`].
//!
//! Mirrors the teacher workspace's `mz_ore::metrics::MetricsRegistry`:
//! every component registers its collectors against one
//! [`MetricsRegistry`] instance, and the HTTP surface serves it in
//! Prometheus text format via [`MetricsRegistry::gather`].

use prometheus::core::Collector;
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, Registry, TextEncoder};

/// A named, process-wide registry of Prometheus collectors.
#[derive(Clone)]
pub struct MetricsRegistry {
    inner: Registry,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        MetricsRegistry {
            inner: Registry::new(),
        }
    }

    /// Registers a collector. Panics on duplicate registration, since
    /// that is always a programming error discoverable at startup.
    pub fn register(&self, collector: impl Collector + 'static) {
        self.inner
            .register(Box::new(collector))
            .expect("metric registration should never conflict");
    }

    /// Gathers all registered metric families for encoding.
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.inner.gather()
    }

    /// Encodes the current metric state in Prometheus text exposition
    /// format, as served by the agent's metrics listener.
    pub fn encode_text(&self) -> Result<Vec<u8>, anyhow::Error> {
        let families = self.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(buffer)
    }
}
