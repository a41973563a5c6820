//! Prometheus metrics for copy job observability.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Arc;

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct StatusLabel(pub String);

impl prometheus_client::encoding::EncodeLabelSet for StatusLabel {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("status", self.0.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct WorkerMetrics {
    pub active_partitions: Gauge,
    pub partitions_finished: Family<StatusLabel, Counter>,
    pub records_read: Counter,
    pub records_written: Counter,
    pub chunks_written: Counter,
    pub registry: Arc<Registry>,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let active_partitions = Gauge::default();
        registry.register(
            "ferry_active_partitions",
            "Number of partitions currently being copied",
            active_partitions.clone(),
        );

        let partitions_finished = Family::<StatusLabel, Counter>::default();
        registry.register(
            "ferry_partitions_finished",
            "Partitions finished by status",
            partitions_finished.clone(),
        );

        let records_read = Counter::default();
        registry.register(
            "ferry_records_read",
            "Records read from the source",
            records_read.clone(),
        );

        let records_written = Counter::default();
        registry.register(
            "ferry_records_written",
            "Records committed to the destination",
            records_written.clone(),
        );

        let chunks_written = Counter::default();
        registry.register(
            "ferry_chunks_written",
            "Chunks committed to the destination",
            chunks_written.clone(),
        );

        Self {
            active_partitions,
            partitions_finished,
            records_read,
            records_written,
            chunks_written,
            registry: Arc::new(registry),
        }
    }

    pub fn finished(&self, status: &str) {
        self.partitions_finished
            .get_or_create(&StatusLabel(status.to_string()))
            .inc();
    }

    /// Encode all metrics as Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        // Writing into a String cannot fail.
        let _ = encode(&mut buf, &self.registry);
        buf
    }
}

impl Default for WorkerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_counters_with_total_suffix() {
        let metrics = WorkerMetrics::new();
        metrics.records_written.inc_by(42);
        metrics.finished("success");
        metrics.finished("failed");
        metrics.finished("success");

        let text = metrics.encode();
        assert!(text.contains("ferry_records_written_total 42"));
        assert!(text.contains("ferry_partitions_finished_total{status=\"success\"} 2"));
        assert!(text.contains("ferry_partitions_finished_total{status=\"failed\"} 1"));
        assert!(text.contains("ferry_active_partitions 0"));
    }
}
