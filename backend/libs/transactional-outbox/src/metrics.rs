//! Prometheus gauges for operator visibility into the outbox.

use prometheus::{IntCounter, IntGauge, Opts};
use tracing::warn;

use crate::OutboxStats;

#[derive(Clone)]
pub struct OutboxMetrics {
    pub total: IntGauge,
    pub unprocessed: IntGauge,
    pub failed: IntGauge,
    pub processed: IntGauge,
    pub published: IntCounter,
}

impl OutboxMetrics {
    pub fn new(service: &str) -> Self {
        let registry = prometheus::default_registry();

        let gauge = |name: &str, help: &str| {
            IntGauge::with_opts(
                Opts::new(name, help).const_label("service", service.to_string()),
            )
            .expect("valid metric opts")
        };

        let total = gauge("outbox_rows_total", "Total outbox rows");
        let unprocessed = gauge("outbox_rows_unprocessed", "Outbox rows awaiting publish");
        let failed = gauge(
            "outbox_rows_failed",
            "Poison outbox rows that exhausted their retries",
        );
        let processed = gauge("outbox_rows_processed", "Outbox rows published and marked");
        let published = IntCounter::with_opts(
            Opts::new(
                "outbox_published_total",
                "Events published since process start",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts");

        for metric in [
            Box::new(total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(unprocessed.clone()),
            Box::new(failed.clone()),
            Box::new(processed.clone()),
            Box::new(published.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register outbox metric: {}", e);
            }
        }

        Self {
            total,
            unprocessed,
            failed,
            processed,
            published,
        }
    }

    pub fn observe(&self, stats: &OutboxStats) {
        self.total.set(stats.total);
        self.unprocessed.set(stats.unprocessed);
        self.failed.set(stats.failed);
        self.processed.set(stats.processed);
    }
}
