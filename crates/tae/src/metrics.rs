use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Engine-wide counters and gauges, registered against their own
/// [`Registry`] rather than the process default. No metrics server is
/// implemented here, only the instrumentation points themselves — a caller
/// embedding this crate mounts `gather()`'s output on whatever scrape
/// endpoint it already runs.
pub struct Metrics {
    registry: Registry,
    pub txns_committed_total: IntCounter,
    pub txns_rolled_back_total: IntCounter,
    pub rows_appended_total: IntCounter,
    pub rows_deleted_total: IntCounter,
    pub objects_frozen_total: IntCounter,
    pub merge_cycles_total: IntCounter,
    pub replay_entries_total: IntCounterVec,
    pub open_tables: IntGauge,
    pub wal_flush_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let txns_committed_total =
            IntCounter::with_opts(Opts::new("tae_txns_committed_total", "cumulative number of committed transactions")).unwrap();
        let txns_rolled_back_total =
            IntCounter::with_opts(Opts::new("tae_txns_rolled_back_total", "cumulative number of rolled-back transactions")).unwrap();
        let rows_appended_total =
            IntCounter::with_opts(Opts::new("tae_rows_appended_total", "cumulative number of rows appended")).unwrap();
        let rows_deleted_total =
            IntCounter::with_opts(Opts::new("tae_rows_deleted_total", "cumulative number of rows marked deleted")).unwrap();
        let objects_frozen_total =
            IntCounter::with_opts(Opts::new("tae_objects_frozen_total", "cumulative number of objects frozen from memory to persisted")).unwrap();
        let merge_cycles_total =
            IntCounter::with_opts(Opts::new("tae_merge_cycles_total", "cumulative number of compaction cycles run")).unwrap();
        let replay_entries_total = IntCounterVec::new(
            Opts::new("tae_replay_entries_total", "WAL entries applied during startup replay, by log group"),
            &["group"],
        )
        .unwrap();
        let open_tables = IntGauge::with_opts(Opts::new("tae_open_tables", "number of tables currently registered")).unwrap();
        let wal_flush_seconds = Histogram::with_opts(
            HistogramOpts::new("tae_wal_flush_seconds", "time spent waiting for a WAL entry to durably flush")
                .buckets(vec![50e-6, 100e-6, 500e-6, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )
        .unwrap();

        for c in [&txns_committed_total, &txns_rolled_back_total, &rows_appended_total, &rows_deleted_total, &objects_frozen_total, &merge_cycles_total] {
            registry.register(Box::new(c.clone())).unwrap();
        }
        registry.register(Box::new(replay_entries_total.clone())).unwrap();
        registry.register(Box::new(open_tables.clone())).unwrap();
        registry.register(Box::new(wal_flush_seconds.clone())).unwrap();

        Metrics {
            registry,
            txns_committed_total,
            txns_rolled_back_total,
            rows_appended_total,
            rows_deleted_total,
            objects_frozen_total,
            merge_cycles_total,
            replay_entries_total,
            open_tables,
            wal_flush_seconds,
        }
    }

    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let metrics = Metrics::new();
        assert_eq!(metrics.txns_committed_total.get(), 0);
        metrics.txns_committed_total.inc();
        assert_eq!(metrics.txns_committed_total.get(), 1);
    }

    #[test]
    fn gather_reports_every_registered_family() {
        let metrics = Metrics::new();
        let families = metrics.gather();
        assert!(families.iter().any(|f| f.get_name() == "tae_txns_committed_total"));
        assert!(families.iter().any(|f| f.get_name() == "tae_replay_entries_total"));
    }
}
