//! Process-wide counters sampled by the supervisor and logged
//! periodically. All fields are atomic since they're updated from the
//! Parser, Analyzer, Collector and Janitor threads concurrently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;

/// Daemon-wide counters. One instance lives for the process lifetime,
/// shared behind an `Arc` by every component.
pub struct Metrics {
    pub events_parsed_total: AtomicU64,
    pub batches_parsed_total: AtomicU64,
    pub corruption_events_total: AtomicU64,
    pub anomaly_actions_total: AtomicU64,
    anomalies_by_kind: RwLock<HashMap<String, u64>>,
    pub archives_written_total: AtomicU64,
    pub archive_failures_total: AtomicU64,
    pub janitor_deletions_total: AtomicU64,
    pub janitor_unlink_failures_total: AtomicU64,
    pub collector_inflight: AtomicUsize,
    pub probe_restarts_total: AtomicU64,
    pub component_restarts_total: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            events_parsed_total: AtomicU64::new(0),
            batches_parsed_total: AtomicU64::new(0),
            corruption_events_total: AtomicU64::new(0),
            anomaly_actions_total: AtomicU64::new(0),
            anomalies_by_kind: RwLock::new(HashMap::new()),
            archives_written_total: AtomicU64::new(0),
            archive_failures_total: AtomicU64::new(0),
            janitor_deletions_total: AtomicU64::new(0),
            janitor_unlink_failures_total: AtomicU64::new(0),
            collector_inflight: AtomicUsize::new(0),
            probe_restarts_total: AtomicU64::new(0),
            component_restarts_total: AtomicU64::new(0),
        }
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_batch(&self, record_count: u64) {
        self.batches_parsed_total.fetch_add(1, Ordering::Relaxed);
        self.events_parsed_total.fetch_add(record_count, Ordering::Relaxed);
    }

    pub fn record_corruption(&self) {
        self.corruption_events_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_anomaly(&self, kind: &str) {
        self.anomaly_actions_total.fetch_add(1, Ordering::Relaxed);
        let mut by_kind = self.anomalies_by_kind.write().unwrap_or_else(|e| e.into_inner());
        *by_kind.entry(kind.to_string()).or_insert(0) += 1;
    }

    pub fn anomalies_by_kind_snapshot(&self) -> HashMap<String, u64> {
        self.anomalies_by_kind.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn inc_archive_written(&self) {
        self.archives_written_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_archive_failure(&self) {
        self.archive_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_janitor_deletion(&self) {
        self.janitor_deletions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_janitor_unlink_failure(&self) {
        self.janitor_unlink_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn collector_task_started(&self) -> usize {
        self.collector_inflight.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn collector_task_finished(&self) {
        self.collector_inflight.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn inc_probe_restart(&self) {
        self.probe_restarts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_component_restart(&self) {
        self.component_restarts_total.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anomaly_counts_are_tracked_per_kind() {
        let m = Metrics::new();
        m.record_anomaly("latency");
        m.record_anomaly("latency");
        m.record_anomaly("error");

        let snapshot = m.anomalies_by_kind_snapshot();
        assert_eq!(snapshot.get("latency"), Some(&2));
        assert_eq!(snapshot.get("error"), Some(&1));
        assert_eq!(m.anomaly_actions_total.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn collector_inflight_gauge_tracks_start_and_finish() {
        let m = Metrics::new();
        assert_eq!(m.collector_task_started(), 1);
        assert_eq!(m.collector_task_started(), 2);
        m.collector_task_finished();
        assert_eq!(m.collector_inflight.load(Ordering::Acquire), 1);
    }
}
