//! Per-kind detectors: a closed tagged enum instead of dynamic dispatch,
//! with each variant holding its precomputed state. This is the
//! "dynamic dispatch to detector objects" design note resolved as a
//! fixed variant set rather than a `dyn Trait` collection, since the
//! kind set is closed at configuration-load time, not extensible at
//! runtime.

use std::collections::HashSet;

use aod_wire::Event;

use crate::config::{DetectorSpec, TrackMode};

/// Hard global emergency threshold, independent of any per-opcode table.
pub const EMERGENCY_LATENCY_NS: u64 = 1_000_000_000;

#[derive(Debug)]
pub enum Detector {
    Latency(LatencyDetector),
    Error(ErrorDetector),
}

#[derive(Debug)]
pub struct LatencyDetector {
    /// Dense opcode -> threshold-in-ns lookup. Index 0 is never a real
    /// opcode in practice but is kept in-bounds to avoid a branch.
    thresholds_ns: Vec<u64>,
    acceptable_count: u32,
}

#[derive(Debug)]
pub struct ErrorDetector {
    mode: TrackMode,
    tracked_codes: HashSet<i32>,
    acceptable_count: u32,
}

impl Detector {
    pub fn from_spec(spec: &DetectorSpec, acceptable_count: u32) -> Self {
        match spec {
            DetectorSpec::Latency { thresholds_ms } => {
                Detector::Latency(LatencyDetector::new(thresholds_ms, acceptable_count))
            }
            DetectorSpec::Error { mode, tracked_codes } => {
                Detector::Error(ErrorDetector::new(*mode, tracked_codes, acceptable_count))
            }
        }
    }

    /// Run this detector over a batch of events already masked down to
    /// one anomaly kind's producer (`tool`).
    pub fn fires(&self, events: &[Event]) -> bool {
        match self {
            Detector::Latency(d) => d.fires(events),
            Detector::Error(d) => d.fires(events),
        }
    }
}

impl LatencyDetector {
    pub fn new(thresholds_ms: &std::collections::HashMap<u16, u64>, acceptable_count: u32) -> Self {
        let max_opcode = thresholds_ms.keys().copied().max().unwrap_or(0) as usize;
        let mut thresholds_ns = vec![0u64; max_opcode + 1];
        for (&opcode, &ms) in thresholds_ms {
            thresholds_ns[opcode as usize] = ms * 1_000_000;
        }
        Self {
            thresholds_ns,
            acceptable_count,
        }
    }

    pub fn fires(&self, events: &[Event]) -> bool {
        let mut violations = 0u32;
        let mut max_latency = 0u64;

        for event in events {
            let threshold = self
                .thresholds_ns
                .get(event.smbcommand as usize)
                .copied()
                .unwrap_or(0);
            let latency = event.latency_ns();

            if threshold != 0 && latency >= threshold {
                violations += 1;
            }
            max_latency = max_latency.max(latency);
        }

        violations >= self.acceptable_count || max_latency >= EMERGENCY_LATENCY_NS
    }
}

impl ErrorDetector {
    pub fn new(mode: TrackMode, tracked_codes: &[i32], acceptable_count: u32) -> Self {
        Self {
            mode,
            tracked_codes: tracked_codes.iter().copied().collect(),
            acceptable_count,
        }
    }

    fn matches(&self, retval: i32) -> bool {
        match self.mode {
            TrackMode::All => true,
            TrackMode::TrackOnly => self.tracked_codes.contains(&retval),
            TrackMode::ExcludeOnly => !self.tracked_codes.contains(&retval),
        }
    }

    pub fn fires(&self, events: &[Event]) -> bool {
        let count = events.iter().filter(|e| self.matches(e.retval())).count() as u32;
        count >= self.acceptable_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn latency_event(smbcommand: u16, latency_ns: u64) -> Event {
        let mut e = Event::new(1, 0, 0, 0, smbcommand);
        e.set_latency_ns(latency_ns);
        e
    }

    fn error_event(retval: i32) -> Event {
        let mut e = Event::new(1, 0, 0, 0, 0);
        e.set_retval(retval);
        e
    }

    #[test]
    fn latency_fires_on_single_emergency_event_regardless_of_acceptable_count() {
        let thresholds = HashMap::from([(9u16, 50)]);
        let detector = LatencyDetector::new(&thresholds, 10);
        let events = vec![latency_event(9, 1_500_000_000)];
        assert!(detector.fires(&events));
    }

    #[test]
    fn latency_fires_on_count_threshold() {
        let thresholds = HashMap::from([(9u16, 50)]);
        let detector = LatencyDetector::new(&thresholds, 10);
        let events: Vec<Event> = (0..10).map(|_| latency_event(9, 60_000_000)).collect();
        assert!(detector.fires(&events));
    }

    #[test]
    fn latency_does_not_fire_below_count_threshold() {
        let thresholds = HashMap::from([(9u16, 50)]);
        let detector = LatencyDetector::new(&thresholds, 10);
        let events: Vec<Event> = (0..9).map(|_| latency_event(9, 60_000_000)).collect();
        assert!(!detector.fires(&events));
    }

    #[test]
    fn latency_fires_when_equal_to_threshold_with_count_one() {
        let thresholds = HashMap::from([(9u16, 50)]);
        let detector = LatencyDetector::new(&thresholds, 1);
        let events = vec![latency_event(9, 50_000_000)];
        assert!(detector.fires(&events));
    }

    #[test]
    fn untracked_opcode_never_fires_on_count() {
        let thresholds = HashMap::from([(9u16, 50)]);
        let detector = LatencyDetector::new(&thresholds, 1);
        let events = vec![latency_event(12, 999_000_000)];
        assert!(!detector.fires(&events));
    }

    #[test]
    fn error_trackonly_fires_when_tracked_codes_reach_count() {
        let detector = ErrorDetector::new(TrackMode::TrackOnly, &[-5, -22], 2);
        let events = vec![error_event(-5), error_event(-22), error_event(0)];
        assert!(detector.fires(&events));
    }

    #[test]
    fn error_excludeonly_counts_codes_not_in_the_set() {
        let detector = ErrorDetector::new(TrackMode::ExcludeOnly, &[0], 2);
        let events = vec![error_event(0), error_event(-1), error_event(-2)];
        assert!(detector.fires(&events));
    }

    #[test]
    fn error_all_mode_counts_every_event() {
        let detector = ErrorDetector::new(TrackMode::All, &[], 3);
        let events = vec![error_event(0), error_event(1), error_event(2)];
        assert!(detector.fires(&events));
    }

    #[test]
    fn empty_batch_never_fires() {
        let thresholds = HashMap::from([(9u16, 50)]);
        let detector = LatencyDetector::new(&thresholds, 1);
        assert!(!detector.fires(&[]));
    }
}
