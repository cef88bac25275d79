//! Consumes event batches from the parser, partitions by anomaly kind,
//! runs each kind's detector, and emits anomaly actions.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use aod_wire::Event;

use crate::clock::monotonic_now_ns;
use crate::config::Config;
use crate::detector::Detector;
use crate::metrics::Metrics;
use crate::parser::EventBatch;
use crate::stop::StopSignal;

/// Bounded coalescing window: once the channel becomes non-empty, keep
/// gathering further already-queued batches for this long before running
/// detectors.
const COALESCE_WINDOW: Duration = Duration::from_millis(5);

/// How long a `recv_timeout` waits before re-checking the stop signal.
const POLL_FOR_STOP: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct AnomalyAction {
    pub kind: String,
    pub timestamp_ns: u64,
}

struct KindRuntime {
    name: String,
    tool_id: u8,
    detector: Detector,
}

pub struct Analyzer {
    kinds: Vec<KindRuntime>,
    watch_interval: Duration,
    metrics: Arc<Metrics>,
}

impl Analyzer {
    pub fn new(config: &Config, metrics: Arc<Metrics>) -> Self {
        let kinds = config
            .anomalies
            .iter()
            .map(|kind_config| KindRuntime {
                name: kind_config.name.clone(),
                tool_id: kind_config.tool_id,
                detector: Detector::from_spec(&kind_config.detector, kind_config.acceptable_count),
            })
            .collect();

        Self {
            kinds,
            watch_interval: Duration::from_secs(config.watch_interval_sec as u64),
            metrics,
        }
    }

    /// Runs until `stop` is observed and `event_rx` has nothing left
    /// queued. Intended to be called from a dedicated OS thread.
    pub fn run(
        &self,
        event_rx: Receiver<EventBatch>,
        action_tx: tokio::sync::mpsc::Sender<AnomalyAction>,
        stop: Arc<StopSignal>,
    ) {
        loop {
            let first_batch = match event_rx.recv_timeout(POLL_FOR_STOP) {
                Ok(batch) => batch,
                Err(RecvTimeoutError::Timeout) => {
                    if stop.is_set() {
                        break;
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let mut coalesced = first_batch.events;
            let coalesce_deadline = Instant::now() + COALESCE_WINDOW;
            while Instant::now() < coalesce_deadline {
                match event_rx.try_recv() {
                    Ok(batch) => coalesced.extend(batch.events),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => break,
                }
            }

            if !coalesced.is_empty() {
                self.process(&coalesced, &action_tx);
            }

            if stop.is_set() {
                self.drain_remaining(&event_rx, &action_tx);
                break;
            }

            std::thread::sleep(self.watch_interval);
        }
    }

    fn drain_remaining(&self, event_rx: &Receiver<EventBatch>, action_tx: &tokio::sync::mpsc::Sender<AnomalyAction>) {
        while let Ok(batch) = event_rx.try_recv() {
            if !batch.events.is_empty() {
                self.process(&batch.events, action_tx);
            }
        }
    }

    fn process(&self, events: &[Event], action_tx: &tokio::sync::mpsc::Sender<AnomalyAction>) {
        let now = monotonic_now_ns();

        for kind in &self.kinds {
            let masked: Vec<Event> = events.iter().copied().filter(|e| e.tool == kind.tool_id).collect();
            if masked.is_empty() {
                continue;
            }

            let fired = catch_unwind(AssertUnwindSafe(|| kind.detector.fires(&masked)));
            match fired {
                Ok(true) => {
                    self.metrics.record_anomaly(&kind.name);
                    crate::logging::alert_anomaly(&kind.name, now);
                    if action_tx
                        .blocking_send(AnomalyAction {
                            kind: kind.name.clone(),
                            timestamp_ns: now,
                        })
                        .is_err()
                    {
                        log::warn!("action channel closed while emitting anomaly for kind '{}'", kind.name);
                    }
                }
                Ok(false) => {}
                Err(_) => {
                    log::error!("detector for kind '{}' panicked; skipping this iteration", kind.name);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnomalyKindConfig, DetectorSpec};
    use std::collections::HashMap;

    fn latency_config(acceptable_count: u32) -> Config {
        let mut cfg = Config::default();
        cfg.anomalies.push(AnomalyKindConfig {
            name: "latency".into(),
            tool_id: 0,
            acceptable_count,
            detector: DetectorSpec::Latency {
                thresholds_ms: HashMap::from([(9u16, 50)]),
            },
            quick_actions: vec![],
        });
        cfg
    }

    fn event(tool: u8, smbcommand: u16, latency_ns: u64) -> Event {
        let mut e = Event::new(1, 0, 0, 0, smbcommand);
        e.tool = tool;
        e.set_latency_ns(latency_ns);
        e
    }

    #[test]
    fn empty_batch_emits_no_actions() {
        let cfg = latency_config(10);
        let analyzer = Analyzer::new(&cfg, Arc::new(Metrics::new()));
        let (action_tx, mut action_rx) = tokio::sync::mpsc::channel(8);
        analyzer.process(&[], &action_tx);
        drop(action_tx);
        let rt = tokio::runtime::Runtime::new().unwrap();
        assert!(rt.block_on(action_rx.recv()).is_none());
    }

    #[test]
    fn masked_events_from_other_tools_do_not_trigger_this_kind() {
        let cfg = latency_config(1);
        let analyzer = Analyzer::new(&cfg, Arc::new(Metrics::new()));
        let events = vec![event(99, 9, 2_000_000_000)];
        let (action_tx, mut action_rx) = tokio::sync::mpsc::channel(8);
        analyzer.process(&events, &action_tx);
        drop(action_tx);
        let rt = tokio::runtime::Runtime::new().unwrap();
        assert!(rt.block_on(action_rx.recv()).is_none());
    }

    #[test]
    fn matching_kind_emits_one_action() {
        let cfg = latency_config(1);
        let analyzer = Analyzer::new(&cfg, Arc::new(Metrics::new()));
        let events = vec![event(0, 9, 2_000_000_000)];
        let (action_tx, mut action_rx) = tokio::sync::mpsc::channel(8);
        analyzer.process(&events, &action_tx);
        drop(action_tx);
        let rt = tokio::runtime::Runtime::new().unwrap();
        let action = rt.block_on(action_rx.recv()).expect("expected one action");
        assert_eq!(action.kind, "latency");
    }
}
