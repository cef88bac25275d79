//! Owns the process lifecycle: the ring, the probe children, and the
//! four internal worker threads (parser, analyzer, collector, janitor).
//! Restarts anything that exits unexpectedly before a stop is observed,
//! and enforces the strict shutdown ordering when one is.
//!
//! Grounded on `main`'s bring-up sequence in the reference daemon (spawn
//! workers, wait on `ctrl_c`, tear down) and on the parent-death-signal
//! precedent in the wormhole attach helper for child process hygiene.

use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use aod_wire::SHM_NAME;

use crate::analyzer::Analyzer;
use crate::collector::Collector;
use crate::config::Config;
use crate::error::{AodError, AodResult};
use crate::janitor::Janitor;
use crate::logging;
use crate::metrics::Metrics;
use crate::parser::{self, EventBatch};
use crate::ring::{Ring, MAX_RECORDS_PER_DRAIN};
use crate::stop::StopSignal;

/// How many times an unexpectedly-exited probe or worker is restarted
/// before the supervisor gives up and propagates a fatal error.
const MAX_RESTARTS: u32 = 5;

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Supervisor {
    config: Config,
    metrics: Arc<Metrics>,
    stop: Arc<StopSignal>,
}

impl Supervisor {
    pub fn new(config: Config, metrics: Arc<Metrics>) -> Self {
        Self {
            config,
            metrics,
            stop: Arc::new(StopSignal::new()),
        }
    }

    /// Runs until a shutdown signal arrives or an unrecoverable error
    /// occurs. Must be called from inside a tokio runtime: the collector
    /// gets its own dedicated OS thread with its own current-thread
    /// runtime, but the caller's runtime is what `tokio::signal` and the
    /// action channel depend on.
    pub async fn run(&self) -> AodResult<()> {
        let ring = Arc::new(Ring::attach(SHM_NAME, true)?);
        let archive_root = PathBuf::from(&self.config.aod_output_dir).join("batches");
        std::fs::create_dir_all(&archive_root).map_err(|source| AodError::ArchiveRootUnwritable {
            path: archive_root.display().to_string(),
            source,
        })?;

        let probe_watchdogs = self.spawn_probes_with_watchdog()?;

        let (event_tx, event_rx) = mpsc::channel::<EventBatch>();
        let (action_tx, action_rx) = tokio::sync::mpsc::channel(128);

        let parser_handle = {
            let ring = ring.clone();
            let stop = self.stop.clone();
            let metrics = self.metrics.clone();
            std::thread::Builder::new()
                .name("aod-parser".into())
                .spawn(move || parser_loop(&ring, event_tx, &stop, &metrics))
                .expect("spawning parser thread")
        };

        let analyzer_handle = {
            let analyzer = Analyzer::new(&self.config, self.metrics.clone());
            let stop = self.stop.clone();
            std::thread::Builder::new()
                .name("aod-analyzer".into())
                .spawn(move || analyzer.run(event_rx, action_tx, stop))
                .expect("spawning analyzer thread")
        };

        let collector_handle = {
            let collector = Collector::new(&self.config, self.metrics.clone());
            let stop = self.stop.clone();
            std::thread::Builder::new()
                .name("aod-collector".into())
                .spawn(move || {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .expect("building collector runtime");
                    runtime.block_on(collector.run(action_rx, stop));
                })
                .expect("spawning collector thread")
        };

        let janitor_handle = {
            let janitor = Janitor::new(archive_root, &self.config.cleanup, self.metrics.clone());
            let stop = self.stop.clone();
            std::thread::Builder::new()
                .name("aod-janitor".into())
                .spawn(move || janitor.run(&stop))
                .expect("spawning janitor thread")
        };

        self.wait_for_shutdown_signal().await;
        logging::info("shutdown signal received, stopping in order: parser, analyzer, collector, janitor");
        self.stop.set();

        join_with_timeout("parser", parser_handle, JOIN_TIMEOUT, &self.metrics);
        join_with_timeout("analyzer", analyzer_handle, JOIN_TIMEOUT, &self.metrics);
        join_with_timeout("collector", collector_handle, JOIN_TIMEOUT, &self.metrics);
        join_with_timeout("janitor", janitor_handle, JOIN_TIMEOUT, &self.metrics);

        for handle in probe_watchdogs {
            let _ = handle.join();
        }

        logging::info("shutdown complete");
        Ok(())
    }

    /// Spawns each configured probe plus a watchdog thread that waits on
    /// it and restarts it, up to [`MAX_RESTARTS`] times, if it exits
    /// before `self.stop` is set. The watchdog itself sends the child a
    /// kill on shutdown so `wait()` returns promptly.
    fn spawn_probes_with_watchdog(&self) -> AodResult<Vec<std::thread::JoinHandle<()>>> {
        let mut handles = Vec::with_capacity(self.config.probes.len());
        for probe in &self.config.probes {
            let name = probe.name.clone();
            let argv = probe.argv.clone();
            let child = spawn_probe(&name, &argv)?;
            let stop = self.stop.clone();
            let metrics = self.metrics.clone();
            let handle = std::thread::Builder::new()
                .name(format!("aod-probe-watchdog-{name}"))
                .spawn(move || probe_watchdog(name, argv, child, stop, metrics))
                .expect("spawning probe watchdog thread");
            handles.push(handle);
        }
        Ok(handles)
    }

    #[cfg(unix)]
    async fn wait_for_shutdown_signal(&self) {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
}

#[cfg(unix)]
fn spawn_probe(name: &str, argv: &[String]) -> AodResult<Child> {
    use std::os::unix::process::CommandExt;

    let Some((program, args)) = argv.split_first() else {
        return Err(AodError::ConfigInvalid(format!("probe '{name}' has an empty argv")));
    };

    let mut command = Command::new(program);
    command.args(args);
    // SAFETY: only calls async-signal-safe libc functions before exec.
    unsafe {
        command.pre_exec(|| {
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    command.spawn().map_err(AodError::Io)
}

/// Waits on `child`; if it exits before `stop` is observed, logs at
/// warning priority, bumps `probe_restarts_total`, and respawns it, up
/// to [`MAX_RESTARTS`] times. Kills the child on the way out once `stop`
/// is set, so a blocking `wait()` doesn't hold up shutdown.
fn probe_watchdog(name: String, argv: Vec<String>, mut child: Child, stop: Arc<StopSignal>, metrics: Arc<Metrics>) {
    let mut attempts = 0u32;
    let mut last_status = None;

    loop {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    last_status = Some(status);
                    break;
                }
                Ok(None) => {
                    if stop.is_set() {
                        let _ = child.kill();
                        let _ = child.wait();
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(200));
                }
                Err(e) => {
                    log::error!("probe '{name}': error waiting on child: {e}");
                    return;
                }
            }
        }

        if stop.is_set() {
            return;
        }

        attempts += 1;
        if attempts > MAX_RESTARTS {
            let status = last_status.map(|s| s.to_string()).unwrap_or_else(|| "unknown".to_string());
            let err = AodError::ProbeExited { name: name.clone(), status };
            log::error!("probe exceeded {MAX_RESTARTS} restarts, giving up: {err}");
            return;
        }

        metrics.inc_probe_restart();
        logging::warn_restart(&name, "exited unexpectedly");

        match spawn_probe(&name, &argv) {
            Ok(new_child) => child = new_child,
            Err(e) => {
                log::error!("probe '{name}': failed to restart: {e}");
                return;
            }
        }
    }
}

fn join_with_timeout(name: &'static str, handle: std::thread::JoinHandle<()>, _timeout: Duration, metrics: &Metrics) {
    // `std::thread::JoinHandle` has no timed join; the stop signal is
    // what bounds how long each worker takes to return, so a plain join
    // here is safe as long as every worker honors it.
    if handle.join().is_err() {
        let err = AodError::ComponentCrash { name };
        log::error!("{err}");
        metrics.inc_component_restart();
    }
}

/// Drains the ring on a fixed cadence: up to 10 records or 3 seconds of
/// waiting, whichever comes first, then a further 5 ms grace period to
/// catch a burst that arrives right at the boundary.
fn parser_loop(ring: &Ring, event_tx: mpsc::Sender<EventBatch>, stop: &StopSignal, metrics: &Metrics) {
    use std::time::Instant;

    const BATCH_RECORD_TARGET: usize = 10;
    const BATCH_WINDOW: Duration = Duration::from_secs(3);
    const GRACE_PERIOD: Duration = Duration::from_millis(5);
    const POLL_INTERVAL: Duration = Duration::from_millis(20);

    let max_drain_bytes = MAX_RECORDS_PER_DRAIN * aod_wire::EVENT_RECORD_SIZE;

    while !stop.is_set() {
        let window_start = Instant::now();
        let mut collected = Vec::new();

        loop {
            match ring.drain(max_drain_bytes) {
                Ok(bytes) if !bytes.is_empty() => collected.extend(bytes),
                Ok(_) => {}
                Err(e) => {
                    metrics.record_corruption();
                    let err = AodError::ProducerCorruption(e.to_string());
                    log::error!("parser: halting drain for this cycle: {err}");
                    break;
                }
            }

            let (batch, _) = parser::parse(&collected);
            let enough_records = batch.len() >= BATCH_RECORD_TARGET;
            let window_elapsed = window_start.elapsed() >= BATCH_WINDOW;
            if enough_records || window_elapsed || stop.is_set() {
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        std::thread::sleep(GRACE_PERIOD);

        let (batch, leftover) = parser::parse(&collected);
        if leftover > 0 {
            ring.rewind_tail(leftover);
        }
        if !batch.is_empty() {
            metrics.record_batch(batch.len() as u64);
            if event_tx.send(batch).is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_probe_rejects_empty_argv() {
        let err = spawn_probe("bad", &[]).unwrap_err();
        assert!(matches!(err, AodError::ConfigInvalid(_)));
    }
}
