//! Runs quick actions for each anomaly action and archives the results.
//!
//! Hosted on a single dedicated OS thread running a current-thread tokio
//! runtime, the way the reference daemon's handler pipeline keeps file
//! I/O on a cooperative scheduler rather than spreading it across the
//! work-stealing pool. A `Semaphore` bounds how many quick actions run
//! at once across every in-flight anomaly action, not per-action.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::{self, File};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::analyzer::AnomalyAction;
use crate::config::{AnomalyKindConfig, Config};
use crate::metrics::Metrics;
use crate::quickaction::{default_catalog, CommandSpec, QuickAction};
use crate::stop::StopSignal;

const QUICK_ACTION_CONCURRENCY: usize = 4;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const DMESG_LOOKBACK_SEC: u64 = 120;
const TAIL_LINES: u64 = 200;

pub struct Collector {
    archive_root: PathBuf,
    kinds: Vec<AnomalyKindConfig>,
    catalog: std::collections::HashMap<&'static str, QuickAction>,
    semaphore: Arc<Semaphore>,
    metrics: Arc<Metrics>,
}

impl Collector {
    pub fn new(config: &Config, metrics: Arc<Metrics>) -> Self {
        Self {
            archive_root: PathBuf::from(&config.aod_output_dir).join("batches"),
            kinds: config.anomalies.clone(),
            catalog: default_catalog(),
            semaphore: Arc::new(Semaphore::new(QUICK_ACTION_CONCURRENCY)),
            metrics,
        }
    }

    /// Drains `action_rx` on the calling thread's current-thread runtime
    /// until the channel closes or `stop` is observed. Each anomaly
    /// action is spawned as its own task so bursts can overlap; new
    /// actions stop being accepted once `stop` is set, but in-flight
    /// tasks are given [`DRAIN_TIMEOUT`] to finish before the thread
    /// returns.
    pub async fn run(&self, mut action_rx: tokio::sync::mpsc::Receiver<AnomalyAction>, stop: Arc<StopSignal>) {
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                maybe_action = action_rx.recv(), if !stop.is_set() => {
                    match maybe_action {
                        Some(action) => {
                            let archive_root = self.archive_root.clone();
                            let quick_actions = self.resolve_quick_actions(&action.kind);
                            let semaphore = self.semaphore.clone();
                            let metrics = self.metrics.clone();
                            in_flight.spawn(async move {
                                collect_one(archive_root, action, quick_actions, semaphore, metrics).await;
                            });
                        }
                        None => break,
                    }
                }
                Some(_) = in_flight.join_next() => {}
                else => {
                    if stop.is_set() {
                        break;
                    }
                }
            }

            if stop.is_set() && action_rx.is_closed() {
                break;
            }
        }

        let _ = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;
    }

    fn resolve_quick_actions(&self, kind_name: &str) -> Vec<(&'static str, CommandSpec)> {
        let Some(kind) = self.kinds.iter().find(|k| k.name == kind_name) else {
            return Vec::new();
        };

        kind.quick_actions
            .iter()
            .filter_map(|name| self.catalog.get(name.as_str()))
            .map(|qa| (qa.output_file_name, qa.resolve(DMESG_LOOKBACK_SEC, TAIL_LINES)))
            .collect()
    }
}

async fn collect_one(
    archive_root: PathBuf,
    action: AnomalyAction,
    quick_actions: Vec<(&'static str, CommandSpec)>,
    semaphore: Arc<Semaphore>,
    metrics: Arc<Metrics>,
) {
    metrics.collector_task_started();
    let batch_dir = archive_root.join(format!("aod_{}", action.timestamp_ns));

    if let Err(e) = fs::create_dir_all(&batch_dir).await {
        log::error!("collector: cannot create batch directory {}: {e}", batch_dir.display());
        metrics.collector_task_finished();
        return;
    }

    let mut tasks = JoinSet::new();
    for (output_file_name, command) in quick_actions {
        let batch_dir = batch_dir.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            run_quick_action(&batch_dir, output_file_name, command).await;
        });
    }
    while tasks.join_next().await.is_some() {}

    match archive_batch(&batch_dir).await {
        Ok(()) => metrics.inc_archive_written(),
        Err(e) => {
            log::error!("collector: archiving {} failed, leaving directory in place: {e}", batch_dir.display());
            metrics.inc_archive_failure();
        }
    }

    metrics.collector_task_finished();
}

async fn run_quick_action(batch_dir: &Path, output_file_name: &str, command: CommandSpec) {
    let out_path = batch_dir.join(output_file_name);
    match command {
        CommandSpec::Read(source_path) => match fs::read(&source_path).await {
            Ok(bytes) => {
                if let Err(e) = fs::write(&out_path, bytes).await {
                    log::warn!("collector: writing {} failed: {e}", out_path.display());
                }
            }
            Err(e) => log::warn!("collector: quick action read({}) failed: {e}", source_path.display()),
        },
        CommandSpec::Exec(argv) => {
            let Some((program, args)) = argv.split_first() else {
                return;
            };
            match Command::new(program).args(args).output().await {
                Ok(output) if !output.stdout.is_empty() => {
                    if let Err(e) = fs::write(&out_path, output.stdout).await {
                        log::warn!("collector: writing {} failed: {e}", out_path.display());
                    }
                }
                Ok(_) => {}
                Err(e) => log::warn!("collector: quick action exec({argv:?}) failed: {e}"),
            }
        }
    }
}

/// Tars `batch_dir` into `{batch_dir}.tar.zst` with zstd level 3, fsyncs
/// the archive, then removes the source directory. The archive is
/// written under a `.partial` name first and renamed into place so a
/// half-written file is never mistaken for a finished one.
async fn archive_batch(batch_dir: &Path) -> std::io::Result<()> {
    let final_path = batch_dir.with_extension("tar.zst");
    let partial_path = batch_dir.with_extension("tar.zst.partial");
    let batch_dir = batch_dir.to_path_buf();
    let partial_path_blocking = partial_path.clone();
    let dir_name = batch_dir
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("batch"));

    let batch_dir_blocking = batch_dir.clone();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let file = std::fs::File::create(&partial_path_blocking)?;
        let encoder = zstd::stream::Encoder::new(file, 3)?;
        let mut tar_builder = tar::Builder::new(encoder);
        tar_builder.append_dir_all(&dir_name, &batch_dir_blocking)?;
        let encoder = tar_builder.into_inner()?;
        let file = encoder.finish()?;
        file.sync_all()
    })
    .await
    .expect("archive task panicked")?;

    fs::rename(&partial_path, &final_path).await?;
    if let Ok(file) = File::open(&final_path).await {
        let _ = file.sync_all().await;
    }
    fs::remove_dir_all(&batch_dir).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectorSpec;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn config_with_quick_actions(output_dir: &Path, quick_actions: Vec<&str>) -> Config {
        let mut cfg = Config::default();
        cfg.aod_output_dir = output_dir.to_string_lossy().to_string();
        cfg.anomalies.push(AnomalyKindConfig {
            name: "latency".into(),
            tool_id: 0,
            acceptable_count: 1,
            detector: DetectorSpec::Latency { thresholds_ms: HashMap::new() },
            quick_actions: quick_actions.into_iter().map(String::from).collect(),
        });
        cfg
    }

    #[tokio::test]
    async fn collect_one_archives_read_quick_action_output() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("stats");
        fs::write(&source, b"cifs stats go here").await.unwrap();

        let batch_dir = temp.path().join("batches").join("aod_1");
        fs::create_dir_all(&batch_dir).await.unwrap();
        run_quick_action(&batch_dir, "stats", CommandSpec::Read(source)).await;
        assert!(batch_dir.join("stats").exists());

        archive_batch(&batch_dir).await.unwrap();
        assert!(!batch_dir.exists());
        assert!(temp.path().join("batches").join("aod_1.tar.zst").exists());
    }

    #[tokio::test]
    async fn exec_quick_action_with_empty_stdout_writes_nothing() {
        let temp = tempdir().unwrap();
        let batch_dir = temp.path().join("aod_2");
        fs::create_dir_all(&batch_dir).await.unwrap();
        run_quick_action(&batch_dir, "empty", CommandSpec::Exec(vec!["true".into()])).await;
        assert!(!batch_dir.join("empty").exists());
    }

    #[tokio::test]
    async fn resolve_quick_actions_skips_unknown_names_silently() {
        let temp = tempdir().unwrap();
        let cfg = config_with_quick_actions(temp.path(), vec!["stats", "not_a_real_one"]);
        let collector = Collector::new(&cfg, Arc::new(Metrics::new()));
        let resolved = collector.resolve_quick_actions("latency");
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].0, "stats");
    }

    #[tokio::test]
    async fn full_action_pipeline_leaves_only_the_archive() {
        let temp = tempdir().unwrap();
        let cfg = config_with_quick_actions(temp.path(), vec!["mounts"]);
        let collector = Collector::new(&cfg, Arc::new(Metrics::new()));
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let stop = Arc::new(StopSignal::new());
        tx.send(AnomalyAction { kind: "latency".into(), timestamp_ns: 42 }).await.unwrap();
        drop(tx);

        collector.run(rx, stop).await;

        let batch_dir = temp.path().join("batches").join("aod_42");
        let archive = temp.path().join("batches").join("aod_42.tar.zst");
        assert!(!batch_dir.exists());
        assert!(archive.exists());
    }
}
