//! Configuration loading and the narrow validation the core depends on.
//!
//! Schema validation in the general sense is out of scope here; what's
//! implemented is exactly the subset of checks the core components
//! themselves require to avoid silently-wrong behavior, chiefly the
//! empty-tracked-code-set rejection called out as an explicit design
//! decision.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::quickaction::default_catalog;

const DEFAULT_CONFIG_PATH: &str = "/etc/aod/aod.yaml";
const ENV_CONFIG_PATH: &str = "AOD_CONFIG";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_watch_interval_sec")]
    pub watch_interval_sec: u32,
    #[serde(default = "default_output_dir")]
    pub aod_output_dir: String,
    #[serde(default)]
    pub anomalies: Vec<AnomalyKindConfig>,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub probes: Vec<ProbeConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch_interval_sec: default_watch_interval_sec(),
            aod_output_dir: default_output_dir(),
            anomalies: Vec::new(),
            cleanup: CleanupConfig::default(),
            probes: Vec::new(),
        }
    }
}

fn default_watch_interval_sec() -> u32 {
    1
}

fn default_output_dir() -> String {
    "/var/log/aod".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CleanupConfig {
    #[serde(default = "default_cleanup_interval_sec")]
    pub interval_sec: u64,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,
    #[serde(default = "default_max_total_size_mb")]
    pub max_total_size_mb: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_sec: default_cleanup_interval_sec(),
            max_age_days: default_max_age_days(),
            max_total_size_mb: default_max_total_size_mb(),
        }
    }
}

fn default_cleanup_interval_sec() -> u64 {
    60
}
fn default_max_age_days() -> u64 {
    14
}
fn default_max_total_size_mb() -> u64 {
    1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProbeConfig {
    pub name: String,
    #[serde(default)]
    pub argv: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrackMode {
    All,
    TrackOnly,
    ExcludeOnly,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "detector", rename_all = "snake_case")]
pub enum DetectorSpec {
    Latency {
        /// opcode -> threshold in milliseconds; opcodes absent from this
        /// map are untracked (threshold 0, "never exceed").
        #[serde(default)]
        thresholds_ms: HashMap<u16, u64>,
    },
    Error {
        #[serde(default = "default_track_mode")]
        mode: TrackMode,
        #[serde(default)]
        tracked_codes: Vec<i32>,
    },
}

fn default_track_mode() -> TrackMode {
    TrackMode::All
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnomalyKindConfig {
    pub name: String,
    pub tool_id: u8,
    pub acceptable_count: u32,
    #[serde(flatten)]
    pub detector: DetectorSpec,
    #[serde(default)]
    pub quick_actions: Vec<String>,
}

impl Config {
    /// Resolve the configuration path (argument, then `AOD_CONFIG`, then
    /// the compiled-in default) and load it. A missing file falls back to
    /// [`Config::default`]; a file that exists but fails to parse is a
    /// fatal startup error. Unlike the reference daemon this is modeled
    /// on, we do not silently substitute defaults for a file an operator
    /// clearly meant to be read.
    pub fn load(path_override: Option<&Path>) -> anyhow::Result<Self> {
        let path = path_override
            .map(PathBuf::from)
            .or_else(|| std::env::var(ENV_CONFIG_PATH).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("no configuration file at {}, using defaults", path.display());
                return Ok(Config::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading configuration file {}", path.display()))
            }
        };

        serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing configuration file {}", path.display()))
    }

    /// Checks the invariants the core itself relies on. Called once by
    /// the supervisor before the ring is attached.
    pub fn validate(&self) -> Result<(), String> {
        let catalog = default_catalog();

        for kind in &self.anomalies {
            if let DetectorSpec::Error { mode, tracked_codes } = &kind.detector {
                if matches!(mode, TrackMode::TrackOnly | TrackMode::ExcludeOnly) && tracked_codes.is_empty() {
                    return Err(format!(
                        "anomaly kind '{}': tracked_codes must be non-empty under {:?} mode",
                        kind.name, mode
                    ));
                }
            }

            for qa in &kind.quick_actions {
                if !catalog.contains_key(qa.as_str()) {
                    return Err(format!(
                        "anomaly kind '{}': quick action '{}' is not in the catalog",
                        kind.name, qa
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn parse_minimal_config() {
        let yaml = r#"
watch_interval_sec: 2
aod_output_dir: /tmp/aod
anomalies:
  - name: latency
    tool_id: 0
    acceptable_count: 10
    detector: latency
    thresholds_ms:
      9: 50
    quick_actions: [dmesg, stats]
cleanup:
  interval_sec: 30
  max_age_days: 7
  max_total_size_mb: 512
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.watch_interval_sec, 2);
        assert_eq!(cfg.aod_output_dir, "/tmp/aod");
        assert_eq!(cfg.anomalies.len(), 1);
        assert_eq!(cfg.cleanup.max_age_days, 7);
        match &cfg.anomalies[0].detector {
            DetectorSpec::Latency { thresholds_ms } => {
                assert_eq!(thresholds_ms.get(&9), Some(&50));
            }
            _ => panic!("expected latency detector"),
        }
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn empty_tracked_codes_under_trackonly_is_rejected() {
        let yaml = r#"
anomalies:
  - name: error
    tool_id: 1
    acceptable_count: 1
    detector: error
    mode: track_only
    tracked_codes: []
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("tracked_codes must be non-empty"));
    }

    #[test]
    fn all_mode_allows_empty_tracked_codes() {
        let yaml = r#"
anomalies:
  - name: error
    tool_id: 1
    acceptable_count: 1
    detector: error
    mode: all
    tracked_codes: []
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn unknown_quick_action_is_rejected() {
        let yaml = r#"
anomalies:
  - name: latency
    tool_id: 0
    acceptable_count: 1
    detector: latency
    quick_actions: [not_a_real_action]
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("not in the catalog"));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        std::env::set_var(ENV_CONFIG_PATH, "/nonexistent/path/aod.yaml");
        let cfg = Config::load(None).unwrap();
        assert_eq!(cfg.watch_interval_sec, 1);
        std::env::remove_var(ENV_CONFIG_PATH);
    }

    #[test]
    fn malformed_file_is_a_fatal_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "this: [is not, valid yaml for our schema").unwrap();
        let result = Config::load(Some(file.path()));
        assert!(result.is_err());
    }
}
