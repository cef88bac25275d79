//! Two logging paths: `env_logger` for human-facing stderr output during
//! interactive runs, and a `syslog` sink for the three priority tiers
//! the error-handling design calls for (alert on anomaly detection,
//! warning on restarts, info on everything else). Grounded on the
//! reference daemon's own `env_logger::init()` call in `main`; the
//! syslog sink is new, since nothing in that daemon talks to syslog
//! directly.

use std::sync::Mutex;

use once_cell::sync::OnceCell;
use syslog::{Facility, Formatter3164};

static SYSLOG: OnceCell<Mutex<syslog::Logger<syslog::LoggerBackend, Formatter3164>>> = OnceCell::new();

pub fn init() {
    env_logger::init();

    let formatter = Formatter3164 {
        facility: Facility::LOG_DAEMON,
        hostname: None,
        process: "aod".into(),
        pid: std::process::id(),
    };

    match syslog::unix(formatter) {
        Ok(logger) => {
            let _ = SYSLOG.set(Mutex::new(logger));
        }
        Err(e) => {
            log::warn!("syslog unavailable, alert/restart events will only go to the local log: {e}");
        }
    }
}

fn send(priority: Priority, message: &str) {
    if let Some(logger) = SYSLOG.get() {
        if let Ok(mut logger) = logger.lock() {
            let result = match priority {
                Priority::Alert => logger.alert(message),
                Priority::Warning => logger.warning(message),
                Priority::Info => logger.info(message),
            };
            if let Err(e) = result {
                log::warn!("failed to write to syslog: {e}");
            }
        }
    }
}

enum Priority {
    Alert,
    Warning,
    Info,
}

/// An anomaly was detected and a collection burst is starting.
pub fn alert_anomaly(kind: &str, timestamp_ns: u64) {
    let message = format!("anomaly detected: kind={kind} ts={timestamp_ns}");
    log::error!("{message}");
    send(Priority::Alert, &message);
}

/// A probe or internal worker was restarted after an unexpected exit.
pub fn warn_restart(component: &str, reason: &str) {
    let message = format!("restarting {component}: {reason}");
    log::warn!("{message}");
    send(Priority::Warning, &message);
}

/// Routine lifecycle events: startup, shutdown, cleanup sweeps.
pub fn info(message: &str) {
    log::info!("{message}");
    send(Priority::Info, message);
}
