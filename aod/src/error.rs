//! Error taxonomy for the daemon's component boundaries.
//!
//! Components return `Result<_, AodError>` so the supervisor can decide,
//! by variant, whether a failure is fatal to the whole process, warrants
//! restarting one component, or is already fully handled at the point it
//! was logged. `main` itself deals in `anyhow::Result` once past startup,
//! matching how the reference daemon this is built from layers `anyhow`
//! at the edges and narrower errors in its components.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AodError {
    #[error("process is not running as root (effective uid {0})")]
    NotRoot(u32),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("failed to map shared-memory ring: {0}")]
    RingMap(#[source] std::io::Error),

    #[error("archive root {path} is not writable: {source}")]
    ArchiveRootUnwritable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("producer corruption detected: {0}")]
    ProducerCorruption(String),

    #[error("component {name} panicked")]
    ComponentCrash { name: &'static str },

    #[error("probe {name} exited unexpectedly with status {status}")]
    ProbeExited { name: String, status: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AodResult<T> = Result<T, AodError>;
