pub mod analyzer;
pub mod clock;
pub mod collector;
pub mod config;
pub mod detector;
pub mod error;
pub mod janitor;
pub mod logging;
pub mod metrics;
pub mod parser;
pub mod quickaction;
pub mod ring;
pub mod stop;
pub mod supervisor;

pub use config::Config;
pub use error::{AodError, AodResult};
pub use metrics::Metrics;
pub use supervisor::Supervisor;
