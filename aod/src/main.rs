use std::path::PathBuf;
use std::sync::Arc;

use aod::config::Config;
use aod::error::AodError;
use aod::metrics::Metrics;
use aod::supervisor::Supervisor;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "aod")]
#[command(about = "On-host SMB anomaly diagnostics daemon")]
struct Args {
    /// Path to the configuration file. Overrides AOD_CONFIG and the
    /// compiled-in default.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Validate configuration and exit without attaching the ring.
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    aod::logging::init();
    let args = Args::parse();

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("failed to load configuration: {e:#}");
            return std::process::ExitCode::FAILURE;
        }
    };

    if let Err(e) = config.validate() {
        log::error!("invalid configuration: {e}");
        return std::process::ExitCode::FAILURE;
    }

    if args.check_config {
        println!("configuration OK");
        return std::process::ExitCode::SUCCESS;
    }

    if !is_root() {
        let err = AodError::NotRoot(unsafe { libc::geteuid() });
        log::error!("{err}");
        return std::process::ExitCode::FAILURE;
    }

    let metrics = Arc::new(Metrics::new());
    let supervisor = Supervisor::new(config, metrics);

    match supervisor.run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            log::error!("fatal: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}
