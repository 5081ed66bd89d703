//! `ferrochaind`: the network-coordinator binary. Parses a TOML config file
//! path from argv (defaulting to `./ferrochaind.toml`), wires up tracing,
//! and runs the [`Coordinator`] reactor until a shutdown signal arrives.

mod config;
mod coordinator;
mod persist;
mod pow;

use std::path::PathBuf;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use config::Config;
use coordinator::Coordinator;

fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("ferrochaind.toml"))
}

fn init_tracing(log_filter: &str) {
    let filter = EnvFilter::try_new(log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let path = config_path();
    let config = match Config::load(&path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config from {}: {e}", path.display());
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config.log_filter);
    tracing::info!(network = ?config.network, listen_port = config.listen_port, "starting ferrochaind");

    let verifier = pow::build_verifier();
    let coordinator = Coordinator::new(config, verifier);

    match coordinator.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "coordinator exited with error");
            ExitCode::FAILURE
        }
    }
}
