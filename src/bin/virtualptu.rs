use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use virtualptu::config::DeviceBackend;
use virtualptu::{Collaborators, PtuConfig, PtuError, Session};

#[derive(Parser, Debug)]
#[command(author, version, about = "Virtual pan-tilt unit for a fixed 360° camera")]
struct Args {
    /// YAML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Use the simulated camera whatever the configuration says
    #[arg(long)]
    simulate: bool,

    /// Log filter, e.g. `debug` or `virtualptu=trace` (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("virtualptu=info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(args: &Args) -> Result<PtuConfig> {
    let mut config = match &args.config {
        Some(path) => {
            PtuConfig::load(path).with_context(|| format!("loading configuration from {}", path.display()))?
        }
        None => PtuConfig::default(),
    };
    if args.simulate {
        config.device.backend = DeviceBackend::Simulated;
    }
    Ok(config)
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    info!(device = ?config.device.backend, mode = ?config.stream.mode, sink = ?config.sink.backend, "Starting virtual PTU");

    let parts = Collaborators::from_config(&config).context("setting up collaborators")?;
    let report = Session::new(config, parts).run().await.context("session failed")?;

    info!(
        end = ?report.end,
        frames_pushed = report.frames_pushed,
        frames_dropped = report.frames_dropped,
        "Virtual PTU finished"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            if let Some(ptu) = e.downcast_ref::<PtuError>() {
                for suggestion in ptu.recovery_suggestions() {
                    eprintln!("  - {suggestion}");
                }
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_ptpcam() {
        let args = Args::parse_from(["virtualptu"]);
        assert_eq!(load_config(&args).unwrap().device.backend, DeviceBackend::Ptpcam);
    }

    #[test]
    fn simulate_overrides_backend() {
        let args = Args::parse_from(["virtualptu", "--simulate"]);
        assert_eq!(load_config(&args).unwrap().device.backend, DeviceBackend::Simulated);
    }
}
