mod alert;
mod api;
mod config;
mod error;
mod feed;
mod history;
mod model;
mod orchestrator;
mod timer;

use clap::Parser;
use config::Config;
use env_logger::Builder;
use log::{error, info, LevelFilter};
use orchestrator::Orchestrator;
use std::error::Error;
use std::io::Write;
use std::path::PathBuf;

/// Alerts when the live target price drifts away from what the predictor
/// price implies.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Print every evaluation and log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn init_logger(verbose: bool) {
    let crate_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("pairwatch", crate_level)
        .parse_default_env()
        .format(|buf, record| {
            let ts = chrono::Local::now().format("%H:%M:%S%.3f");
            writeln!(
                buf,
                "[{} {:<5} {}] {}",
                ts,
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(env_logger::Target::Stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let args = Args::parse();

    let mut config = Config::from_file(&args.config)?;
    config.verbose |= args.verbose;

    init_logger(config.verbose);
    info!(
        "Starting pairwatch: {} -> {}, window {} .. {}, retrain every {} min on {} klines",
        config.predictor_symbol,
        config.target_symbol,
        config.from_date,
        config.to_date,
        config.update_period_minutes,
        config.sample_time
    );

    let orchestrator = Orchestrator::new(config);
    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                cancel.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    orchestrator.run().await?;

    info!("Shutdown complete");
    Ok(())
}
