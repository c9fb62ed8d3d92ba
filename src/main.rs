use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use stagehand::aggregator::Aggregator;
use stagehand::executor::{report, run_load_test};
use stagehand::models::dsl_model::DslConfig;
use stagehand::telemetry::{init_tracing, shutdown_signal};
use stagehand::ws::start_monitor;

/// Exit code when the error rate is above the configured threshold.
const EXIT_THRESHOLD_EXCEEDED: i32 = 99;

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(about = "Ramp virtual users through stages against an HTTP endpoint")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a load test
    Run {
        /// Path to the JSON test definition
        #[arg(short, long)]
        config: PathBuf,

        /// Target URL, overrides the one in the file
        #[arg(long, env = "STAGEHAND_TARGET")]
        target: Option<String>,

        /// Per-request timeout in milliseconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Error rate (0..1) above which the run exits with code 99
        #[arg(long)]
        error_threshold: Option<f64>,

        /// Address for the live monitor, e.g. 127.0.0.1:6565
        #[arg(long)]
        monitor: Option<String>,

        /// Write the final report as JSON to this path
        #[arg(long)]
        summary_export: Option<PathBuf>,
    },

    /// Check a test definition without running it
    Validate {
        /// Path to the JSON test definition
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[actix_web::main]
async fn main() -> Result<()> {
    init_tracing();

    match Cli::parse().command {
        Command::Validate { config } => {
            let loaded = DslConfig::from_file(&config)
                .with_context(|| format!("invalid config {}", config.display()))?;
            info!(
                name = %loaded.name,
                stages = loaded.stages.len(),
                duration = ?loaded.total_duration(),
                max_vus = loaded.max_target(),
                "config is valid"
            );
            Ok(())
        }
        Command::Run {
            config,
            target,
            timeout,
            error_threshold,
            monitor,
            summary_export,
        } => {
            let mut loaded = DslConfig::read_file(&config)
                .with_context(|| format!("could not load {}", config.display()))?;
            if let Some(target) = target {
                loaded.target = target;
            }
            if let Some(timeout) = timeout {
                loaded.timeout = Some(timeout);
            }
            if let Some(limit) = error_threshold {
                loaded.thresholds.error_rate = Some(limit);
            }
            loaded
                .validate()
                .with_context(|| format!("invalid config {}", config.display()))?;

            let aggregator = Arc::new(Aggregator::with_error_rate()?);
            let monitor = match monitor {
                Some(addr) => Some(
                    start_monitor(&addr, Arc::clone(&aggregator))
                        .with_context(|| format!("could not bind monitor to {}", addr))?,
                ),
                None => None,
            };

            let stop = CancellationToken::new();
            let on_signal = stop.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                on_signal.cancel();
            });

            // The actix system is single-threaded; virtual users get a
            // worker pool of their own so scheduling delay stays out of the
            // measured latency.
            let load = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .thread_name("stagehand-vu")
                .build()
                .context("could not start the load runtime")?;
            let joined = load.spawn(run_load_test(loaded, aggregator, stop)).await;
            load.shutdown_background();
            let metrics = joined.context("load test task failed")??;
            report::print_report(&metrics);

            if let Some(path) = summary_export {
                report::export_json(&metrics, &path)
                    .with_context(|| format!("could not write {}", path.display()))?;
                info!(path = %path.display(), "summary exported");
            }

            if let Some(handle) = monitor {
                handle.stop(true).await;
            }

            if metrics.degraded() {
                warn!(
                    error_rate = metrics.error_rate(),
                    threshold = ?metrics.error_threshold,
                    "error rate threshold exceeded"
                );
                std::process::exit(EXIT_THRESHOLD_EXCEEDED);
            }
            Ok(())
        }
    }
}
