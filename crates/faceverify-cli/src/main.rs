use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceverify_core::{Calibration, DetectionPolicy, DistanceMetric, ModelId};
use faceverify_engine::{ConfigOverrides, Engine, EngineConfig, ModelSelection, VerifyRequest};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Exit status when the pair could not be evaluated.
const EXIT_VERIFY_ERROR: u8 = 2;

#[derive(Parser)]
#[command(name = "faceverify", about = "Decide whether two face images show the same person")]
struct Cli {
    /// TOML config file (defaults to $FACEVERIFY_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare a registered image with a captured one and print the result as JSON
    Verify {
        /// Enrollment image: http(s) URL, file:// URL or path
        registered: String,
        /// Probe image: http(s) URL, file:// URL or path
        captured: String,
        /// strict | relaxed
        #[arg(long)]
        policy: Option<DetectionPolicy>,
        /// cosine | euclidean | euclidean_l2
        #[arg(long)]
        metric: Option<DistanceMetric>,
        /// Match when distance is strictly below this value
        #[arg(long)]
        threshold: Option<f32>,
        /// Must name the model the engine is configured with
        #[arg(long)]
        model: Option<ModelId>,
        /// Per-image fetch timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Pretty-print the JSON result
        #[arg(long)]
        pretty: bool,
    },
    /// Print the calibrated threshold for every model and metric
    Calibrations,
    /// Load the configured models and print the effective configuration
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ort=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Verify {
            registered,
            captured,
            policy,
            metric,
            threshold,
            model,
            timeout_ms,
            pretty,
        } => {
            let config = EngineConfig::load(cli.config.as_deref()).context("loading configuration")?;
            let engine = Engine::from_config(&config).context("starting verification engine")?;

            let request = VerifyRequest {
                registered_url: registered,
                captured_url: captured,
                overrides: ConfigOverrides {
                    detection_policy: policy,
                    metric,
                    threshold,
                    model: model.map(ModelSelection::Single),
                    timeout_ms,
                },
            };
            let result = engine.handle(&request).await;

            let json = if pretty {
                serde_json::to_string_pretty(&result)?
            } else {
                serde_json::to_string(&result)?
            };
            println!("{json}");

            Ok(if result.is_error() {
                ExitCode::from(EXIT_VERIFY_ERROR)
            } else {
                ExitCode::SUCCESS
            })
        }
        Commands::Calibrations => {
            let table: Vec<_> = ModelId::ALL
                .into_iter()
                .flat_map(|model| {
                    DistanceMetric::ALL.into_iter().map(move |metric| {
                        serde_json::json!({
                            "model": model,
                            "metric": metric,
                            "threshold": Calibration::default_for(model, metric).threshold,
                        })
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&table)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check => {
            let config = EngineConfig::load(cli.config.as_deref()).context("loading configuration")?;
            let engine = Engine::from_config(&config).context("starting verification engine")?;
            let defaults = engine.defaults();

            let report = serde_json::json!({
                "status": "ok",
                "model_dir": config.model_dir,
                "model": engine.model(),
                "detector_backend": engine.detector_backend(),
                "detection_policy": defaults.detection_policy,
                "metric": defaults.calibration.metric,
                "threshold": defaults.calibration.threshold,
                "fetch_timeout_secs": defaults.fetch_timeout.as_secs(),
                "downsample_max_side": defaults.downsample_max_side,
                "intra_threads": config.intra_threads,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}
