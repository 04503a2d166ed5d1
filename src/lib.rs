pub mod dispatch;
pub mod error;
pub mod models;
pub mod recording;
pub mod sensing;
pub mod sensors;
pub mod settings;
mod utils;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

pub use dispatch::{DispatchHandle, Dispatcher};
pub use error::{SuiteError, SuiteResult};
pub use recording::{BufferedLog, LogConfig};
pub use sensing::{SamplingScheduler, SuiteController, SuiteStatus};
pub use settings::{SettingsStore, SuiteSettings};

/// Record sensor data into a session CSV until the duration elapses or
/// Ctrl-C is pressed.
#[derive(Debug, Parser)]
#[command(name = "sensor-suite", version, about)]
pub struct Cli {
    /// Settings file (JSON). Created with defaults on first run.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Subject identifier; a random one is generated when omitted.
    #[arg(long)]
    pub subject: Option<String>,

    /// Stop after this many seconds.
    #[arg(long)]
    pub duration: Option<f64>,

    /// Overrides the output root from the settings file.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Debug-level logging.
    #[arg(long)]
    pub debug: bool,
}

pub async fn run(cli: Cli) -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    let level = if cli.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    log::info!("Sensor suite starting up...");

    let settings_path = cli
        .config
        .clone()
        .unwrap_or_else(settings::default_settings_path);
    let store = SettingsStore::new(settings_path)?;
    if !store.path().exists() {
        store.update(store.get())?;
        log::info!("Wrote default settings to {}", store.path().display());
    }

    let mut settings = store.get();
    if let Some(dir) = cli.output_dir.clone() {
        settings.output_dir = Some(dir);
    }
    log::info!("Output root: {}", settings.output_root().display());

    let (rig, _capabilities) = sensors::simulated::simulated_rig();
    let controller = SuiteController::spawn(settings, rig)?;

    let session = controller
        .start_collection(cli.subject.clone())
        .await
        .context("failed to start data collection")?;
    log::info!("Recording to {}", session.file_path.display());

    let limit = cli
        .duration
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(Duration::from_secs_f64);

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl-C")?;
            log::info!("Interrupted; flushing and stopping");
            controller.safety_flush()?;
        }
        _ = async {
            match limit {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        } => {
            log::info!("Recording duration reached");
        }
    }

    let status = controller.status().await?;
    controller.stop_collection().await?;
    log::info!(
        "Collected {} samples ({} log flushes)",
        status.collection.total_samples,
        status.log.flush_count
    );

    tokio::task::spawn_blocking(move || controller.shutdown())
        .await
        .context("failed to join controller shutdown")?;
    Ok(())
}
