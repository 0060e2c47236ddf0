use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use depthgate_core::{CalibrationTable, DepthUnit, EvaluationMode, FaceBox};
use tracing_subscriber::EnvFilter;

mod evaluate;

#[zbus::proxy(
    interface = "org.freedesktop.DepthGate1",
    default_service = "org.freedesktop.DepthGate1",
    default_path = "/org/freedesktop/DepthGate1"
)]
trait DepthGate {
    async fn status(&self) -> zbus::Result<String>;
    async fn switch_camera(&self, camera: &str) -> zbus::Result<()>;
    async fn set_depth_unit(&self, unit: &str) -> zbus::Result<()>;
    async fn set_mode(&self, mode: &str) -> zbus::Result<()>;
    async fn dismiss_error(&self) -> zbus::Result<()>;
}

#[derive(Parser)]
#[command(name = "depthgate", version, about = "Depth-gated face liveness")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus.
    #[arg(long, global = true)]
    session_bus: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a raw little-endian f32 depth dump against a face box.
    Evaluate {
        /// Path to the raw buffer.
        input: PathBuf,
        #[arg(long)]
        width: usize,
        #[arg(long)]
        height: usize,
        /// Face box as `x,y,w,h` in the rotated capture frame.
        #[arg(long, value_parser = evaluate::parse_face_box)]
        face: FaceBox,
        /// Unit the samples are stored in.
        #[arg(long, default_value = "depth")]
        stored_unit: DepthUnit,
        /// Unit to evaluate in.
        #[arg(long, default_value = "depth")]
        unit: DepthUnit,
        /// `single` or `two-zone`.
        #[arg(long, default_value = "single")]
        mode: EvaluationMode,
        /// TOML file overlaying the default bands.
        #[arg(long)]
        calibration: Option<PathBuf>,
    },
    /// Print the calibration bands in effect.
    Bands {
        /// TOML file overlaying the default bands.
        calibration: Option<PathBuf>,
    },
    /// Show daemon session and detection state.
    Status,
    /// Switch the daemon to the `front` or `rear` camera.
    SwitchCamera { camera: String },
    /// Evaluate in `depth` or `disparity`.
    SetDepthUnit { unit: String },
    /// Select `single` or `two-zone` evaluation.
    SetMode { mode: String },
    /// Clear the daemon's current camera error.
    DismissError,
}

fn load_calibration(path: Option<&PathBuf>) -> Result<CalibrationTable> {
    match path {
        Some(p) => CalibrationTable::load(p)
            .with_context(|| format!("failed to load calibration from {}", p.display())),
        None => Ok(CalibrationTable::default()),
    }
}

fn print_bands(table: &CalibrationTable) {
    for (metric, band) in table.to_map() {
        println!("  {:<16} [{:.3}, {:.3}]", metric.label(), band.low, band.high);
    }
}

async fn proxy(session_bus: bool) -> Result<DepthGateProxy<'static>> {
    let conn = if session_bus {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("failed to connect to D-Bus")?;
    DepthGateProxy::new(&conn)
        .await
        .context("depthgated is not reachable; is the daemon running?")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let session_bus = cli.session_bus || std::env::var_os("DEPTHGATE_SESSION_BUS").is_some();
    match cli.cmd {
        Commands::Evaluate {
            input,
            width,
            height,
            face,
            stored_unit,
            unit,
            mode,
            calibration,
        } => {
            let table = Arc::new(load_calibration(calibration.as_ref())?);
            let buffer = evaluate::load_buffer(&input, width, height, stored_unit)?;
            let report = evaluate::evaluate_buffer(&buffer, face, unit, mode, table)?;
            tracing::debug!(allowed = report.gate.allowed, live = report.is_face_detected, "evaluated");
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Bands { calibration } => {
            let table = load_calibration(calibration.as_ref())?;
            println!("Calibration bands:");
            print_bands(&table);
        }
        Commands::Status => {
            let status = proxy(session_bus).await?.status().await?;
            let value: serde_json::Value = serde_json::from_str(&status)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::SwitchCamera { camera } => {
            proxy(session_bus).await?.switch_camera(&camera).await?;
            println!("switched to {camera} camera");
        }
        Commands::SetDepthUnit { unit } => {
            proxy(session_bus).await?.set_depth_unit(&unit).await?;
            println!("evaluating in {unit}");
        }
        Commands::SetMode { mode } => {
            proxy(session_bus).await?.set_mode(&mode).await?;
            println!("evaluation mode set to {mode}");
        }
        Commands::DismissError => {
            proxy(session_bus).await?.dismiss_error().await?;
            println!("error dismissed");
        }
    }
    Ok(())
}
