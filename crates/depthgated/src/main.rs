use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use depthgate_core::{CalibrationTable, RowScanStatistics};
use depthgate_hw::{SimConfig, SimulatedBackend, SyntheticFaceDetector, SyntheticScene};
use tracing_subscriber::EnvFilter;

mod config;
mod coordinator;
mod dbus_interface;
mod session;

use config::Config;
use coordinator::{spawn_coordinator, FrameProcessor, ProcessorSettings};
use dbus_interface::{AppState, DepthGateService};
use session::{reset_detection_on_capture_loss, spawn_session, SessionController};

const BUS_NAME: &str = "org.freedesktop.DepthGate1";
const OBJECT_PATH: &str = "/org/freedesktop/DepthGate1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        camera = config.camera.as_str(),
        unit = config.depth_unit.as_str(),
        mode = ?config.mode,
        debounce_frames = config.debounce_frames,
        "depthgated starting"
    );

    let calibration = match &config.calibration_path {
        Some(path) => CalibrationTable::load(path)
            .with_context(|| format!("failed to load calibration from {}", path.display()))?,
        None => CalibrationTable::default(),
    };
    let calibration = Arc::new(calibration);

    let processor = FrameProcessor::new(
        SyntheticFaceDetector::default(),
        RowScanStatistics,
        Arc::clone(&calibration),
        ProcessorSettings {
            unit: config.depth_unit,
            mode: config.mode,
            debounce_frames: config.debounce_frames,
            layout: None,
        },
    );
    let coordinator =
        spawn_coordinator(processor, config.frame_queue).context("failed to start coordinator")?;

    let backend = SimulatedBackend::new(SimConfig {
        scene: Some(SyntheticScene::default()),
        frame_interval: Duration::from_secs(1) / config.sim_fps,
        ..SimConfig::default()
    });
    let controller = SessionController::new(backend, config.camera, Arc::new(coordinator.clone()));
    let session = spawn_session(controller).context("failed to start session worker")?;
    tokio::spawn(reset_detection_on_capture_loss(
        session.subscribe(),
        coordinator.clone(),
    ));

    // A failed configure is reported through Status and is recoverable via
    // SwitchCamera, so the daemon keeps serving.
    if let Err(e) = session.configure().await {
        tracing::error!(error = %e, "initial camera configuration failed");
    }

    let session_bus = config.session_bus;
    let service = DepthGateService {
        state: Arc::new(AppState {
            config,
            coordinator: coordinator.clone(),
            session,
        }),
    };

    let builder = if session_bus {
        tracing::info!("using session bus (development mode)");
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("failed to acquire bus name {BUS_NAME}"))?;

    tracing::info!(bus_name = BUS_NAME, "depthgated ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("depthgated shutting down");
    if let Err(e) = coordinator.shutdown().await {
        tracing::warn!(error = %e, "coordinator already stopped");
    }

    Ok(())
}
