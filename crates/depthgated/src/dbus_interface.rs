use std::sync::Arc;

use depthgate_core::{DepthUnit, EvaluationMode};
use depthgate_hw::CameraKind;
use zbus::interface;

use crate::config::Config;
use crate::coordinator::CoordinatorHandle;
use crate::session::{SessionError, SessionHandle};

/// Shared state accessible by D-Bus method handlers.
///
/// Both handles are clone-safe channels into their worker threads, so no
/// lock is needed here.
pub struct AppState {
    pub config: Config,
    pub coordinator: CoordinatorHandle,
    pub session: SessionHandle,
}

/// D-Bus interface for the depth liveness daemon.
///
/// Bus name: org.freedesktop.DepthGate1
/// Object path: /org/freedesktop/DepthGate1
pub struct DepthGateService {
    pub state: Arc<AppState>,
}

fn session_error(e: SessionError) -> zbus::fdo::Error {
    match e {
        SessionError::NotAuthorized => zbus::fdo::Error::AccessDenied(e.to_string()),
        SessionError::Camera(ref camera) if camera.is_authorization() => {
            zbus::fdo::Error::AccessDenied(e.to_string())
        }
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

#[interface(name = "org.freedesktop.DepthGate1")]
impl DepthGateService {
    /// Return session and detection state as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let session = self.state.session.state();
        let detection = self.state.coordinator.snapshot();

        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "session": session,
            "detection": detection,
            "debounce_frames": self.state.config.debounce_frames,
        })
        .to_string())
    }

    /// Switch capture to the `front` or `rear` camera.
    ///
    /// The detection cycle restarts either way, so no result from the old
    /// camera survives the switch.
    async fn switch_camera(&self, camera: &str) -> zbus::fdo::Result<()> {
        tracing::info!(camera, "switch_camera requested");
        let kind: CameraKind = camera.parse().map_err(zbus::fdo::Error::InvalidArgs)?;

        let switched = self.state.session.switch_camera(kind).await;

        // Capture was stopped or moved whether or not the switch succeeded.
        self.state
            .coordinator
            .reset()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;

        switched.map_err(|e| {
            tracing::warn!(error = %e, camera = kind.as_str(), "switch_camera failed");
            session_error(e)
        })
    }

    /// Evaluate subsequent depth frames as `depth` or `disparity`.
    async fn set_depth_unit(&self, unit: &str) -> zbus::fdo::Result<()> {
        tracing::info!(unit, "set_depth_unit requested");
        let unit: DepthUnit = unit.parse().map_err(zbus::fdo::Error::InvalidArgs)?;
        self.state
            .coordinator
            .set_depth_unit(unit)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Select `single` (distance only) or `two-zone` (distance and
    /// head/outer differential) evaluation.
    async fn set_mode(&self, mode: &str) -> zbus::fdo::Result<()> {
        tracing::info!(mode, "set_mode requested");
        let mode: EvaluationMode = mode.parse().map_err(zbus::fdo::Error::InvalidArgs)?;
        self.state
            .coordinator
            .set_mode(mode)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Clear the currently reported camera error.
    async fn dismiss_error(&self) -> zbus::fdo::Result<()> {
        tracing::debug!("dismiss_error requested");
        self.state
            .session
            .dismiss_error()
            .await
            .map_err(session_error)
    }
}
