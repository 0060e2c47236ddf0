use std::sync::Arc;

use depthgate_core::{DepthFrame, VideoFrame};
use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// Physical camera to capture from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CameraKind {
    /// Front-facing structured-light depth camera.
    #[default]
    FrontTrueDepth,
    /// Rear dual (stereo) camera.
    RearDual,
}

impl CameraKind {
    /// The rear camera faces away from the user, so its video and depth
    /// connections are mirrored to match the front camera's view.
    pub fn requires_mirroring(&self) -> bool {
        matches!(self, CameraKind::RearDual)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CameraKind::FrontTrueDepth => "front",
            CameraKind::RearDual => "rear",
        }
    }
}

impl std::str::FromStr for CameraKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "front" | "front-true-depth" => Ok(CameraKind::FrontTrueDepth),
            "rear" | "rear-dual" => Ok(CameraKind::RearDual),
            other => Err(format!("unknown camera '{other}' (expected front or rear)")),
        }
    }
}

/// Camera permission state as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthorizationStatus {
    NotDetermined,
    Authorized,
    Restricted,
    Denied,
}

/// Resolved physical device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId {
    pub kind: CameraKind,
    pub name: String,
}

/// An opened device ready to be attached to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInput {
    pub device: DeviceId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Video,
    Depth,
}

/// Per-output connection settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    pub enabled: bool,
    pub mirrored: bool,
    pub rotation_degrees: u16,
}

/// A frame pushed by the backend. Video and depth arrive independently.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    Video(VideoFrame),
    Depth(DepthFrame),
}

/// Receiver of capture events.
///
/// Called on backend capture threads; implementations must not block.
pub trait FrameSink: Send + Sync + 'static {
    fn deliver(&self, event: CaptureEvent);
}

/// Called exactly once with the user's answer, or dropped if the platform
/// never answers.
pub type AccessResponder = Box<dyn FnOnce(bool) + Send + 'static>;

/// A capture session: permission, inputs, outputs and run state.
///
/// Mutating calls other than start/stop are expected between
/// [`begin_configuration`](Self::begin_configuration) and
/// [`commit_configuration`](Self::commit_configuration). All calls come from
/// the single session worker thread.
pub trait CaptureBackend: Send + 'static {
    fn authorization_status(&self) -> AuthorizationStatus;
    fn request_access(&mut self, responder: AccessResponder);

    fn find_device(&self, kind: CameraKind) -> Option<DeviceId>;
    fn open_input(&mut self, device: &DeviceId) -> Result<DeviceInput, DeviceError>;
    fn can_add_input(&self, input: &DeviceInput) -> bool;
    fn add_input(&mut self, input: DeviceInput);
    fn remove_all_inputs(&mut self);
    fn input_count(&self) -> usize;

    fn has_output(&self, kind: OutputKind) -> bool;
    fn can_add_output(&self, kind: OutputKind) -> bool;
    fn add_output(&mut self, kind: OutputKind);
    fn remove_output(&mut self, kind: OutputKind);
    fn configure_connection(&mut self, kind: OutputKind, settings: ConnectionSettings);

    fn begin_configuration(&mut self);
    fn commit_configuration(&mut self);

    fn is_running(&self) -> bool;
    fn start_running(&mut self);
    /// Stop capture. Returns once no further events will be delivered.
    fn stop_running(&mut self);

    fn set_frame_sink(&mut self, sink: Arc<dyn FrameSink>);
}
