//! depthgate-hw — Capture backend abstraction for depth cameras.
//!
//! Models the capture session the liveness daemon drives (authorization,
//! device inputs, video/depth outputs, start/stop) and the errors it
//! reports. A simulated backend stands in for real hardware during
//! development and tests.

pub mod backend;
pub mod error;
pub mod sim;

pub use backend::{
    AccessResponder, AuthorizationStatus, CameraKind, CaptureBackend, CaptureEvent,
    ConnectionSettings, DeviceId, DeviceInput, FrameSink, OutputKind,
};
pub use error::{CameraError, DeviceError};
pub use sim::{SimConfig, SimProbe, SimulatedBackend, SyntheticFaceDetector, SyntheticScene};
