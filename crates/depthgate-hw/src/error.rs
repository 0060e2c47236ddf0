use thiserror::Error;

/// Failure opening a physical device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device is in use by another client")]
    Busy,
    #[error("device disconnected")]
    Disconnected,
}

/// User-facing camera errors. Descriptions are stable and shown verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("Camera unavailable")]
    CameraUnavailable,
    #[error("Cannot add capture input to session")]
    CannotAddInput,
    #[error("Cannot add video output to session")]
    CannotAddOutput,
    #[error("Creating capture input for camera: {0}")]
    CreateCaptureInput(#[source] DeviceError),
    #[error("Camera access denied")]
    DeniedAuthorization,
    #[error("Attempting to access a restricted capture device")]
    RestrictedAuthorization,
    #[error("Unknown authorization status for capture device")]
    UnknownAuthorization,
}

impl CameraError {
    /// Stable machine-readable identifier.
    pub fn code(&self) -> &'static str {
        match self {
            CameraError::CameraUnavailable => "cameraUnavailable",
            CameraError::CannotAddInput => "cannotAddInput",
            CameraError::CannotAddOutput => "cannotAddOutput",
            CameraError::CreateCaptureInput(_) => "createCaptureInput",
            CameraError::DeniedAuthorization => "deniedAuthorization",
            CameraError::RestrictedAuthorization => "restrictedAuthorization",
            CameraError::UnknownAuthorization => "unknownAuthorization",
        }
    }

    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            CameraError::DeniedAuthorization
                | CameraError::RestrictedAuthorization
                | CameraError::UnknownAuthorization
        )
    }
}
