use thiserror::Error;

use crate::frame::{FaceBox, VideoFrame};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectorError {
    #[error("unsupported pixel format for face detection: {0:?}")]
    UnsupportedFormat(crate::frame::PixelFormat),
    #[error("video frame buffer too small: expected {expected} bytes, got {got}")]
    ShortBuffer { expected: usize, got: usize },
    #[error("face detection request failed: {0}")]
    Failed(String),
}

/// A 2-D face-rectangle detector.
///
/// Returns at most one face per frame, in normalized coordinates of the
/// rotated capture frame. Called once per video frame from the coordinator
/// thread, so implementations may keep per-sequence state.
pub trait FaceRectDetector: Send + 'static {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Option<FaceBox>, DetectorError>;
}

