use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::depth::DepthBuffer;

/// Pixel layout of a [`VideoFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 32-bit BGRA, 4 bytes per pixel.
    Bgra8,
    /// 8-bit luminance.
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Bgra8 => 4,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// A colour/IR frame as delivered by the capture backend.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
    /// Presentation timestamp relative to session start.
    pub timestamp: Duration,
}

/// A depth delivery. `buffer` is `None` when the backend could not lock or
/// read the underlying depth map; consumers skip such frames.
#[derive(Debug, Clone)]
pub struct DepthFrame {
    pub buffer: Option<DepthBuffer>,
    pub timestamp: Duration,
}

/// Normalized face rectangle in the rotated capture frame.
///
/// Because capture is rotated 90° counter-clockwise, a physical horizontal
/// pan of the subject changes `min_y`, not `min_x`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceBox {
    pub min_x: f32,
    pub min_y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceBox {
    pub fn new(min_x: f32, min_y: f32, width: f32, height: f32) -> Self {
        Self {
            min_x,
            min_y,
            width,
            height,
        }
    }
}
