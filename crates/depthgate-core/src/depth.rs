use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unit of the samples stored in a [`DepthBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepthUnit {
    /// Linear distance in meters.
    #[default]
    Depth,
    /// Inverse distance (1/m).
    Disparity,
}

impl DepthUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepthUnit::Depth => "depth",
            DepthUnit::Disparity => "disparity",
        }
    }
}

impl std::str::FromStr for DepthUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "depth" => Ok(DepthUnit::Depth),
            "disparity" => Ok(DepthUnit::Disparity),
            other => Err(format!("unknown depth unit '{other}' (expected depth or disparity)")),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DepthBufferError {
    #[error("depth buffer has zero dimension ({width}x{height})")]
    EmptyDimensions { width: usize, height: usize },
    #[error("depth buffer size mismatch: {width}x{height} needs {expected} samples, got {got}")]
    SizeMismatch {
        width: usize,
        height: usize,
        expected: usize,
        got: usize,
    },
    #[error("depth buffer dimensions {width}x{height} overflow the sample count")]
    TooLarge { width: usize, height: usize },
    #[error("raw depth dump length {0} is not a multiple of 4 bytes")]
    UnalignedBytes(usize),
}

fn sample_count(width: usize, height: usize) -> Result<usize, DepthBufferError> {
    if width == 0 || height == 0 {
        return Err(DepthBufferError::EmptyDimensions { width, height });
    }
    width
        .checked_mul(height)
        .ok_or(DepthBufferError::TooLarge { width, height })
}

/// A row-major grid of 32-bit depth or disparity samples.
///
/// The grid is rotated 90° counter-clockwise relative to what the user sees on
/// screen: a horizontal pan of the subject moves along the buffer's y axis.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthBuffer {
    width: usize,
    height: usize,
    unit: DepthUnit,
    samples: Vec<f32>,
}

impl DepthBuffer {
    pub fn new(
        width: usize,
        height: usize,
        unit: DepthUnit,
        samples: Vec<f32>,
    ) -> Result<Self, DepthBufferError> {
        let expected = sample_count(width, height)?;
        if samples.len() != expected {
            return Err(DepthBufferError::SizeMismatch {
                width,
                height,
                expected,
                got: samples.len(),
            });
        }
        Ok(Self {
            width,
            height,
            unit,
            samples,
        })
    }

    /// Buffer with every sample set to `value`.
    pub fn filled(
        width: usize,
        height: usize,
        unit: DepthUnit,
        value: f32,
    ) -> Result<Self, DepthBufferError> {
        let count = sample_count(width, height)?;
        Self::new(width, height, unit, vec![value; count])
    }

    /// Decode a raw dump of little-endian `f32` samples.
    pub fn from_le_bytes(
        width: usize,
        height: usize,
        unit: DepthUnit,
        bytes: &[u8],
    ) -> Result<Self, DepthBufferError> {
        if bytes.len() % 4 != 0 {
            return Err(DepthBufferError::UnalignedBytes(bytes.len()));
        }
        let samples = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self::new(width, height, unit, samples)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn unit(&self) -> DepthUnit {
        self.unit
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// One row of samples.
    pub fn row(&self, y: usize) -> &[f32] {
        let start = y * self.width;
        &self.samples[start..start + self.width]
    }

    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.samples[y * self.width + x])
    }

    /// Re-express the buffer in `unit`.
    ///
    /// Depth and disparity are reciprocals. Samples that are not strictly
    /// positive and finite have no reciprocal and become NaN holes.
    pub fn to_unit(&self, unit: DepthUnit) -> DepthBuffer {
        if unit == self.unit {
            return self.clone();
        }
        let samples = self
            .samples
            .iter()
            .map(|&v| {
                if v.is_finite() && v > 0.0 {
                    1.0 / v
                } else {
                    f32::NAN
                }
            })
            .collect();
        DepthBuffer {
            width: self.width,
            height: self.height,
            unit,
            samples,
        }
    }
}
