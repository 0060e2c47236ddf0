//! Bounding-box position/size gate.
//!
//! Depth statistics only mean something when the face sits where the zones
//! expect it. The gate requires all four box components to be in band before
//! any pixel work is done.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::calibration::{CalibrationTable, Metric, MetricReading};
use crate::frame::FaceBox;

/// Box geometry in display orientation.
///
/// The detector reports boxes in the rotated capture frame, so the display's
/// horizontal offset is the box's `min_y` and the vertical offset its `min_x`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxGeometry {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl From<FaceBox> for BoxGeometry {
    fn from(b: FaceBox) -> Self {
        Self {
            x: b.min_y,
            y: b.min_x,
            width: b.width,
            height: b.height,
        }
    }
}

/// Outcome of gating one face box. Readings are always filled in, even when
/// the box is rejected, so overlays can show why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    pub geometry: BoxGeometry,
    pub readings: [MetricReading; 4],
    pub allowed: bool,
}

impl GateReport {
    /// Readings that fell outside their band.
    pub fn rejections(&self) -> impl Iterator<Item = &MetricReading> {
        self.readings.iter().filter(|r| !r.is_match())
    }
}

#[derive(Debug, Clone)]
pub struct BoundingBoxGate {
    calibration: Arc<CalibrationTable>,
}

impl BoundingBoxGate {
    pub fn new(calibration: Arc<CalibrationTable>) -> Self {
        Self { calibration }
    }

    pub fn evaluate(&self, face_box: FaceBox) -> GateReport {
        let geometry = BoxGeometry::from(face_box);
        let readings = [
            self.calibration.reading(Metric::BoxX, geometry.x),
            self.calibration.reading(Metric::BoxY, geometry.y),
            self.calibration.reading(Metric::BoxWidth, geometry.width),
            self.calibration.reading(Metric::BoxHeight, geometry.height),
        ];
        let allowed = readings.iter().all(MetricReading::is_match);
        GateReport {
            geometry,
            readings,
            allowed,
        }
    }

    pub fn is_allowed(&self, face_box: FaceBox) -> bool {
        self.evaluate(face_box).allowed
    }
}
