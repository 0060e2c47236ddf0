//! `depthgate evaluate` — run the liveness pipeline on a recorded depth buffer.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use depthgate_core::{
    BoundingBoxGate, CalibrationTable, DepthBuffer, DepthUnit, EvaluationMode, FaceBox,
    GateReport, LivenessClassifier, LivenessResult, RowScanStatistics, ZoneLayout, ZoneMeans,
    ZoneStatistics,
};
use serde::Serialize;

/// What one offline evaluation produced.
#[derive(Debug, Serialize)]
pub struct EvaluationReport {
    pub is_face_detected: bool,
    pub unit: DepthUnit,
    pub mode: EvaluationMode,
    pub gate: GateReport,
    /// Absent when the gate rejected the box.
    pub zone_means: Option<ZoneMeans>,
    pub liveness: LivenessResult,
}

/// Parse `x,y,w,h` in normalized capture coordinates.
pub fn parse_face_box(s: &str) -> Result<FaceBox, String> {
    let parts: Vec<f32> = s
        .split(',')
        .map(|p| p.trim().parse::<f32>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid face box '{s}': {e}"))?;
    match parts.as_slice() {
        [x, y, w, h] => Ok(FaceBox::new(*x, *y, *w, *h)),
        _ => Err(format!("face box needs 4 values (x,y,w,h), got {}", parts.len())),
    }
}

/// Gate the box, then measure and classify the buffer when the gate allows it.
pub fn evaluate_buffer(
    buffer: &DepthBuffer,
    face: FaceBox,
    unit: DepthUnit,
    mode: EvaluationMode,
    calibration: Arc<CalibrationTable>,
) -> Result<EvaluationReport> {
    let gate = BoundingBoxGate::new(Arc::clone(&calibration)).evaluate(face);
    if !gate.allowed {
        return Ok(EvaluationReport {
            is_face_detected: false,
            unit,
            mode,
            gate,
            zone_means: None,
            liveness: LivenessResult::rejected(),
        });
    }

    let layout = match mode {
        EvaluationMode::SingleZone => ZoneLayout::head_only(),
        EvaluationMode::TwoZone => ZoneLayout::head_and_outer(),
    };
    let converted = buffer.to_unit(unit);
    let means = RowScanStatistics
        .compute(&converted, &layout)
        .context("zone measurement failed")?;
    let liveness = LivenessClassifier::new(calibration)
        .classify_means(&means, unit, mode)
        .context("zone classification failed")?;

    Ok(EvaluationReport {
        is_face_detected: liveness.is_live,
        unit,
        mode,
        gate,
        zone_means: Some(means),
        liveness,
    })
}

/// Load a raw little-endian f32 dump from disk.
pub fn load_buffer(path: &Path, width: usize, height: usize, stored: DepthUnit) -> Result<DepthBuffer> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    DepthBuffer::from_le_bytes(width, height, stored, &bytes)
        .with_context(|| format!("{} is not a {width}x{height} f32 buffer", path.display()))
}
