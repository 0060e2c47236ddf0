//! Depth-band liveness classification.
//!
//! A flat photograph or screen held in front of a depth camera has roughly the
//! same depth everywhere, while a live head is measurably closer to the camera
//! than its surroundings. This module classifies zone means against the
//! calibration table and declares the subject live only when every required
//! metric is in band.
//!
//! Two evaluation modes share one table:
//!
//! - **Single zone:** the head-zone mean must sit in the `depth` (or
//!   `disparity`) band, i.e. the face is at the calibrated distance.
//! - **Two zone:** the head mean must sit in the `innerDepth` band AND the
//!   differential `head - outer` must sit in the `depthDiff` band.
//!
//! # Threat Coverage
//!
//! - **Blocks (two zone):** printed photographs and screens, which have no
//!   head/background depth differential.
//! - **Does not block:** 3D masks or head models at the calibrated distance.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::calibration::{CalibrationTable, Metric, MetricReading};
use crate::depth::DepthUnit;
use crate::zones::{ZoneError, ZoneMeans};

/// Which metrics decide liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvaluationMode {
    /// Head-zone mean only.
    #[default]
    SingleZone,
    /// Head-zone mean plus head/outer differential.
    TwoZone,
}

impl std::str::FromStr for EvaluationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" | "single-zone" => Ok(EvaluationMode::SingleZone),
            "two-zone" | "two_zone" | "twozone" => Ok(EvaluationMode::TwoZone),
            other => Err(format!("unknown evaluation mode '{other}' (expected single or two-zone)")),
        }
    }
}

/// Result of a depth liveness check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessResult {
    /// Whether every required metric matched its band (true = likely live).
    pub is_live: bool,
    /// The metrics that decided the result, in evaluation order.
    pub readings: Vec<MetricReading>,
}

impl LivenessResult {
    /// Result for a frame that never reached evaluation.
    pub fn rejected() -> Self {
        Self {
            is_live: false,
            readings: Vec::new(),
        }
    }

    pub fn reading(&self, metric: Metric) -> Option<&MetricReading> {
        self.readings.iter().find(|r| r.metric == metric)
    }
}

/// Stateless classifier over a shared calibration table.
#[derive(Debug, Clone)]
pub struct LivenessClassifier {
    calibration: Arc<CalibrationTable>,
}

impl LivenessClassifier {
    pub fn new(calibration: Arc<CalibrationTable>) -> Self {
        Self { calibration }
    }

    /// Classify a single head-zone mean.
    pub fn classify(&self, depth_mean: f32, unit: DepthUnit) -> LivenessResult {
        self.decide(vec![self
            .calibration
            .reading(Metric::zone_mean(unit), depth_mean)])
    }

    /// Classify a head mean against its surroundings.
    pub fn classify_two_zone(&self, head_mean: f32, outer_mean: f32, unit: DepthUnit) -> LivenessResult {
        let diff = head_mean - outer_mean;
        self.decide(vec![
            self.calibration.reading(Metric::inner(unit), head_mean),
            self.calibration.reading(Metric::diff(unit), diff),
        ])
    }

    /// Classify the means of one buffer according to `mode`.
    pub fn classify_means(
        &self,
        means: &ZoneMeans,
        unit: DepthUnit,
        mode: EvaluationMode,
    ) -> Result<LivenessResult, ZoneError> {
        let head = means.head()?;
        Ok(match mode {
            EvaluationMode::SingleZone => self.classify(head, unit),
            EvaluationMode::TwoZone => self.classify_two_zone(head, means.outer()?, unit),
        })
    }

    fn decide(&self, readings: Vec<MetricReading>) -> LivenessResult {
        LivenessResult {
            is_live: readings.iter().all(MetricReading::is_match),
            readings,
        }
    }
}
