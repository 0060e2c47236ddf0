//! Calibrated threshold bands.
//!
//! Every quantity the gate looks at (zone depth, bounding-box geometry, the
//! head/surroundings differential) is a named [`Metric`] mapped to a closed
//! [`Band`]. A single immutable [`CalibrationTable`] holds one band for every
//! metric; all classification goes through it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::depth::DepthUnit;

/// A named, calibrated quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    /// Head-zone mean, depth unit, single-zone evaluation.
    Depth = 0,
    /// Head-zone mean, disparity unit, single-zone evaluation.
    Disparity = 1,
    BoxX = 2,
    BoxY = 3,
    BoxWidth = 4,
    BoxHeight = 5,
    /// Head-zone mean, depth unit, two-zone evaluation.
    InnerDepth = 6,
    /// Head-zone mean, disparity unit, two-zone evaluation.
    InnerDisparity = 7,
    /// `head - outer`, depth unit.
    DepthDiff = 8,
    /// `head - outer`, disparity unit.
    DisparityDiff = 9,
}

impl Metric {
    pub const COUNT: usize = 10;

    pub const ALL: [Metric; Metric::COUNT] = [
        Metric::Depth,
        Metric::Disparity,
        Metric::BoxX,
        Metric::BoxY,
        Metric::BoxWidth,
        Metric::BoxHeight,
        Metric::InnerDepth,
        Metric::InnerDisparity,
        Metric::DepthDiff,
        Metric::DisparityDiff,
    ];

    /// Metric for a single head-zone mean in `unit`.
    pub fn zone_mean(unit: DepthUnit) -> Metric {
        match unit {
            DepthUnit::Depth => Metric::Depth,
            DepthUnit::Disparity => Metric::Disparity,
        }
    }

    /// Metric for the head mean when surroundings are also measured.
    pub fn inner(unit: DepthUnit) -> Metric {
        match unit {
            DepthUnit::Depth => Metric::InnerDepth,
            DepthUnit::Disparity => Metric::InnerDisparity,
        }
    }

    /// Metric for the head/surroundings differential.
    pub fn diff(unit: DepthUnit) -> Metric {
        match unit {
            DepthUnit::Depth => Metric::DepthDiff,
            DepthUnit::Disparity => Metric::DisparityDiff,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Depth => "depth",
            Metric::Disparity => "disparity",
            Metric::BoxX => "boxX",
            Metric::BoxY => "boxY",
            Metric::BoxWidth => "boxWidth",
            Metric::BoxHeight => "boxHeight",
            Metric::InnerDepth => "innerDepth",
            Metric::InnerDisparity => "innerDisparity",
            Metric::DepthDiff => "depthDiff",
            Metric::DisparityDiff => "disparityDiff",
        }
    }

    /// Short caption shown next to the value in diagnostic overlays.
    pub fn label(&self) -> &'static str {
        match self {
            Metric::Depth | Metric::Disparity => "DEPTH:",
            Metric::BoxX => "FACE_X:",
            Metric::BoxY => "FACE_Y:",
            Metric::BoxWidth => "FACE_W:",
            Metric::BoxHeight => "FACE_H:",
            Metric::InnerDepth => "INNER_DEPTH:",
            Metric::InnerDisparity => "INNER_DISPARITY:",
            Metric::DepthDiff => "DEPTH_DIFF:",
            Metric::DisparityDiff => "DISPARITY_DIFF:",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Three-way outcome of comparing a value against a [`Band`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Low,
    Match,
    High,
}

/// Closed interval `[low, high]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub low: f32,
    pub high: f32,
}

impl Band {
    /// Build a band, rejecting inverted or non-finite bounds.
    pub fn new(low: f32, high: f32) -> Result<Self, CalibrationError> {
        let band = Self { low, high };
        band.validate(None)?;
        Ok(band)
    }

    const fn fixed(low: f32, high: f32) -> Self {
        Self { low, high }
    }

    fn validate(&self, metric: Option<Metric>) -> Result<(), CalibrationError> {
        if !self.low.is_finite() || !self.high.is_finite() || self.low > self.high {
            return Err(CalibrationError::InvalidBand {
                metric: metric.map(|m| m.name()).unwrap_or("<unnamed>"),
                low: self.low,
                high: self.high,
            });
        }
        Ok(())
    }

    /// Both bounds are inclusive. NaN never matches.
    pub fn classify(&self, value: f32) -> Classification {
        if value >= self.low && value <= self.high {
            Classification::Match
        } else if value < self.low {
            Classification::Low
        } else {
            Classification::High
        }
    }

    pub fn contains(&self, value: f32) -> bool {
        self.classify(value) == Classification::Match
    }
}

/// One evaluated metric, kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricReading {
    pub metric: Metric,
    pub value: f32,
    pub classification: Classification,
}

impl MetricReading {
    pub fn is_match(&self) -> bool {
        self.classification == Classification::Match
    }

    /// Value formatted with three decimals, as shown in overlays.
    pub fn value_string(&self) -> String {
        format!("{:.3}", self.value)
    }
}

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("invalid calibration band for {metric}: [{low}, {high}]")]
    InvalidBand {
        metric: &'static str,
        low: f32,
        high: f32,
    },
    #[error("failed to parse calibration file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read calibration file: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Baseline bands for the front depth camera at arm's length.
const DEFAULT_BANDS: [Band; Metric::COUNT] = [
    Band::fixed(0.45, 0.8),   // depth (m)
    Band::fixed(1.5, 2.0),    // disparity (1/m)
    Band::fixed(0.15, 0.35),  // boxX
    Band::fixed(0.25, 0.45),  // boxY
    Band::fixed(0.175, 0.35), // boxWidth
    Band::fixed(0.35, 0.55),  // boxHeight
    Band::fixed(0.45, 0.8),   // innerDepth (m)
    Band::fixed(1.5, 2.0),    // innerDisparity (1/m)
    Band::fixed(-3.0, -0.1),  // depthDiff: head at least 10 cm nearer than surroundings
    Band::fixed(0.2, 2.0),    // disparityDiff
];

#[derive(Deserialize)]
struct CalibrationFile {
    #[serde(default)]
    bands: BTreeMap<Metric, Band>,
}

/// Immutable table with exactly one band per [`Metric`].
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTable {
    bands: [Band; Metric::COUNT],
}

impl Default for CalibrationTable {
    fn default() -> Self {
        Self {
            bands: DEFAULT_BANDS,
        }
    }
}

impl CalibrationTable {
    pub fn band(&self, metric: Metric) -> Band {
        self.bands[metric.index()]
    }

    pub fn classify(&self, metric: Metric, value: f32) -> Classification {
        self.band(metric).classify(value)
    }

    pub fn reading(&self, metric: Metric, value: f32) -> MetricReading {
        MetricReading {
            metric,
            value,
            classification: self.classify(metric, value),
        }
    }

    /// Copy of this table with one band replaced.
    pub fn with_band(mut self, metric: Metric, band: Band) -> Result<Self, CalibrationError> {
        band.validate(Some(metric))?;
        self.bands[metric.index()] = band;
        Ok(self)
    }

    /// Overlay the `[bands]` section of a TOML document onto the defaults.
    ///
    /// Metrics the document does not mention keep their default band.
    pub fn from_toml_str(source: &str) -> Result<Self, CalibrationError> {
        let file: CalibrationFile = toml::from_str(source)?;
        let mut table = Self::default();
        for (metric, band) in file.bands {
            table = table.with_band(metric, band)?;
        }
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self, CalibrationError> {
        let source = std::fs::read_to_string(path).map_err(|source| CalibrationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_toml_str(&source)?;
        tracing::debug!(path = %path.display(), "calibration table loaded");
        Ok(table)
    }

    /// All bands keyed by metric, in declaration order.
    pub fn to_map(&self) -> BTreeMap<Metric, Band> {
        Metric::ALL.iter().map(|&m| (m, self.band(m))).collect()
    }
}
