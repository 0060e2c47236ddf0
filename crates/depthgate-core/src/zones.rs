//! Zone partitioning and per-zone depth means.
//!
//! Zones are normalized rectangles over the (rotated) depth buffer. A pixel
//! belongs to a zone when its centre lies in the half-open rectangle
//! `[min, min + size)` on both axes; the same rule is used everywhere.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::depth::DepthBuffer;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ZoneError {
    #[error("zone '{zone}' selects no samples in a {width}x{height} buffer")]
    NoSamples {
        zone: String,
        width: usize,
        height: usize,
    },
    #[error("zone layout has no {0:?} zone")]
    MissingRole(ZoneRole),
}

/// Axis-aligned rectangle in normalized `[0, 1]` coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub min_x: f32,
    pub min_y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedRect {
    pub fn new(min_x: f32, min_y: f32, width: f32, height: f32) -> Self {
        Self {
            min_x,
            min_y,
            width,
            height,
        }
    }

    /// Rectangle spanning `[x0, x1) × [y0, y1)`.
    pub fn from_bounds(x0: f32, x1: f32, y0: f32, y1: f32) -> Self {
        Self::new(x0, y0, x1 - x0, y1 - y0)
    }

    /// Column range of pixels whose centres fall inside the rectangle.
    pub fn columns(&self, width: usize) -> Range<usize> {
        pixel_span(self.min_x, self.width, width)
    }

    /// Row range of pixels whose centres fall inside the rectangle.
    pub fn rows(&self, height: usize) -> Range<usize> {
        pixel_span(self.min_y, self.height, height)
    }
}

fn pixel_span(min: f32, size: f32, extent: usize) -> Range<usize> {
    // Pixel i has its centre at (i + 0.5) / extent.
    let e = extent as f64;
    let lo = (min as f64 * e - 0.5).ceil().max(0.0) as usize;
    let hi = ((min as f64 + size as f64) * e - 0.5).ceil().max(0.0) as usize;
    let lo = lo.min(extent);
    lo..hi.clamp(lo, extent)
}

/// What a zone measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneRole {
    /// Where the face is expected.
    Head,
    /// Background beside the face.
    Outer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    pub role: ZoneRole,
    pub rect: NormalizedRect,
}

impl Zone {
    pub fn new(name: impl Into<String>, role: ZoneRole, rect: NormalizedRect) -> Self {
        Self {
            name: name.into(),
            role,
            rect,
        }
    }

    fn spans(&self, buffer: &DepthBuffer) -> Result<(Range<usize>, Range<usize>), ZoneError> {
        let cols = self.rect.columns(buffer.width());
        let rows = self.rect.rows(buffer.height());
        if cols.is_empty() || rows.is_empty() {
            return Err(ZoneError::NoSamples {
                zone: self.name.clone(),
                width: buffer.width(),
                height: buffer.height(),
            });
        }
        Ok((cols, rows))
    }
}

/// An ordered set of zones evaluated together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneLayout {
    pub zones: Vec<Zone>,
}

impl ZoneLayout {
    /// Central fifth horizontally, central third vertically (buffer axes).
    pub fn head_only() -> Self {
        Self {
            zones: vec![head_zone()],
        }
    }

    /// Head zone plus two background strips either side of it.
    ///
    /// The buffer is rotated, so the display's left/right is the buffer's
    /// y axis: the outer strips share the head's columns and take the first
    /// and last fifth of the rows.
    pub fn head_and_outer() -> Self {
        Self {
            zones: vec![
                head_zone(),
                Zone::new(
                    "leftOuter",
                    ZoneRole::Outer,
                    NormalizedRect::from_bounds(2.0 / 5.0, 3.0 / 5.0, 0.0, 1.0 / 5.0),
                ),
                Zone::new(
                    "rightOuter",
                    ZoneRole::Outer,
                    NormalizedRect::from_bounds(2.0 / 5.0, 3.0 / 5.0, 4.0 / 5.0, 1.0),
                ),
            ],
        }
    }

    /// Check that every zone selects at least one pixel at this resolution.
    pub fn validate_for(&self, width: usize, height: usize) -> Result<(), ZoneError> {
        for zone in &self.zones {
            if zone.rect.columns(width).is_empty() || zone.rect.rows(height).is_empty() {
                return Err(ZoneError::NoSamples {
                    zone: zone.name.clone(),
                    width,
                    height,
                });
            }
        }
        Ok(())
    }
}

fn head_zone() -> Zone {
    Zone::new(
        "head",
        ZoneRole::Head,
        NormalizedRect::from_bounds(2.0 / 5.0, 3.0 / 5.0, 1.0 / 3.0, 2.0 / 3.0),
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneMean {
    pub name: String,
    pub role: ZoneRole,
    pub mean: f32,
    pub samples: usize,
}

/// Means for one buffer: per zone, plus pooled per role.
///
/// Role means pool the samples of every zone with that role, so two outer
/// strips of different sizes are weighted by pixel count.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ZoneMeans {
    pub zones: Vec<ZoneMean>,
    pub head: Option<f32>,
    pub outer: Option<f32>,
}

impl ZoneMeans {
    pub fn head(&self) -> Result<f32, ZoneError> {
        self.head.ok_or(ZoneError::MissingRole(ZoneRole::Head))
    }

    pub fn outer(&self) -> Result<f32, ZoneError> {
        self.outer.ok_or(ZoneError::MissingRole(ZoneRole::Outer))
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.zones.iter().find(|z| z.name == name).map(|z| z.mean)
    }
}

/// Computes zone means for a buffer.
pub trait ZoneStatistics: Send + Sync {
    fn compute(&self, buffer: &DepthBuffer, layout: &ZoneLayout) -> Result<ZoneMeans, ZoneError>;
}

/// Arithmetic mean of the samples selected by `zone`.
pub fn compute_zone_mean(buffer: &DepthBuffer, zone: &Zone) -> Result<f32, ZoneError> {
    let (cols, rows) = zone.spans(buffer)?;
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for y in rows {
        for &v in &buffer.row(y)[cols.clone()] {
            sum += v as f64;
            count += 1;
        }
    }
    Ok((sum / count as f64) as f32)
}

/// Single pass over the rows touched by any zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowScanStatistics;

impl ZoneStatistics for RowScanStatistics {
    fn compute(&self, buffer: &DepthBuffer, layout: &ZoneLayout) -> Result<ZoneMeans, ZoneError> {
        let spans = layout
            .zones
            .iter()
            .map(|z| z.spans(buffer))
            .collect::<Result<Vec<_>, _>>()?;

        let mut sums = vec![0.0f64; spans.len()];
        let mut counts = vec![0usize; spans.len()];

        let first_row = spans.iter().map(|(_, r)| r.start).min().unwrap_or(0);
        let last_row = spans.iter().map(|(_, r)| r.end).max().unwrap_or(0);

        for y in first_row..last_row {
            let row = buffer.row(y);
            for (i, (cols, rows)) in spans.iter().enumerate() {
                if !rows.contains(&y) {
                    continue;
                }
                sums[i] += row[cols.clone()].iter().map(|&v| v as f64).sum::<f64>();
                counts[i] += cols.len();
            }
        }

        let mut means = ZoneMeans::default();
        let mut role_sums = [0.0f64; 2];
        let mut role_counts = [0usize; 2];
        for (i, zone) in layout.zones.iter().enumerate() {
            let slot = match zone.role {
                ZoneRole::Head => 0,
                ZoneRole::Outer => 1,
            };
            role_sums[slot] += sums[i];
            role_counts[slot] += counts[i];
            means.zones.push(ZoneMean {
                name: zone.name.clone(),
                role: zone.role,
                mean: (sums[i] / counts[i] as f64) as f32,
                samples: counts[i],
            });
        }
        let pooled = |slot: usize| {
            (role_counts[slot] > 0).then(|| (role_sums[slot] / role_counts[slot] as f64) as f32)
        };
        means.head = pooled(0);
        means.outer = pooled(1);
        Ok(means)
    }
}
