//! depthgate-core — depth-gated face liveness classification.
//!
//! Turns a depth (or disparity) buffer plus a detected face rectangle into a
//! pass/fail liveness decision. Everything in this crate is pure and
//! synchronous; threading and capture lifecycle live in `depthgated`.

pub mod calibration;
pub mod depth;
pub mod detector;
pub mod frame;
pub mod gate;
pub mod liveness;
pub mod zones;

pub use calibration::{Band, CalibrationError, CalibrationTable, Classification, Metric, MetricReading};
pub use depth::{DepthBuffer, DepthBufferError, DepthUnit};
pub use detector::{DetectorError, FaceRectDetector};
pub use frame::{DepthFrame, FaceBox, PixelFormat, VideoFrame};
pub use gate::{BoundingBoxGate, BoxGeometry, GateReport};
pub use liveness::{EvaluationMode, LivenessClassifier, LivenessResult};
pub use zones::{
    compute_zone_mean, NormalizedRect, RowScanStatistics, Zone, ZoneError, ZoneLayout, ZoneMeans,
    ZoneRole, ZoneStatistics,
};
