use std::path::PathBuf;

use depthgate_core::{DepthUnit, EvaluationMode};
use depthgate_hw::CameraKind;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Camera selected at startup.
    pub camera: CameraKind,
    /// Unit depth buffers are evaluated in.
    pub depth_unit: DepthUnit,
    /// Single-zone (distance only) or two-zone (distance + differential).
    pub mode: EvaluationMode,
    /// Depth frames skipped between full evaluations while a face is seen.
    pub debounce_frames: u32,
    /// Capacity of the capture event queue; frames beyond it are dropped.
    pub frame_queue: usize,
    /// Optional TOML file overlaying the default calibration bands.
    pub calibration_path: Option<PathBuf>,
    /// Frame rate of the simulated camera.
    pub sim_fps: u32,
    /// Whether the daemon is running on the session bus (development mode).
    pub session_bus: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: CameraKind::FrontTrueDepth,
            depth_unit: DepthUnit::Depth,
            mode: EvaluationMode::SingleZone,
            debounce_frames: 10,
            frame_queue: 8,
            calibration_path: None,
            sim_fps: 30,
            session_bus: false,
        }
    }
}

impl Config {
    /// Load configuration from `DEPTHGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            camera: parsed(&lookup, "DEPTHGATE_CAMERA", defaults.camera),
            depth_unit: parsed(&lookup, "DEPTHGATE_DEPTH_UNIT", defaults.depth_unit),
            mode: parsed(&lookup, "DEPTHGATE_MODE", defaults.mode),
            debounce_frames: parsed(&lookup, "DEPTHGATE_DEBOUNCE_FRAMES", defaults.debounce_frames),
            frame_queue: parsed(&lookup, "DEPTHGATE_FRAME_QUEUE", defaults.frame_queue).max(1),
            calibration_path: lookup("DEPTHGATE_CALIBRATION").map(PathBuf::from),
            sim_fps: parsed(&lookup, "DEPTHGATE_SIM_FPS", defaults.sim_fps).clamp(1, 240),
            session_bus: lookup("DEPTHGATE_SESSION_BUS").is_some(),
        }
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            default
        }),
        None => default,
    }
}
