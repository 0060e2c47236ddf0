//! Simulated depth camera.
//!
//! Behaves like a capture session with configurable permission, devices and
//! failure injection. When given a [`SyntheticScene`] and a frame sink it
//! runs a producer thread that renders a flat background with a nearer
//! rectangular "head". A [`SimProbe`] observes and perturbs the session from
//! outside (tests, development tooling).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use depthgate_core::{
    DepthBuffer, DepthBufferError, DepthFrame, DepthUnit, DetectorError, FaceBox,
    FaceRectDetector, NormalizedRect, PixelFormat, VideoFrame,
};

use crate::backend::{
    AccessResponder, AuthorizationStatus, CameraKind, CaptureBackend, CaptureEvent,
    ConnectionSettings, DeviceId, DeviceInput, FrameSink, OutputKind,
};
use crate::error::DeviceError;

/// What the simulated camera sees.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticScene {
    pub depth_width: usize,
    pub depth_height: usize,
    pub video_width: u32,
    pub video_height: u32,
    /// Face rectangle in the rotated capture frame, or no face.
    pub face: Option<FaceBox>,
    /// Depth (m) inside the face rectangle.
    pub head_depth: f32,
    /// Depth (m) everywhere else.
    pub background_depth: f32,
    /// Deliver every n-th depth frame without a readable buffer (0 = never).
    pub unreadable_every: u32,
}

impl Default for SyntheticScene {
    fn default() -> Self {
        Self {
            depth_width: 320,
            depth_height: 180,
            video_width: 160,
            video_height: 90,
            face: Some(FaceBox::new(0.35, 0.25, 0.25, 0.45)),
            head_depth: 0.6,
            background_depth: 1.4,
            unreadable_every: 0,
        }
    }
}

impl SyntheticScene {
    pub fn depth_buffer(&self) -> Result<DepthBuffer, DepthBufferError> {
        let (w, h) = (self.depth_width, self.depth_height);
        let mut samples = vec![self.background_depth; w * h];
        if let Some(face) = self.face {
            let rect = NormalizedRect::new(face.min_x, face.min_y, face.width, face.height);
            let cols = rect.columns(w);
            for y in rect.rows(h) {
                samples[y * w + cols.start..y * w + cols.end].fill(self.head_depth);
            }
        }
        DepthBuffer::new(w, h, DepthUnit::Depth, samples)
    }

    /// Grey frame: face pixels white, background black.
    pub fn video_frame(&self, timestamp: Duration) -> VideoFrame {
        let (w, h) = (self.video_width as usize, self.video_height as usize);
        let mut data = vec![0u8; w * h];
        if let Some(face) = self.face {
            let rect = NormalizedRect::new(face.min_x, face.min_y, face.width, face.height);
            let cols = rect.columns(w);
            for y in rect.rows(h) {
                data[y * w + cols.start..y * w + cols.end].fill(u8::MAX);
            }
        }
        VideoFrame {
            width: self.video_width,
            height: self.video_height,
            format: PixelFormat::Gray8,
            data,
            timestamp,
        }
    }
}

/// Finds the bounding box of bright pixels in a grey frame.
///
/// Pairs with [`SyntheticScene::video_frame`]; not a real face detector.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticFaceDetector {
    pub threshold: u8,
}

impl Default for SyntheticFaceDetector {
    fn default() -> Self {
        Self { threshold: 128 }
    }
}

impl FaceRectDetector for SyntheticFaceDetector {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Option<FaceBox>, DetectorError> {
        if frame.format != PixelFormat::Gray8 {
            return Err(DetectorError::UnsupportedFormat(frame.format));
        }
        let (w, h) = (frame.width as usize, frame.height as usize);
        let expected = w * h * frame.format.bytes_per_pixel();
        if frame.data.len() < expected {
            return Err(DetectorError::ShortBuffer {
                expected,
                got: frame.data.len(),
            });
        }

        let mut bounds: Option<(usize, usize, usize, usize)> = None;
        for y in 0..h {
            for x in 0..w {
                if frame.data[y * w + x] < self.threshold {
                    continue;
                }
                bounds = Some(match bounds {
                    None => (x, x, y, y),
                    Some((x0, x1, y0, y1)) => (x0.min(x), x1.max(x), y0.min(y), y1.max(y)),
                });
            }
        }

        Ok(bounds.map(|(x0, x1, y0, y1)| {
            FaceBox::new(
                x0 as f32 / w as f32,
                y0 as f32 / h as f32,
                (x1 + 1 - x0) as f32 / w as f32,
                (y1 + 1 - y0) as f32 / h as f32,
            )
        }))
    }
}

/// Initial behaviour of a [`SimulatedBackend`].
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub authorization: AuthorizationStatus,
    /// Answer given to a permission request; `None` never answers.
    pub access_response: Option<bool>,
    pub devices: Vec<CameraKind>,
    pub scene: Option<SyntheticScene>,
    pub frame_interval: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            authorization: AuthorizationStatus::Authorized,
            access_response: Some(true),
            devices: vec![CameraKind::FrontTrueDepth, CameraKind::RearDual],
            scene: None,
            frame_interval: Duration::from_millis(33),
        }
    }
}

#[derive(Debug)]
struct SimState {
    authorization: AuthorizationStatus,
    access_response: Option<bool>,
    devices: Vec<CameraKind>,
    busy: Vec<CameraKind>,
    reject_inputs: bool,
    drop_inputs: bool,
    rejected_outputs: Vec<OutputKind>,
    scene: Option<SyntheticScene>,

    inputs: Vec<DeviceInput>,
    outputs: Vec<OutputKind>,
    connections: HashMap<OutputKind, ConnectionSettings>,
    running: bool,
    in_transaction: bool,

    access_requests: u32,
    begin_count: u32,
    commit_count: u32,
    open_attempts: u32,
    start_count: u32,
    stop_count: u32,
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Producer {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct SimulatedBackend {
    state: Arc<Mutex<SimState>>,
    frame_interval: Duration,
    sink: Option<Arc<dyn FrameSink>>,
    producer: Option<Producer>,
}

impl SimulatedBackend {
    pub fn new(config: SimConfig) -> Self {
        let state = SimState {
            authorization: config.authorization,
            access_response: config.access_response,
            devices: config.devices,
            busy: Vec::new(),
            reject_inputs: false,
            drop_inputs: false,
            rejected_outputs: Vec::new(),
            scene: config.scene,
            inputs: Vec::new(),
            outputs: Vec::new(),
            connections: HashMap::new(),
            running: false,
            in_transaction: false,
            access_requests: 0,
            begin_count: 0,
            commit_count: 0,
            open_attempts: 0,
            start_count: 0,
            stop_count: 0,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            frame_interval: config.frame_interval,
            sink: None,
            producer: None,
        }
    }

    pub fn probe(&self) -> SimProbe {
        SimProbe {
            state: Arc::clone(&self.state),
        }
    }

    fn spawn_producer(&mut self) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        if lock(&self.state).scene.is_none() {
            return;
        }
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let state = Arc::clone(&self.state);
        let interval = self.frame_interval;

        let spawned = std::thread::Builder::new()
            .name("depthgate-sim-capture".into())
            .spawn(move || {
                tracing::debug!("simulated capture started");
                let started = Instant::now();
                let mut frame_no: u64 = 0;
                while !stop_flag.load(Ordering::SeqCst) {
                    let Some(scene) = lock(&state).scene.clone() else {
                        std::thread::sleep(interval);
                        continue;
                    };
                    frame_no += 1;
                    let timestamp = started.elapsed();
                    sink.deliver(CaptureEvent::Video(scene.video_frame(timestamp)));

                    let unreadable = scene.unreadable_every > 0
                        && frame_no % u64::from(scene.unreadable_every) == 0;
                    let buffer = if unreadable {
                        None
                    } else {
                        scene.depth_buffer().ok()
                    };
                    sink.deliver(CaptureEvent::Depth(DepthFrame { buffer, timestamp }));
                    std::thread::sleep(interval);
                }
                tracing::debug!(frames = frame_no, "simulated capture stopped");
            });

        match spawned {
            Ok(handle) => self.producer = Some(Producer { stop, handle }),
            Err(e) => tracing::error!(error = %e, "failed to spawn simulated capture thread"),
        }
    }

    fn join_producer(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.stop.store(true, Ordering::SeqCst);
            if producer.handle.join().is_err() {
                tracing::warn!("simulated capture thread panicked");
            }
        }
    }
}

impl Drop for SimulatedBackend {
    fn drop(&mut self) {
        self.join_producer();
    }
}

impl CaptureBackend for SimulatedBackend {
    fn authorization_status(&self) -> AuthorizationStatus {
        lock(&self.state).authorization
    }

    fn request_access(&mut self, responder: AccessResponder) {
        let answer = {
            let mut state = lock(&self.state);
            state.access_requests += 1;
            if let Some(granted) = state.access_response {
                state.authorization = if granted {
                    AuthorizationStatus::Authorized
                } else {
                    AuthorizationStatus::Denied
                };
            }
            state.access_response
        };

        let Some(granted) = answer else {
            tracing::debug!("simulated permission prompt left unanswered");
            return;
        };
        // Answer from another thread, as a real permission prompt would.
        let spawned = std::thread::Builder::new()
            .name("depthgate-sim-access".into())
            .spawn(move || responder(granted));
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "failed to spawn permission responder thread");
        }
    }

    fn find_device(&self, kind: CameraKind) -> Option<DeviceId> {
        lock(&self.state).devices.contains(&kind).then(|| DeviceId {
            kind,
            name: format!("Simulated {} camera", kind.as_str()),
        })
    }

    fn open_input(&mut self, device: &DeviceId) -> Result<DeviceInput, DeviceError> {
        let mut state = lock(&self.state);
        state.open_attempts += 1;
        if state.busy.contains(&device.kind) {
            return Err(DeviceError::Busy);
        }
        if !state.devices.contains(&device.kind) {
            return Err(DeviceError::Disconnected);
        }
        Ok(DeviceInput {
            device: device.clone(),
        })
    }

    fn can_add_input(&self, _input: &DeviceInput) -> bool {
        let state = lock(&self.state);
        !state.reject_inputs && state.inputs.is_empty()
    }

    fn add_input(&mut self, input: DeviceInput) {
        let mut state = lock(&self.state);
        if state.drop_inputs {
            tracing::debug!(device = %input.device.name, "simulated input silently dropped");
            return;
        }
        state.inputs.push(input);
    }

    fn remove_all_inputs(&mut self) {
        lock(&self.state).inputs.clear();
    }

    fn input_count(&self) -> usize {
        lock(&self.state).inputs.len()
    }

    fn has_output(&self, kind: OutputKind) -> bool {
        lock(&self.state).outputs.contains(&kind)
    }

    fn can_add_output(&self, kind: OutputKind) -> bool {
        let state = lock(&self.state);
        !state.rejected_outputs.contains(&kind) && !state.outputs.contains(&kind)
    }

    fn add_output(&mut self, kind: OutputKind) {
        let mut state = lock(&self.state);
        if !state.outputs.contains(&kind) {
            state.outputs.push(kind);
        }
    }

    fn remove_output(&mut self, kind: OutputKind) {
        let mut state = lock(&self.state);
        state.outputs.retain(|&o| o != kind);
        state.connections.remove(&kind);
    }

    fn configure_connection(&mut self, kind: OutputKind, settings: ConnectionSettings) {
        let mut state = lock(&self.state);
        if state.outputs.contains(&kind) {
            state.connections.insert(kind, settings);
        }
    }

    fn begin_configuration(&mut self) {
        let mut state = lock(&self.state);
        state.begin_count += 1;
        state.in_transaction = true;
    }

    fn commit_configuration(&mut self) {
        let mut state = lock(&self.state);
        state.commit_count += 1;
        state.in_transaction = false;
    }

    fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    fn start_running(&mut self) {
        {
            let mut state = lock(&self.state);
            if state.running {
                return;
            }
            state.running = true;
            state.start_count += 1;
        }
        self.spawn_producer();
    }

    fn stop_running(&mut self) {
        {
            let mut state = lock(&self.state);
            if !state.running {
                return;
            }
            state.running = false;
            state.stop_count += 1;
        }
        self.join_producer();
    }

    fn set_frame_sink(&mut self, sink: Arc<dyn FrameSink>) {
        self.sink = Some(sink);
    }
}

/// Observer and fault injector for a [`SimulatedBackend`].
#[derive(Clone)]
pub struct SimProbe {
    state: Arc<Mutex<SimState>>,
}

impl SimProbe {
    pub fn input_cameras(&self) -> Vec<CameraKind> {
        lock(&self.state).inputs.iter().map(|i| i.device.kind).collect()
    }

    pub fn outputs(&self) -> Vec<OutputKind> {
        lock(&self.state).outputs.clone()
    }

    pub fn connection(&self, kind: OutputKind) -> Option<ConnectionSettings> {
        lock(&self.state).connections.get(&kind).copied()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    pub fn in_transaction(&self) -> bool {
        lock(&self.state).in_transaction
    }

    pub fn access_requests(&self) -> u32 {
        lock(&self.state).access_requests
    }

    pub fn begin_count(&self) -> u32 {
        lock(&self.state).begin_count
    }

    pub fn commit_count(&self) -> u32 {
        lock(&self.state).commit_count
    }

    pub fn open_attempts(&self) -> u32 {
        lock(&self.state).open_attempts
    }

    pub fn start_count(&self) -> u32 {
        lock(&self.state).start_count
    }

    pub fn stop_count(&self) -> u32 {
        lock(&self.state).stop_count
    }

    pub fn set_available(&self, kind: CameraKind, available: bool) {
        let mut state = lock(&self.state);
        state.devices.retain(|&k| k != kind);
        if available {
            state.devices.push(kind);
        }
    }

    pub fn set_busy(&self, kind: CameraKind, busy: bool) {
        let mut state = lock(&self.state);
        state.busy.retain(|&k| k != kind);
        if busy {
            state.busy.push(kind);
        }
    }

    pub fn set_reject_inputs(&self, reject: bool) {
        lock(&self.state).reject_inputs = reject;
    }

    /// Accept inputs but never attach them, as a flaky device would.
    pub fn set_drop_inputs(&self, enabled: bool) {
        lock(&self.state).drop_inputs = enabled;
    }

    pub fn set_reject_output(&self, kind: OutputKind, reject: bool) {
        let mut state = lock(&self.state);
        state.rejected_outputs.retain(|&k| k != kind);
        if reject {
            state.rejected_outputs.push(kind);
        }
    }
}
