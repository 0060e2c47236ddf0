use std::sync::Arc;

use chrono::{DateTime, Utc};
use depthgate_core::{
    BoundingBoxGate, CalibrationTable, DepthFrame, DepthUnit, EvaluationMode, FaceBox,
    FaceRectDetector, GateReport, LivenessClassifier, LivenessResult, VideoFrame, ZoneLayout,
    ZoneMeans, ZoneStatistics,
};
use depthgate_hw::{CaptureEvent, FrameSink};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("failed to spawn coordinator thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("coordinator thread exited")]
    ChannelClosed,
}

/// Where the per-face detection cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DetectionPhase {
    /// No face in the latest video frame.
    #[default]
    Idle,
    /// A face is tracked; depth frames are being counted.
    FaceSeen,
    /// A depth frame is being gated and measured.
    Evaluating,
    /// The latest evaluation has been published.
    Published,
}

/// Immutable view of the latest detection outcome, shared with every observer.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionSnapshot {
    pub phase: DetectionPhase,
    /// The liveness bit: a face is present, correctly placed and in band.
    pub is_face_detected: bool,
    pub unit: DepthUnit,
    pub mode: EvaluationMode,
    /// Raw geometry of the last gated box, recorded even when rejected.
    pub gate: Option<GateReport>,
    pub liveness: Option<LivenessResult>,
    pub zone_means: Option<ZoneMeans>,
    /// Completed zone evaluations.
    pub evaluations: u64,
    /// Depth frames skipped because their buffer was unreadable or the
    /// zones could not be measured.
    pub skipped_frames: u64,
    pub updated_at: DateTime<Utc>,
}

impl DetectionSnapshot {
    fn initial(unit: DepthUnit, mode: EvaluationMode) -> Self {
        Self {
            phase: DetectionPhase::Idle,
            is_face_detected: false,
            unit,
            mode,
            gate: None,
            liveness: None,
            zone_means: None,
            evaluations: 0,
            skipped_frames: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Tunables for a [`FrameProcessor`].
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub unit: DepthUnit,
    pub mode: EvaluationMode,
    /// Depth frames skipped between evaluations; 0 evaluates every frame.
    pub debounce_frames: u32,
    /// Zones to measure; `None` picks the default layout for `mode`.
    pub layout: Option<ZoneLayout>,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            unit: DepthUnit::Depth,
            mode: EvaluationMode::SingleZone,
            debounce_frames: 10,
            layout: None,
        }
    }
}

fn default_layout(mode: EvaluationMode) -> ZoneLayout {
    match mode {
        EvaluationMode::SingleZone => ZoneLayout::head_only(),
        EvaluationMode::TwoZone => ZoneLayout::head_and_outer(),
    }
}

#[derive(Debug, Default)]
struct DetectionState {
    phase: DetectionPhase,
    face_box: Option<FaceBox>,
    frames_since_evaluation: u32,
    last_result: Option<LivenessResult>,
}

/// The detection state machine.
///
/// Owns all mutable detection state. Video frames update the tracked face,
/// depth frames drive gating, measurement and publication. Not thread-safe
/// by itself: [`spawn_coordinator`] confines it to one thread.
pub struct FrameProcessor<D, S> {
    detector: D,
    statistics: S,
    gate: BoundingBoxGate,
    classifier: LivenessClassifier,
    unit: DepthUnit,
    mode: EvaluationMode,
    debounce_frames: u32,
    layout: ZoneLayout,
    custom_layout: bool,
    state: DetectionState,
    snapshot: DetectionSnapshot,
    publisher: watch::Sender<DetectionSnapshot>,
}

impl<D, S> FrameProcessor<D, S>
where
    D: FaceRectDetector,
    S: ZoneStatistics + 'static,
{
    pub fn new(
        detector: D,
        statistics: S,
        calibration: Arc<CalibrationTable>,
        settings: ProcessorSettings,
    ) -> Self {
        let snapshot = DetectionSnapshot::initial(settings.unit, settings.mode);
        let (publisher, _) = watch::channel(snapshot.clone());
        let custom_layout = settings.layout.is_some();
        Self {
            detector,
            statistics,
            gate: BoundingBoxGate::new(Arc::clone(&calibration)),
            classifier: LivenessClassifier::new(calibration),
            unit: settings.unit,
            mode: settings.mode,
            debounce_frames: settings.debounce_frames,
            layout: settings
                .layout
                .unwrap_or_else(|| default_layout(settings.mode)),
            custom_layout,
            state: DetectionState::default(),
            snapshot,
            publisher,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DetectionSnapshot> {
        self.publisher.subscribe()
    }

    /// Outcome of the most recent evaluation, including gate rejections.
    pub fn last_result(&self) -> Option<&LivenessResult> {
        self.state.last_result.as_ref()
    }

    pub fn handle_video(&mut self, frame: &VideoFrame) {
        match self.detector.detect(frame) {
            Ok(Some(face_box)) => {
                if self.state.phase == DetectionPhase::Idle {
                    tracing::debug!(?face_box, "face acquired");
                }
                self.state.face_box = Some(face_box);
                self.state.phase = DetectionPhase::FaceSeen;
            }
            Ok(None) => self.lose_face(),
            Err(e) => {
                tracing::warn!(error = %e, "face detection failed");
                self.lose_face();
            }
        }
    }

    fn lose_face(&mut self) {
        if self.state.phase != DetectionPhase::Idle {
            tracing::debug!("face lost");
        }
        self.state.phase = DetectionPhase::Idle;
        self.state.face_box = None;
        self.state.frames_since_evaluation = 0;
    }

    pub fn handle_depth(&mut self, frame: DepthFrame) {
        let Some(buffer) = frame.buffer else {
            // Keep the previous result rather than flicker on a dropped buffer.
            self.snapshot.skipped_frames += 1;
            tracing::trace!(timestamp = ?frame.timestamp, "unreadable depth buffer skipped");
            return;
        };

        let face_box = match (self.state.phase, self.state.face_box) {
            (DetectionPhase::Idle, _) | (_, None) => {
                self.snapshot.is_face_detected = false;
                self.publish();
                return;
            }
            (_, Some(face_box)) => face_box,
        };

        if self.state.frames_since_evaluation < self.debounce_frames {
            self.state.frames_since_evaluation += 1;
            return;
        }
        self.state.frames_since_evaluation = 0;
        self.state.phase = DetectionPhase::Evaluating;

        let report = self.gate.evaluate(face_box);
        let allowed = report.allowed;
        self.snapshot.gate = Some(report);
        if !allowed {
            tracing::debug!(?face_box, "face box outside calibrated region");
            self.snapshot.is_face_detected = false;
            self.snapshot.zone_means = None;
            self.snapshot.liveness = Some(LivenessResult::rejected());
            self.state.last_result = self.snapshot.liveness.clone();
            self.state.phase = DetectionPhase::Published;
            self.publish();
            return;
        }

        let buffer = if buffer.unit() == self.unit {
            buffer
        } else {
            buffer.to_unit(self.unit)
        };

        let evaluated = self
            .statistics
            .compute(&buffer, &self.layout)
            .and_then(|means| {
                let result = self.classifier.classify_means(&means, self.unit, self.mode)?;
                Ok((means, result))
            });

        match evaluated {
            Ok((means, result)) => {
                tracing::debug!(
                    is_live = result.is_live,
                    head = ?means.head,
                    outer = ?means.outer,
                    "depth evaluation"
                );
                self.snapshot.evaluations += 1;
                self.snapshot.is_face_detected = result.is_live;
                self.snapshot.zone_means = Some(means);
                self.snapshot.liveness = Some(result.clone());
                self.state.last_result = Some(result);
                self.state.phase = DetectionPhase::Published;
                self.publish();
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    width = buffer.width(),
                    height = buffer.height(),
                    "zone evaluation failed; keeping previous result"
                );
                self.snapshot.skipped_frames += 1;
                self.state.phase = DetectionPhase::FaceSeen;
            }
        }
    }

    pub fn set_unit(&mut self, unit: DepthUnit) {
        if unit != self.unit {
            tracing::info!(unit = unit.as_str(), "depth unit changed");
            self.unit = unit;
            self.snapshot.unit = unit;
            self.publish();
        }
    }

    pub fn set_mode(&mut self, mode: EvaluationMode) {
        if mode != self.mode {
            tracing::info!(?mode, "evaluation mode changed");
            self.mode = mode;
            if !self.custom_layout {
                self.layout = default_layout(mode);
            }
            self.snapshot.mode = mode;
            self.publish();
        }
    }

    /// Forget the tracked face and all results, e.g. after a camera switch.
    pub fn reset(&mut self) {
        self.state = DetectionState::default();
        self.snapshot = DetectionSnapshot::initial(self.unit, self.mode);
        self.publish();
    }

    fn publish(&mut self) {
        self.snapshot.phase = self.state.phase;
        self.snapshot.updated_at = Utc::now();
        self.publisher.send_replace(self.snapshot.clone());
    }
}

enum CoordinatorMessage {
    Capture(CaptureEvent),
    SetDepthUnit(DepthUnit),
    SetMode(EvaluationMode),
    Reset,
    Shutdown,
}

/// Clone-safe handle to the coordinator thread.
///
/// Doubles as the backend's [`FrameSink`]: capture events are enqueued with
/// `try_send` and dropped when the queue is full, so capture threads never
/// wait on detection work.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordinatorMessage>,
    snapshots: watch::Receiver<DetectionSnapshot>,
}

impl CoordinatorHandle {
    pub fn subscribe(&self) -> watch::Receiver<DetectionSnapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> DetectionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub async fn set_depth_unit(&self, unit: DepthUnit) -> Result<(), CoordinatorError> {
        self.send(CoordinatorMessage::SetDepthUnit(unit)).await
    }

    pub async fn set_mode(&self, mode: EvaluationMode) -> Result<(), CoordinatorError> {
        self.send(CoordinatorMessage::SetMode(mode)).await
    }

    pub async fn reset(&self) -> Result<(), CoordinatorError> {
        self.send(CoordinatorMessage::Reset).await
    }

    pub async fn shutdown(&self) -> Result<(), CoordinatorError> {
        self.send(CoordinatorMessage::Shutdown).await
    }

    async fn send(&self, msg: CoordinatorMessage) -> Result<(), CoordinatorError> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)
    }
}

impl FrameSink for CoordinatorHandle {
    fn deliver(&self, event: CaptureEvent) {
        if let Err(e) = self.tx.try_send(CoordinatorMessage::Capture(event)) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    tracing::trace!("coordinator queue full; frame dropped")
                }
                mpsc::error::TrySendError::Closed(_) => {
                    tracing::trace!("coordinator gone; frame dropped")
                }
            }
        }
    }
}

/// Run a [`FrameProcessor`] on a dedicated OS thread.
///
/// The thread drains capture events and control messages in arrival order
/// until [`CoordinatorHandle::shutdown`] is called or every handle is dropped.
pub fn spawn_coordinator<D, S>(
    mut processor: FrameProcessor<D, S>,
    queue_capacity: usize,
) -> Result<CoordinatorHandle, CoordinatorError>
where
    D: FaceRectDetector,
    S: ZoneStatistics + 'static,
{
    let (tx, mut rx) = mpsc::channel::<CoordinatorMessage>(queue_capacity.max(1));
    let snapshots = processor.subscribe();

    std::thread::Builder::new()
        .name("depthgate-coordinator".into())
        .spawn(move || {
            tracing::info!("coordinator thread started");
            while let Some(msg) = rx.blocking_recv() {
                match msg {
                    CoordinatorMessage::Capture(CaptureEvent::Video(frame)) => {
                        processor.handle_video(&frame)
                    }
                    CoordinatorMessage::Capture(CaptureEvent::Depth(frame)) => {
                        processor.handle_depth(frame)
                    }
                    CoordinatorMessage::SetDepthUnit(unit) => processor.set_unit(unit),
                    CoordinatorMessage::SetMode(mode) => processor.set_mode(mode),
                    CoordinatorMessage::Reset => processor.reset(),
                    CoordinatorMessage::Shutdown => break,
                }
            }
            tracing::info!("coordinator thread exiting");
        })
        .map_err(CoordinatorError::Spawn)?;

    Ok(CoordinatorHandle { tx, snapshots })
}

#[cfg(test)]
mod tests {
    use super::*;
    use depthgate_core::{
        Band, Classification, DepthBuffer, DetectorError, Metric, NormalizedRect, PixelFormat,
        RowScanStatistics, Zone, ZoneError, ZoneRole,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    type Outcome = Result<Option<FaceBox>, DetectorError>;

    /// Detector whose answer the test controls.
    #[derive(Clone)]
    struct ScriptedDetector(Arc<Mutex<Outcome>>);

    impl ScriptedDetector {
        fn new(outcome: Outcome) -> Self {
            Self(Arc::new(Mutex::new(outcome)))
        }

        fn set(&self, outcome: Outcome) {
            *self.0.lock().unwrap() = outcome;
        }
    }

    impl FaceRectDetector for ScriptedDetector {
        fn detect(&mut self, _frame: &VideoFrame) -> Outcome {
            self.0.lock().unwrap().clone()
        }
    }

    /// Row-scan statistics that count invocations.
    #[derive(Clone, Default)]
    struct CountingStatistics(Arc<AtomicUsize>);

    impl CountingStatistics {
        fn calls(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    impl ZoneStatistics for CountingStatistics {
        fn compute(&self, buffer: &DepthBuffer, layout: &ZoneLayout) -> Result<ZoneMeans, ZoneError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            RowScanStatistics.compute(buffer, layout)
        }
    }

    /// A box inside every default geometry band.
    fn good_box() -> FaceBox {
        FaceBox::new(0.35, 0.25, 0.25, 0.45)
    }

    fn video() -> VideoFrame {
        VideoFrame {
            width: 4,
            height: 4,
            format: PixelFormat::Gray8,
            data: vec![0; 16],
            timestamp: Duration::ZERO,
        }
    }

    /// 100x60 buffer: head zone (cols 40..60, rows 20..40) at `head`, rest at `outer`.
    fn scene(head: f32, outer: f32) -> DepthBuffer {
        let mut samples = vec![outer; 100 * 60];
        for y in 20..40 {
            for x in 40..60 {
                samples[y * 100 + x] = head;
            }
        }
        DepthBuffer::new(100, 60, DepthUnit::Depth, samples).unwrap()
    }

    fn depth(buffer: &DepthBuffer) -> DepthFrame {
        DepthFrame {
            buffer: Some(buffer.clone()),
            timestamp: Duration::ZERO,
        }
    }

    fn processor(
        outcome: Outcome,
        calibration: CalibrationTable,
        settings: ProcessorSettings,
    ) -> (
        FrameProcessor<ScriptedDetector, CountingStatistics>,
        ScriptedDetector,
        CountingStatistics,
    ) {
        let detector = ScriptedDetector::new(outcome);
        let stats = CountingStatistics::default();
        let p = FrameProcessor::new(
            detector.clone(),
            stats.clone(),
            Arc::new(calibration),
            settings,
        );
        (p, detector, stats)
    }

    fn every_frame() -> ProcessorSettings {
        ProcessorSettings {
            debounce_frames: 0,
            ..ProcessorSettings::default()
        }
    }

    #[test]
    fn test_no_face_publishes_false_without_pixel_work() {
        let (mut p, _, stats) = processor(Ok(None), CalibrationTable::default(), every_frame());
        let mut rx = p.subscribe();
        p.handle_video(&video());
        p.handle_depth(depth(&scene(0.6, 1.4)));

        assert!(rx.has_changed().unwrap());
        let snap = rx.borrow_and_update().clone();
        assert!(!snap.is_face_detected);
        assert_eq!(snap.phase, DetectionPhase::Idle);
        assert_eq!(stats.calls(), 0);
    }

    #[test]
    fn test_live_face_published() {
        let (mut p, _, stats) =
            processor(Ok(Some(good_box())), CalibrationTable::default(), every_frame());
        let rx = p.subscribe();
        p.handle_video(&video());
        p.handle_depth(depth(&scene(0.6, 1.4)));

        let snap = rx.borrow().clone();
        assert!(snap.is_face_detected);
        assert_eq!(snap.phase, DetectionPhase::Published);
        assert_eq!(snap.evaluations, 1);
        assert_eq!(stats.calls(), 1);
        assert_eq!(p.last_result(), snap.liveness.as_ref());
        let reading = snap.liveness.unwrap().readings[0];
        assert_eq!(reading.metric, Metric::Depth);
        assert!((reading.value - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_debounce_evaluates_once_per_window() {
        let settings = ProcessorSettings {
            debounce_frames: 10,
            ..ProcessorSettings::default()
        };
        let (mut p, _, stats) = processor(Ok(Some(good_box())), CalibrationTable::default(), settings);
        let rx = p.subscribe();
        let buf = scene(0.6, 1.4);
        p.handle_video(&video());

        // Ten frames are skipped, the eleventh is evaluated
        for _ in 0..10 {
            p.handle_depth(depth(&buf));
        }
        assert_eq!(stats.calls(), 0);
        assert_eq!(rx.borrow().evaluations, 0);

        p.handle_depth(depth(&buf));
        assert_eq!(stats.calls(), 1);

        for _ in 0..10 {
            p.handle_depth(depth(&buf));
        }
        assert_eq!(stats.calls(), 1);
        p.handle_depth(depth(&buf));
        // Evaluated at depth frames 11 and 22
        assert_eq!(stats.calls(), 2);
        assert_eq!(rx.borrow().evaluations, 2);
    }

    #[test]
    fn test_losing_face_restarts_debounce_window() {
        let settings = ProcessorSettings {
            debounce_frames: 3,
            ..ProcessorSettings::default()
        };
        let (mut p, detector, stats) =
            processor(Ok(Some(good_box())), CalibrationTable::default(), settings);
        let buf = scene(0.6, 1.4);

        p.handle_video(&video());
        p.handle_depth(depth(&buf));
        p.handle_depth(depth(&buf));

        detector.set(Ok(None));
        p.handle_video(&video());
        p.handle_depth(depth(&buf));

        detector.set(Ok(Some(good_box())));
        p.handle_video(&video());
        p.handle_depth(depth(&buf));
        p.handle_depth(depth(&buf));
        p.handle_depth(depth(&buf));
        assert_eq!(stats.calls(), 0);
        p.handle_depth(depth(&buf));
        assert_eq!(stats.calls(), 1);
    }

    #[test]
    fn test_gate_rejection_skips_zone_statistics() {
        let calibration = CalibrationTable::default()
            .with_band(Metric::BoxX, Band::new(0.3, 0.45).unwrap())
            .unwrap()
            .with_band(Metric::BoxY, Band::new(0.2, 0.35).unwrap())
            .unwrap();
        let face = FaceBox::new(0.5, 0.1, 0.2, 0.4);
        let (mut p, _, stats) = processor(Ok(Some(face)), calibration, every_frame());
        let rx = p.subscribe();

        p.handle_video(&video());
        p.handle_depth(depth(&scene(0.6, 1.4)));

        assert_eq!(stats.calls(), 0);
        let snap = rx.borrow().clone();
        assert!(!snap.is_face_detected);
        let gate = snap.gate.unwrap();
        assert!(!gate.allowed);
        // Raw geometry recorded even though the box was rejected
        assert_eq!(gate.readings[0].value, 0.1);
        assert_eq!(gate.readings[0].classification, Classification::Low);
        assert_eq!(gate.readings[1].value, 0.5);
        assert_eq!(gate.readings[1].classification, Classification::High);
        assert!(!snap.liveness.unwrap().is_live);
        assert!(snap.zone_means.is_none());
    }

    #[test]
    fn test_gate_is_conjunction_even_with_good_depth() {
        let face = FaceBox {
            height: 0.9,
            ..good_box()
        };
        let (mut p, _, stats) = processor(Ok(Some(face)), CalibrationTable::default(), every_frame());
        let rx = p.subscribe();
        p.handle_video(&video());
        p.handle_depth(depth(&scene(0.6, 1.4)));
        assert_eq!(stats.calls(), 0);
        assert!(!rx.borrow().is_face_detected);
    }

    #[test]
    fn test_detector_error_treated_as_no_face() {
        let (mut p, _, stats) = processor(
            Err(DetectorError::Failed("model exploded".into())),
            CalibrationTable::default(),
            every_frame(),
        );
        let rx = p.subscribe();
        p.handle_video(&video());
        p.handle_depth(depth(&scene(0.6, 1.4)));
        assert!(!rx.borrow().is_face_detected);
        assert_eq!(rx.borrow().phase, DetectionPhase::Idle);
        assert_eq!(stats.calls(), 0);
    }

    #[test]
    fn test_unreadable_buffer_keeps_previous_result() {
        let (mut p, _, _) = processor(Ok(Some(good_box())), CalibrationTable::default(), every_frame());
        let mut rx = p.subscribe();
        p.handle_video(&video());
        p.handle_depth(depth(&scene(0.6, 1.4)));
        assert!(rx.borrow_and_update().is_face_detected);

        p.handle_depth(DepthFrame {
            buffer: None,
            timestamp: Duration::ZERO,
        });
        assert!(!rx.has_changed().unwrap());
        assert!(rx.borrow().is_face_detected);
    }

    #[test]
    fn test_two_zone_scenario() {
        let calibration = CalibrationTable::default()
            .with_band(Metric::InnerDepth, Band::new(0.5, 0.8).unwrap())
            .unwrap()
            .with_band(Metric::DepthDiff, Band::new(0.3, 0.6).unwrap())
            .unwrap();
        let settings = ProcessorSettings {
            mode: EvaluationMode::TwoZone,
            debounce_frames: 0,
            ..ProcessorSettings::default()
        };
        let (mut p, _, _) = processor(Ok(Some(good_box())), calibration, settings);
        let rx = p.subscribe();

        p.handle_video(&video());
        p.handle_depth(depth(&scene(0.65, 0.20)));
        let snap = rx.borrow().clone();
        assert!(snap.is_face_detected);
        let means = snap.zone_means.unwrap();
        assert!((means.outer.unwrap() - 0.20).abs() < 1e-6);

        p.handle_depth(depth(&scene(0.3, 0.20)));
        let snap = rx.borrow().clone();
        assert!(!snap.is_face_detected);
        let liveness = snap.liveness.unwrap();
        assert_eq!(
            liveness.reading(Metric::InnerDepth).unwrap().classification,
            Classification::Low
        );
    }

    #[test]
    fn test_set_mode_switches_default_layout() {
        let (mut p, _, _) = processor(Ok(Some(good_box())), CalibrationTable::default(), every_frame());
        let rx = p.subscribe();
        p.handle_video(&video());
        p.handle_depth(depth(&scene(0.6, 1.4)));
        assert!(rx.borrow().zone_means.as_ref().unwrap().outer.is_none());

        p.set_mode(EvaluationMode::TwoZone);
        assert_eq!(rx.borrow().mode, EvaluationMode::TwoZone);
        p.handle_depth(depth(&scene(0.6, 1.4)));
        let snap = rx.borrow().clone();
        assert!((snap.zone_means.unwrap().outer.unwrap() - 1.4).abs() < 1e-6);
        let liveness = snap.liveness.unwrap();
        assert!(liveness.reading(Metric::DepthDiff).is_some());
        assert!(liveness.reading(Metric::Depth).is_none());
    }

    #[test]
    fn test_disparity_unit_converts_buffer() {
        let settings = ProcessorSettings {
            unit: DepthUnit::Disparity,
            debounce_frames: 0,
            ..ProcessorSettings::default()
        };
        let (mut p, _, _) = processor(Ok(Some(good_box())), CalibrationTable::default(), settings);
        let rx = p.subscribe();
        p.handle_video(&video());
        p.handle_depth(depth(&scene(0.6, 1.4)));

        let snap = rx.borrow().clone();
        let reading = snap.liveness.unwrap().readings[0];
        assert_eq!(reading.metric, Metric::Disparity);
        assert!((reading.value - 1.0 / 0.6).abs() < 1e-4);
        assert!(snap.is_face_detected);
    }

    #[test]
    fn test_degenerate_zone_keeps_previous_result() {
        let (mut p, _, _) = processor(Ok(Some(good_box())), CalibrationTable::default(), every_frame());
        let rx = p.subscribe();
        p.handle_video(&video());
        p.handle_depth(depth(&scene(0.6, 1.4)));
        assert!(rx.borrow().is_face_detected);

        // In a 2x2 buffer no pixel centre falls inside the head zone
        let tiny = DepthBuffer::filled(2, 2, DepthUnit::Depth, 0.6).unwrap();
        p.handle_depth(depth(&tiny));
        let snap = rx.borrow().clone();
        assert!(snap.is_face_detected);
        assert_eq!(snap.evaluations, 1);
        assert_eq!(snap.skipped_frames, 0);
    }

    #[test]
    fn test_custom_layout_used() {
        let layout = ZoneLayout {
            zones: vec![Zone::new(
                "corner",
                ZoneRole::Head,
                NormalizedRect::from_bounds(0.0, 0.1, 0.0, 0.1),
            )],
        };
        let settings = ProcessorSettings {
            layout: Some(layout),
            debounce_frames: 0,
            ..ProcessorSettings::default()
        };
        let (mut p, _, _) = processor(Ok(Some(good_box())), CalibrationTable::default(), settings);
        let rx = p.subscribe();
        p.handle_video(&video());
        p.handle_depth(depth(&scene(0.6, 1.4)));
        // Corner is background, too far away
        let snap = rx.borrow().clone();
        assert!(!snap.is_face_detected);
        assert!((snap.zone_means.unwrap().head.unwrap() - 1.4).abs() < 1e-6);
    }

    #[test]
    fn test_reset_clears_results() {
        let (mut p, _, _) = processor(Ok(Some(good_box())), CalibrationTable::default(), every_frame());
        let rx = p.subscribe();
        p.handle_video(&video());
        p.handle_depth(depth(&scene(0.6, 1.4)));
        p.reset();
        let snap = rx.borrow().clone();
        assert!(!snap.is_face_detected);
        assert!(snap.liveness.is_none());
        assert_eq!(snap.evaluations, 0);

        // Face must be re-acquired before the next evaluation
        p.handle_depth(depth(&scene(0.6, 1.4)));
        assert_eq!(rx.borrow().evaluations, 0);
    }

    #[tokio::test]
    async fn test_coordinator_thread_publishes() {
        let detector = ScriptedDetector::new(Ok(Some(good_box())));
        let p = FrameProcessor::new(
            detector,
            RowScanStatistics,
            Arc::new(CalibrationTable::default()),
            ProcessorSettings {
                debounce_frames: 1,
                ..ProcessorSettings::default()
            },
        );
        let handle = spawn_coordinator(p, 16).unwrap();
        let mut rx = handle.subscribe();

        handle.deliver(CaptureEvent::Video(video()));
        handle.deliver(CaptureEvent::Depth(depth(&scene(0.6, 1.4))));
        handle.deliver(CaptureEvent::Depth(depth(&scene(0.6, 1.4))));

        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.evaluations == 1))
            .await
            .unwrap()
            .unwrap();
        assert!(handle.snapshot().is_face_detected);

        handle.set_depth_unit(DepthUnit::Disparity).await.unwrap();
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.unit == DepthUnit::Disparity),
        )
        .await
        .unwrap()
        .unwrap();

        handle.shutdown().await.unwrap();
    }
}
