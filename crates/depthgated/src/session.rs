use std::sync::Arc;

use depthgate_hw::{
    AuthorizationStatus, CameraError, CameraKind, CaptureBackend, ConnectionSettings, FrameSink,
    OutputKind,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

use crate::coordinator::CoordinatorHandle;

/// Lifecycle of the capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Unconfigured,
    Configured,
    Unauthorized,
    Failed,
}

/// Published session state. `error` holds at most one current error.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub status: SessionStatus,
    pub error: Option<CameraError>,
    pub camera: CameraKind,
    pub running: bool,
}

impl Serialize for SessionState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("SessionState", 5)?;
        s.serialize_field("status", &self.status)?;
        s.serialize_field("camera", &self.camera)?;
        s.serialize_field("running", &self.running)?;
        s.serialize_field("error", &self.error.as_ref().map(|e| e.code()))?;
        s.serialize_field("error_message", &self.error.as_ref().map(|e| e.to_string()))?;
        s.end()
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("camera access not authorized")]
    NotAuthorized,
    #[error("capture session failed; switch camera to recover")]
    NeedsRecovery,
    #[error("failed to spawn session thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("session thread exited")]
    ChannelClosed,
}

/// Owns the capture backend and drives its configuration.
///
/// Every method runs on the caller's thread and may block (permission
/// prompts). [`spawn_session`] serializes all calls onto one worker so a
/// camera switch can never overlap initial configuration.
pub struct SessionController<B> {
    backend: B,
    status: SessionStatus,
    error: Option<CameraError>,
    camera: CameraKind,
    publisher: watch::Sender<SessionState>,
}

impl<B: CaptureBackend> SessionController<B> {
    pub fn new(mut backend: B, camera: CameraKind, sink: Arc<dyn FrameSink>) -> Self {
        backend.set_frame_sink(sink);
        let state = SessionState {
            status: SessionStatus::Unconfigured,
            error: None,
            camera,
            running: false,
        };
        let (publisher, _) = watch::channel(state);
        Self {
            backend,
            status: SessionStatus::Unconfigured,
            error: None,
            camera,
            publisher,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn error(&self) -> Option<&CameraError> {
        self.error.as_ref()
    }

    pub fn camera(&self) -> CameraKind {
        self.camera
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.publisher.subscribe()
    }

    /// Check permission, configure the session for the selected camera and
    /// start capture. Only acts while `Unconfigured`.
    pub fn configure(&mut self) -> Result<(), SessionError> {
        let result = self.configure_inner();
        self.publish();
        result
    }

    fn configure_inner(&mut self) -> Result<(), SessionError> {
        if self.status != SessionStatus::Unconfigured {
            tracing::debug!(status = ?self.status, "configure skipped");
            return match self.status {
                SessionStatus::Unauthorized => Err(SessionError::NotAuthorized),
                SessionStatus::Failed => Err(SessionError::NeedsRecovery),
                _ => Ok(()),
            };
        }

        self.check_permissions()?;

        if let Err(e) = self.apply_configuration(self.camera) {
            return Err(self.fail(e));
        }
        self.status = SessionStatus::Configured;
        self.error = None;
        self.backend.start_running();
        tracing::info!(camera = self.camera.as_str(), "capture session configured");
        Ok(())
    }

    fn check_permissions(&mut self) -> Result<(), SessionError> {
        let denial = match self.backend.authorization_status() {
            AuthorizationStatus::Authorized => return Ok(()),
            AuthorizationStatus::NotDetermined => {
                tracing::info!("requesting camera access");
                let (tx, rx) = oneshot::channel();
                self.backend.request_access(Box::new(move |granted| {
                    let _ = tx.send(granted);
                }));
                // Configuration stays suspended until the user answers.
                match rx.blocking_recv() {
                    Ok(true) => return Ok(()),
                    Ok(false) => CameraError::DeniedAuthorization,
                    Err(_) => CameraError::UnknownAuthorization,
                }
            }
            AuthorizationStatus::Restricted => CameraError::RestrictedAuthorization,
            AuthorizationStatus::Denied => CameraError::DeniedAuthorization,
        };
        tracing::warn!(error = %denial, "camera access not granted");
        self.status = SessionStatus::Unauthorized;
        self.error = Some(denial.clone());
        Err(SessionError::Camera(denial))
    }

    /// Move capture to `kind`, stopping and resuming a running session.
    pub fn switch_camera(&mut self, kind: CameraKind) -> Result<(), SessionError> {
        let result = self.switch_camera_inner(kind);
        self.publish();
        result
    }

    fn switch_camera_inner(&mut self, kind: CameraKind) -> Result<(), SessionError> {
        match self.status {
            SessionStatus::Unauthorized => {
                tracing::warn!(camera = kind.as_str(), "camera switch refused: not authorized");
                return Err(SessionError::NotAuthorized);
            }
            SessionStatus::Unconfigured => {
                self.camera = kind;
                return self.configure_inner();
            }
            SessionStatus::Configured | SessionStatus::Failed => {}
        }

        let previous = self.status;
        let was_running = self.backend.is_running();
        if was_running {
            self.backend.stop_running();
        }

        self.camera = kind;
        if let Err(e) = self.apply_configuration(kind) {
            return Err(self.fail(e));
        }
        self.status = SessionStatus::Configured;
        self.error = None;

        if was_running || previous == SessionStatus::Failed {
            self.backend.start_running();
        }
        tracing::info!(camera = kind.as_str(), "camera switched");
        Ok(())
    }

    /// Clear the current error without changing status.
    pub fn dismiss_error(&mut self) {
        if self.error.take().is_some() {
            tracing::debug!("camera error dismissed");
            self.publish();
        }
    }

    /// One configuration transaction: replace inputs, make sure both outputs
    /// exist and set their connections. On failure all inputs and any
    /// outputs added here are removed before the transaction is committed.
    fn apply_configuration(&mut self, kind: CameraKind) -> Result<(), CameraError> {
        self.backend.begin_configuration();
        let mut added_outputs = Vec::new();
        let result = self.attach(kind, &mut added_outputs);
        if result.is_err() {
            self.backend.remove_all_inputs();
            for output in added_outputs {
                self.backend.remove_output(output);
            }
        }
        self.backend.commit_configuration();
        result
    }

    fn attach(&mut self, kind: CameraKind, added_outputs: &mut Vec<OutputKind>) -> Result<(), CameraError> {
        self.backend.remove_all_inputs();

        let device = self
            .backend
            .find_device(kind)
            .ok_or(CameraError::CameraUnavailable)?;
        let input = self
            .backend
            .open_input(&device)
            .map_err(CameraError::CreateCaptureInput)?;
        if !self.backend.can_add_input(&input) {
            return Err(CameraError::CannotAddInput);
        }
        self.backend.add_input(input);
        if self.backend.input_count() != 1 {
            return Err(CameraError::CannotAddInput);
        }
        tracing::debug!(device = %device.name, "input attached");

        for output in [OutputKind::Video, OutputKind::Depth] {
            if self.backend.has_output(output) {
                continue;
            }
            if !self.backend.can_add_output(output) {
                return Err(CameraError::CannotAddOutput);
            }
            self.backend.add_output(output);
            added_outputs.push(output);
        }

        let mirrored = kind.requires_mirroring();
        self.backend.configure_connection(
            OutputKind::Video,
            ConnectionSettings {
                enabled: true,
                mirrored,
                rotation_degrees: 90,
            },
        );
        self.backend.configure_connection(
            OutputKind::Depth,
            ConnectionSettings {
                enabled: true,
                mirrored,
                rotation_degrees: 0,
            },
        );
        Ok(())
    }

    fn fail(&mut self, error: CameraError) -> SessionError {
        tracing::error!(error = %error, camera = self.camera.as_str(), "capture session configuration failed");
        self.status = SessionStatus::Failed;
        self.error = Some(error.clone());
        SessionError::Camera(error)
    }

    fn publish(&self) {
        self.publisher.send_replace(SessionState {
            status: self.status,
            error: self.error.clone(),
            camera: self.camera,
            running: self.backend.is_running(),
        });
    }
}

fn is_capturing(state: &SessionState) -> bool {
    state.status == SessionStatus::Configured && state.running
}

/// Clear detection results whenever capture stops.
///
/// A stopped or failed session delivers no more depth frames, so the last
/// published snapshot would otherwise keep its liveness bit indefinitely.
/// Runs until the session or the coordinator goes away.
pub async fn reset_detection_on_capture_loss(
    mut session: watch::Receiver<SessionState>,
    coordinator: CoordinatorHandle,
) {
    let mut capturing = is_capturing(&session.borrow_and_update());
    while session.changed().await.is_ok() {
        let now = is_capturing(&session.borrow_and_update());
        if capturing && !now {
            tracing::info!("capture stopped; clearing detection results");
            if coordinator.reset().await.is_err() {
                break;
            }
        }
        capturing = now;
    }
}

/// Requests handled by the session worker.
enum SessionRequest {
    Configure {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    SwitchCamera {
        camera: CameraKind,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    DismissError,
}

/// Clone-safe handle to the session worker thread.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionRequest>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub async fn configure(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionRequest::Configure { reply }).await?;
        rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    pub async fn switch_camera(&self, camera: CameraKind) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionRequest::SwitchCamera { camera, reply })
            .await?;
        rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    pub async fn dismiss_error(&self) -> Result<(), SessionError> {
        self.send(SessionRequest::DismissError).await
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    async fn send(&self, req: SessionRequest) -> Result<(), SessionError> {
        self.tx
            .send(req)
            .await
            .map_err(|_| SessionError::ChannelClosed)
    }
}

/// Run a [`SessionController`] on its own worker thread.
///
/// Requests are handled strictly one at a time; the worker exits when every
/// handle has been dropped, stopping capture on the way out.
pub fn spawn_session<B: CaptureBackend>(
    mut controller: SessionController<B>,
) -> Result<SessionHandle, SessionError> {
    let (tx, mut rx) = mpsc::channel::<SessionRequest>(4);
    let state = controller.subscribe();

    std::thread::Builder::new()
        .name("depthgate-session".into())
        .spawn(move || {
            tracing::info!("session thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    SessionRequest::Configure { reply } => {
                        let _ = reply.send(controller.configure());
                    }
                    SessionRequest::SwitchCamera { camera, reply } => {
                        let _ = reply.send(controller.switch_camera(camera));
                    }
                    SessionRequest::DismissError => controller.dismiss_error(),
                }
            }
            controller.backend.stop_running();
            tracing::info!("session thread exiting");
        })
        .map_err(SessionError::Spawn)?;

    Ok(SessionHandle { tx, state })
}

#[cfg(test)]
mod tests {
    use super::*;
    use depthgate_hw::{CaptureEvent, DeviceError, SimConfig, SimProbe, SimulatedBackend};

    struct NullSink;

    impl FrameSink for NullSink {
        fn deliver(&self, _event: CaptureEvent) {}
    }

    fn controller(config: SimConfig) -> (SessionController<SimulatedBackend>, SimProbe) {
        let backend = SimulatedBackend::new(config);
        let probe = backend.probe();
        let c = SessionController::new(backend, CameraKind::FrontTrueDepth, Arc::new(NullSink));
        (c, probe)
    }

    fn configured() -> (SessionController<SimulatedBackend>, SimProbe) {
        let (mut c, probe) = controller(SimConfig::default());
        c.configure().unwrap();
        (c, probe)
    }

    #[test]
    fn test_configure_authorized() {
        let (c, probe) = configured();
        assert_eq!(c.status(), SessionStatus::Configured);
        assert!(c.error().is_none());
        assert_eq!(probe.input_cameras(), vec![CameraKind::FrontTrueDepth]);
        assert_eq!(probe.outputs(), vec![OutputKind::Video, OutputKind::Depth]);
        assert!(probe.is_running());
        assert!(!probe.in_transaction());

        let video = probe.connection(OutputKind::Video).unwrap();
        assert_eq!(video.rotation_degrees, 90);
        assert!(!video.mirrored);
        assert!(probe.connection(OutputKind::Depth).unwrap().enabled);
    }

    #[test]
    fn test_not_determined_then_denied() {
        let (mut c, probe) = controller(SimConfig {
            authorization: AuthorizationStatus::NotDetermined,
            access_response: Some(false),
            ..SimConfig::default()
        });
        let rx = c.subscribe();
        let err = c.configure().unwrap_err();
        assert!(matches!(err, SessionError::Camera(CameraError::DeniedAuthorization)));
        assert_eq!(c.status(), SessionStatus::Unauthorized);
        assert_eq!(c.error(), Some(&CameraError::DeniedAuthorization));
        assert_eq!(probe.access_requests(), 1);
        // Never got as far as touching the session
        assert_eq!(probe.begin_count(), 0);
        assert_eq!(probe.open_attempts(), 0);
        assert!(!probe.is_running());
        assert_eq!(rx.borrow().status, SessionStatus::Unauthorized);
    }

    #[test]
    fn test_not_determined_then_granted() {
        let (mut c, probe) = controller(SimConfig {
            authorization: AuthorizationStatus::NotDetermined,
            access_response: Some(true),
            ..SimConfig::default()
        });
        c.configure().unwrap();
        assert_eq!(c.status(), SessionStatus::Configured);
        assert_eq!(probe.access_requests(), 1);
    }

    #[test]
    fn test_unanswered_prompt_is_unknown_authorization() {
        let (mut c, _) = controller(SimConfig {
            authorization: AuthorizationStatus::NotDetermined,
            access_response: None,
            ..SimConfig::default()
        });
        c.configure().unwrap_err();
        assert_eq!(c.status(), SessionStatus::Unauthorized);
        assert_eq!(c.error(), Some(&CameraError::UnknownAuthorization));
    }

    #[test]
    fn test_restricted_and_denied() {
        let (mut c, probe) = controller(SimConfig {
            authorization: AuthorizationStatus::Restricted,
            ..SimConfig::default()
        });
        c.configure().unwrap_err();
        assert_eq!(c.error(), Some(&CameraError::RestrictedAuthorization));
        assert_eq!(probe.access_requests(), 0);

        let (mut c, _) = controller(SimConfig {
            authorization: AuthorizationStatus::Denied,
            ..SimConfig::default()
        });
        c.configure().unwrap_err();
        assert_eq!(c.status(), SessionStatus::Unauthorized);
        assert_eq!(c.error(), Some(&CameraError::DeniedAuthorization));
    }

    #[test]
    fn test_missing_camera_fails_configure() {
        let (mut c, probe) = controller(SimConfig {
            devices: vec![CameraKind::RearDual],
            ..SimConfig::default()
        });
        let err = c.configure().unwrap_err();
        assert!(matches!(err, SessionError::Camera(CameraError::CameraUnavailable)));
        assert_eq!(c.status(), SessionStatus::Failed);
        assert!(probe.input_cameras().is_empty());
        assert!(probe.outputs().is_empty());
        assert!(!probe.is_running());
        assert!(!probe.in_transaction());
    }

    #[test]
    fn test_rejected_output_rolls_back_input() {
        let (mut c, probe) = controller(SimConfig::default());
        probe.set_reject_output(OutputKind::Depth, true);
        let err = c.configure().unwrap_err();
        assert!(matches!(err, SessionError::Camera(CameraError::CannotAddOutput)));
        assert!(probe.input_cameras().is_empty());
        assert!(probe.outputs().is_empty());
        assert_eq!(probe.begin_count(), probe.commit_count());
    }

    #[test]
    fn test_configure_only_once() {
        let (mut c, probe) = configured();
        c.configure().unwrap();
        assert_eq!(probe.begin_count(), 1);
    }

    #[test]
    fn test_configure_after_failure_reports_error() {
        let (mut c, probe) = controller(SimConfig {
            devices: vec![],
            ..SimConfig::default()
        });
        c.configure().unwrap_err();
        let err = c.configure().unwrap_err();
        assert!(matches!(err, SessionError::NeedsRecovery));
        assert_eq!(c.status(), SessionStatus::Failed);
        assert_eq!(probe.begin_count(), 1);
    }

    #[test]
    fn test_input_not_attached_fails_configure() {
        let (mut c, probe) = controller(SimConfig::default());
        probe.set_drop_inputs(true);
        let err = c.configure().unwrap_err();
        assert!(matches!(err, SessionError::Camera(CameraError::CannotAddInput)));
        assert_eq!(c.status(), SessionStatus::Failed);
        assert!(!probe.is_running());
    }

    #[test]
    fn test_switch_while_running_stops_and_resumes() {
        let (mut c, probe) = configured();
        c.switch_camera(CameraKind::RearDual).unwrap();

        assert_eq!(c.status(), SessionStatus::Configured);
        assert_eq!(c.camera(), CameraKind::RearDual);
        assert_eq!(probe.input_cameras(), vec![CameraKind::RearDual]);
        assert_eq!(probe.stop_count(), 1);
        assert_eq!(probe.start_count(), 2);
        assert!(probe.is_running());
        assert!(probe.connection(OutputKind::Video).unwrap().mirrored);
        assert!(probe.connection(OutputKind::Depth).unwrap().mirrored);

        c.switch_camera(CameraKind::FrontTrueDepth).unwrap();
        assert!(!probe.connection(OutputKind::Video).unwrap().mirrored);
        assert!(!probe.connection(OutputKind::Depth).unwrap().mirrored);
    }

    #[test]
    fn test_switch_to_unavailable_camera_fails_cleanly() {
        let (mut c, probe) = configured();
        probe.set_available(CameraKind::RearDual, false);
        let err = c.switch_camera(CameraKind::RearDual).unwrap_err();
        assert!(matches!(err, SessionError::Camera(CameraError::CameraUnavailable)));
        assert_eq!(c.status(), SessionStatus::Failed);
        // Not left attached to nothing while claiming to be configured
        assert!(probe.input_cameras().is_empty());
        assert!(!probe.is_running());
        assert!(!probe.in_transaction());
    }

    #[test]
    fn test_switch_busy_camera_wraps_device_error() {
        let (mut c, probe) = configured();
        probe.set_busy(CameraKind::RearDual, true);
        let err = c.switch_camera(CameraKind::RearDual).unwrap_err();
        match err {
            SessionError::Camera(CameraError::CreateCaptureInput(DeviceError::Busy)) => {}
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(c.status(), SessionStatus::Failed);
    }

    #[test]
    fn test_switch_rejected_input() {
        let (mut c, probe) = configured();
        probe.set_reject_inputs(true);
        let err = c.switch_camera(CameraKind::RearDual).unwrap_err();
        assert!(matches!(err, SessionError::Camera(CameraError::CannotAddInput)));
        assert!(probe.input_cameras().is_empty());
        assert_eq!(c.status(), SessionStatus::Failed);
    }

    #[test]
    fn test_switch_recovers_from_failed() {
        let (mut c, probe) = configured();
        probe.set_available(CameraKind::RearDual, false);
        c.switch_camera(CameraKind::RearDual).unwrap_err();
        assert_eq!(c.status(), SessionStatus::Failed);

        c.switch_camera(CameraKind::FrontTrueDepth).unwrap();
        assert_eq!(c.status(), SessionStatus::Configured);
        assert!(c.error().is_none());
        assert_eq!(probe.input_cameras(), vec![CameraKind::FrontTrueDepth]);
        assert!(probe.is_running());
    }

    #[test]
    fn test_switch_while_unconfigured_configures() {
        let (mut c, probe) = controller(SimConfig::default());
        c.switch_camera(CameraKind::RearDual).unwrap();
        assert_eq!(c.status(), SessionStatus::Configured);
        assert_eq!(probe.input_cameras(), vec![CameraKind::RearDual]);
        assert!(probe.is_running());
    }

    #[test]
    fn test_switch_while_unauthorized_refused() {
        let (mut c, probe) = controller(SimConfig {
            authorization: AuthorizationStatus::Denied,
            ..SimConfig::default()
        });
        c.configure().unwrap_err();
        let err = c.switch_camera(CameraKind::RearDual).unwrap_err();
        assert!(matches!(err, SessionError::NotAuthorized));
        assert_eq!(c.status(), SessionStatus::Unauthorized);
        assert_eq!(probe.begin_count(), 0);
    }

    #[test]
    fn test_dismiss_error() {
        let (mut c, _) = controller(SimConfig {
            devices: vec![],
            ..SimConfig::default()
        });
        let rx = c.subscribe();
        c.configure().unwrap_err();
        assert!(rx.borrow().error.is_some());
        c.dismiss_error();
        assert!(c.error().is_none());
        assert_eq!(c.status(), SessionStatus::Failed);
        assert!(rx.borrow().error.is_none());
    }

    #[test]
    fn test_state_serializes_error_code() {
        let state = SessionState {
            status: SessionStatus::Failed,
            error: Some(CameraError::CameraUnavailable),
            camera: CameraKind::RearDual,
            running: false,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["camera"], "rear-dual");
        assert_eq!(json["error"], "cameraUnavailable");
        assert_eq!(json["error_message"], "Camera unavailable");
    }

    #[tokio::test]
    async fn test_worker_serializes_requests() {
        let (c, probe) = controller(SimConfig::default());
        let handle = spawn_session(c).unwrap();

        let (a, b) = tokio::join!(
            handle.configure(),
            handle.switch_camera(CameraKind::RearDual)
        );
        a.unwrap();
        b.unwrap();

        let state = handle.state();
        assert_eq!(state.status, SessionStatus::Configured);
        assert_eq!(state.camera, CameraKind::RearDual);
        assert!(state.running);
        assert_eq!(probe.input_cameras(), vec![CameraKind::RearDual]);
        assert!(!probe.in_transaction());
    }
}
