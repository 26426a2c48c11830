//! In-crate fakes for the host collaborators.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use proctor_engines::classifier::violation_id;
use proctor_engines::reporter::{ReportDeliveryError, ReportTransport, ViolationReportPayload};
use proctor_kernel_contracts::capability::EnvironmentSnapshot;
use proctor_kernel_contracts::escalation::EscalationReason;
use proctor_kernel_contracts::presence::{
    DetectedFace, FaceBox, FaceDetection, FaceEmbedding, Point2,
};
use proctor_kernel_contracts::resource::{PermissionBundle, ResourceKind};
use proctor_kernel_contracts::violation::{
    ExamId, HostSignal, ViolationDetails, ViolationRecord, ViolationSeverity, ViolationType,
};
use proctor_kernel_contracts::UnixTimeMs;
use tokio::sync::{mpsc, Notify};

use crate::face_model::{FaceModel, FaceModelError};
use crate::host::{
    CapturedStream, ExamSubmitter, HostCaptureError, HostEnvironment, HostMediaApi, MediaTrack,
    ProctorUiSink, SubmitError, TrackEndedCallback, TrackKind, UserMediaRequest, VideoFrame,
};
use crate::lock_unpoisoned;

pub fn frame() -> VideoFrame {
    VideoFrame {
        width: 640,
        height: 480,
        jpeg: Arc::from(vec![0xFF, 0xD8, 0xFF, 0xD9]),
    }
}

pub fn face_with_descriptor(descriptor: Vec<f32>) -> DetectedFace {
    DetectedFace::v1(
        FaceBox::new(100.0, 100.0, 100.0, 120.0).unwrap(),
        vec![Point2::new(130.0, 140.0).unwrap()],
        vec![Point2::new(170.0, 140.0).unwrap()],
        Some(FaceEmbedding::new(descriptor).unwrap()),
    )
    .unwrap()
}

pub fn detection_with_faces(n: usize) -> FaceDetection {
    FaceDetection::v1((0..n).map(|_| face_with_descriptor(vec![0.0; 4])).collect()).unwrap()
}

pub fn record(violation_type: ViolationType, seq: u64) -> ViolationRecord {
    let exam = ExamId::new("exam_test").unwrap();
    let severity = match violation_type {
        ViolationType::MultipleFaces | ViolationType::FaceMismatch => ViolationSeverity::Critical,
        _ => ViolationSeverity::High,
    };
    ViolationRecord::v1(
        violation_id(&exam, seq, UnixTimeMs(seq)).unwrap(),
        violation_type,
        severity,
        UnixTimeMs(1_700_000_000_000 + seq),
        ViolationDetails::new(),
        exam,
        violation_type == ViolationType::FaceMismatch,
    )
    .unwrap()
}

pub struct FakeTrack {
    kind: TrackKind,
    live: AtomicBool,
    stopped: AtomicBool,
    on_ended: Mutex<Option<TrackEndedCallback>>,
}

impl std::fmt::Debug for FakeTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeTrack")
            .field("kind", &self.kind)
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}

impl FakeTrack {
    fn with_kind(kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            live: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            on_ended: Mutex::new(None),
        })
    }

    pub fn video() -> Arc<Self> {
        Self::with_kind(TrackKind::Video)
    }

    pub fn audio() -> Arc<Self> {
        Self::with_kind(TrackKind::Audio)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Simulates the user stopping the track from browser chrome.
    pub fn end_externally(&self) {
        self.live.store(false, Ordering::SeqCst);
        let callback = lock_unpoisoned(&self.on_ended).take();
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl MediaTrack for FakeTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
        lock_unpoisoned(&self.on_ended).take();
    }

    fn on_ended(&self, callback: TrackEndedCallback) {
        *lock_unpoisoned(&self.on_ended) = Some(callback);
    }

    fn grab_frame(&self) -> Option<VideoFrame> {
        (self.kind == TrackKind::Video && self.is_live()).then(frame)
    }
}

#[derive(Default)]
struct HostState {
    user_media_calls: usize,
    display_calls: usize,
    fullscreen_requests: usize,
    fullscreen_exits: usize,
    omit_audio: bool,
    hold_prompts: bool,
    denials: Vec<(ResourceKind, HostCaptureError)>,
    video: Option<Arc<FakeTrack>>,
    audio: Option<Arc<FakeTrack>>,
    display: Option<Arc<FakeTrack>>,
}

#[derive(Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
    prompt_released: Notify,
}

impl FakeHost {
    pub fn granting_all() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deny(&self, kind: ResourceKind, err: HostCaptureError) {
        lock_unpoisoned(&self.state).denials.push((kind, err));
    }

    /// Lifts an earlier `deny`, like the user changing a site permission.
    pub fn allow(&self, kind: ResourceKind) {
        lock_unpoisoned(&self.state).denials.retain(|(k, _)| *k != kind);
    }

    pub fn omit_audio_track(&self) {
        lock_unpoisoned(&self.state).omit_audio = true;
    }

    /// Capture calls suspend, like an unanswered consent prompt, until released.
    pub fn hold_prompts(&self) {
        lock_unpoisoned(&self.state).hold_prompts = true;
    }

    pub fn release_prompts(&self) {
        lock_unpoisoned(&self.state).hold_prompts = false;
        self.prompt_released.notify_waiters();
    }

    pub fn user_media_calls(&self) -> usize {
        lock_unpoisoned(&self.state).user_media_calls
    }

    pub fn display_calls(&self) -> usize {
        lock_unpoisoned(&self.state).display_calls
    }

    pub fn fullscreen_requests(&self) -> usize {
        lock_unpoisoned(&self.state).fullscreen_requests
    }

    pub fn fullscreen_exits(&self) -> usize {
        lock_unpoisoned(&self.state).fullscreen_exits
    }

    pub fn video_track(&self) -> Arc<FakeTrack> {
        lock_unpoisoned(&self.state).video.clone().unwrap()
    }

    pub fn audio_track(&self) -> Arc<FakeTrack> {
        lock_unpoisoned(&self.state).audio.clone().unwrap()
    }

    pub fn display_track(&self) -> Arc<FakeTrack> {
        lock_unpoisoned(&self.state).display.clone().unwrap()
    }

    fn denial(&self, kind: ResourceKind) -> Option<HostCaptureError> {
        lock_unpoisoned(&self.state)
            .denials
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, e)| e.clone())
    }

    async fn wait_for_prompt(&self) {
        loop {
            let notified = self.prompt_released.notified();
            if !lock_unpoisoned(&self.state).hold_prompts {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl HostMediaApi for FakeHost {
    async fn capture_user_media(
        &self,
        request: UserMediaRequest,
    ) -> Result<CapturedStream, HostCaptureError> {
        lock_unpoisoned(&self.state).user_media_calls += 1;
        self.wait_for_prompt().await;
        if request.video {
            if let Some(err) = self.denial(ResourceKind::Camera) {
                return Err(err);
            }
        }
        if request.audio {
            if let Some(err) = self.denial(ResourceKind::Microphone) {
                return Err(err);
            }
        }
        let mut state = lock_unpoisoned(&self.state);
        let mut tracks: Vec<Arc<dyn MediaTrack>> = Vec::new();
        if request.video {
            let t = FakeTrack::video();
            state.video = Some(Arc::clone(&t));
            tracks.push(t);
        }
        if request.audio && !state.omit_audio {
            let t = FakeTrack::audio();
            state.audio = Some(Arc::clone(&t));
            tracks.push(t);
        }
        Ok(CapturedStream { tracks })
    }

    async fn capture_display(&self) -> Result<CapturedStream, HostCaptureError> {
        lock_unpoisoned(&self.state).display_calls += 1;
        self.wait_for_prompt().await;
        if let Some(err) = self.denial(ResourceKind::ScreenShare) {
            return Err(err);
        }
        let t = FakeTrack::video();
        lock_unpoisoned(&self.state).display = Some(Arc::clone(&t));
        Ok(CapturedStream { tracks: vec![t] })
    }

    async fn request_fullscreen(&self) -> Result<(), HostCaptureError> {
        lock_unpoisoned(&self.state).fullscreen_requests += 1;
        match self.denial(ResourceKind::Fullscreen) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn exit_fullscreen(&self) {
        lock_unpoisoned(&self.state).fullscreen_exits += 1;
    }
}

#[derive(Default)]
pub struct FakeEnvironment {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<HostSignal>>>,
    snapshot: Mutex<Option<EnvironmentSnapshot>>,
}

impl FakeEnvironment {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns how many live subscribers received the signal.
    pub fn fire(&self, signal: HostSignal) -> usize {
        let mut subs = lock_unpoisoned(&self.subscribers);
        subs.retain(|tx| tx.send(signal).is_ok());
        subs.len()
    }

    pub fn set_snapshot(&self, snapshot: EnvironmentSnapshot) {
        *lock_unpoisoned(&self.snapshot) = Some(snapshot);
    }
}

impl HostEnvironment for FakeEnvironment {
    fn subscribe_signals(&self) -> mpsc::UnboundedReceiver<HostSignal> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock_unpoisoned(&self.subscribers).push(tx);
        rx
    }

    fn capabilities(&self) -> EnvironmentSnapshot {
        lock_unpoisoned(&self.snapshot).unwrap_or(EnvironmentSnapshot {
            battery: proctor_kernel_contracts::capability::CapabilityReading::Unknown,
            connection: proctor_kernel_contracts::capability::CapabilityReading::Unknown,
        })
    }
}

#[derive(Default)]
struct ModelState {
    loads: usize,
    unloads: usize,
    detects: usize,
    fail_next_load: bool,
    fail_next_detect: bool,
    script: VecDeque<FaceDetection>,
}

/// Returns scripted detections in order, then one face with a zero embedding.
#[derive(Default)]
pub struct FakeFaceModel {
    state: Mutex<ModelState>,
}

impl FakeFaceModel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, detections: impl IntoIterator<Item = FaceDetection>) {
        lock_unpoisoned(&self.state).script.extend(detections);
    }

    pub fn fail_next_load(&self) {
        lock_unpoisoned(&self.state).fail_next_load = true;
    }

    pub fn fail_next_detect(&self) {
        lock_unpoisoned(&self.state).fail_next_detect = true;
    }

    pub fn loads(&self) -> usize {
        lock_unpoisoned(&self.state).loads
    }

    pub fn unloads(&self) -> usize {
        lock_unpoisoned(&self.state).unloads
    }

    pub fn detects(&self) -> usize {
        lock_unpoisoned(&self.state).detects
    }
}

#[async_trait]
impl FaceModel for FakeFaceModel {
    async fn load(&self) -> Result<(), FaceModelError> {
        let mut state = lock_unpoisoned(&self.state);
        state.loads += 1;
        if std::mem::take(&mut state.fail_next_load) {
            return Err(FaceModelError::Load("weights missing".to_string()));
        }
        Ok(())
    }

    async fn detect(&self, _frame: &VideoFrame) -> Result<FaceDetection, FaceModelError> {
        let mut state = lock_unpoisoned(&self.state);
        state.detects += 1;
        if std::mem::take(&mut state.fail_next_detect) {
            return Err(FaceModelError::Detection("inference error".to_string()));
        }
        Ok(state
            .script
            .pop_front()
            .unwrap_or_else(|| detection_with_faces(1)))
    }

    fn unload(&self) {
        lock_unpoisoned(&self.state).unloads += 1;
    }
}

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<ViolationReportPayload>>,
    attempts: AtomicUsize,
    failure: Option<ReportDeliveryError>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(err: ReportDeliveryError) -> Arc<Self> {
        Arc::new(Self {
            failure: Some(err),
            ..Self::default()
        })
    }

    pub fn sent(&self) -> Vec<ViolationReportPayload> {
        lock_unpoisoned(&self.sent).clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl ReportTransport for RecordingTransport {
    fn post(&self, payload: &ViolationReportPayload) -> Result<(), ReportDeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        lock_unpoisoned(&self.sent).push(payload.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSubmitter {
    calls: Mutex<Vec<(ExamId, bool)>>,
    fail: AtomicBool,
}

impl FakeSubmitter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let s = Self::default();
        s.fail.store(true, Ordering::SeqCst);
        Arc::new(s)
    }

    pub fn calls(&self) -> Vec<(ExamId, bool)> {
        lock_unpoisoned(&self.calls).clone()
    }
}

#[async_trait]
impl ExamSubmitter for FakeSubmitter {
    async fn submit(&self, exam_id: &ExamId, auto: bool) -> Result<(), SubmitError> {
        lock_unpoisoned(&self.calls).push((exam_id.clone(), auto));
        if self.fail.load(Ordering::SeqCst) {
            return Err(SubmitError::Transport("connection reset".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingUi {
    pub granted: Mutex<Vec<PermissionBundle>>,
    pub warnings: Mutex<Vec<EscalationReason>>,
    pub escalations: Mutex<Vec<EscalationReason>>,
}

impl RecordingUi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn granted_count(&self) -> usize {
        lock_unpoisoned(&self.granted).len()
    }

    pub fn warnings(&self) -> Vec<EscalationReason> {
        lock_unpoisoned(&self.warnings).clone()
    }

    pub fn escalations(&self) -> Vec<EscalationReason> {
        lock_unpoisoned(&self.escalations).clone()
    }
}

impl ProctorUiSink for RecordingUi {
    fn on_permissions_granted(&self, bundle: &PermissionBundle) {
        lock_unpoisoned(&self.granted).push(bundle.clone());
    }

    fn on_first_warning(&self, reason: &EscalationReason) {
        lock_unpoisoned(&self.warnings).push(reason.clone());
    }

    fn on_escalate(&self, reason: &EscalationReason) {
        lock_unpoisoned(&self.escalations).push(reason.clone());
    }
}
