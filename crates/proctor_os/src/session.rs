#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use proctor_engines::classifier::{ClassifiedViolation, ViolationClassifier};
use proctor_engines::environment::{assess_environment, EnvironmentAssessment};
use proctor_engines::escalation::EscalationEngine;
use proctor_engines::presence::{
    IdentityVerdict, PresenceEvaluator, ReferenceCaptureError,
};
use proctor_engines::reporter::ReportTransport;
use proctor_kernel_contracts::escalation::{EscalationDirective, EscalationState};
use proctor_kernel_contracts::presence::ReferenceIdentity;
use proctor_kernel_contracts::resource::{PermissionBundle, ResourceKind};
use proctor_kernel_contracts::violation::{ExamId, HostSignal, ViolationRecord};
use proctor_kernel_contracts::ContractViolation;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::acquirer::ResourceAcquirer;
use crate::clock::SessionClock;
use crate::config::ProctorConfig;
use crate::coordinator::PermissionCoordinator;
use crate::face_model::{FaceModelError, FaceModelHandle};
use crate::host::{ExamSubmitter, HostEnvironment, HostMediaApi, ProctorUiSink};
use crate::lock_unpoisoned;
use crate::reporter::ViolationReporter;
use crate::sampler::{PresenceSampler, SampledPresence};
use crate::violation_log::ViolationLog;

/// Host collaborators injected into a session manager.
#[derive(Clone)]
pub struct SessionDeps {
    pub media: Arc<dyn HostMediaApi>,
    pub environment: Arc<dyn HostEnvironment>,
    pub face_model: Arc<FaceModelHandle>,
    pub report_transport: Arc<dyn ReportTransport>,
    pub submitter: Arc<dyn ExamSubmitter>,
    pub ui: Arc<dyn ProctorUiSink>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SessionError {
    #[error("a monitoring session is already active")]
    AlreadyActive,
    #[error("no async runtime available")]
    NoRuntime,
    #[error("session configuration invalid: {0}")]
    Contract(#[from] ContractViolation),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum IdentityVerificationError {
    #[error("camera is not granted or has no live frame")]
    CameraUnavailable,
    #[error(transparent)]
    Model(#[from] FaceModelError),
    #[error(transparent)]
    Capture(#[from] ReferenceCaptureError),
}

/// Point-in-time view for status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub exam_id: Option<ExamId>,
    pub state: EscalationState,
    pub counter: u32,
    pub violation_count: usize,
    pub ended: bool,
    pub sampling: bool,
    pub permissions: PermissionBundle,
}

enum SessionEvent {
    Host(HostSignal),
    Revoked(ResourceKind),
    Presence(SampledPresence),
}

struct ActiveSession {
    epoch: u64,
    exam_id: ExamId,
    classifier: ViolationClassifier,
    escalation: EscalationEngine,
    log: Option<Arc<ViolationLog>>,
    recorded: usize,
    ended: bool,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Default)]
struct SessionCore {
    epoch: u64,
    active: Option<ActiveSession>,
}

struct Inner {
    config: ProctorConfig,
    clock: SessionClock,
    acquirer: Arc<ResourceAcquirer>,
    coordinator: PermissionCoordinator,
    sampler: PresenceSampler,
    evaluator: PresenceEvaluator,
    face_model: Arc<FaceModelHandle>,
    reporter: ViolationReporter,
    environment: Arc<dyn HostEnvironment>,
    submitter: Arc<dyn ExamSubmitter>,
    ui: Arc<dyn ProctorUiSink>,
    reference: Mutex<Option<ReferenceIdentity>>,
    core: Mutex<SessionCore>,
}

/// Owns one exam's monitoring lifecycle: subscriptions, sampling loop,
/// classification, escalation and teardown.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(config: ProctorConfig, deps: SessionDeps) -> Result<Self, ContractViolation> {
        let evaluator = PresenceEvaluator::new(config.evaluator)?;
        EscalationEngine::new(config.escalation)?;
        let clock = SessionClock::start();
        let acquirer = ResourceAcquirer::new(deps.media);
        let sampler = PresenceSampler::new(
            Arc::clone(&acquirer),
            Arc::clone(&deps.face_model),
            evaluator.clone(),
            clock,
        );
        let coordinator = PermissionCoordinator::new(Arc::clone(&acquirer), Arc::clone(&deps.ui));
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                clock,
                acquirer,
                coordinator,
                sampler,
                evaluator,
                face_model: deps.face_model,
                reporter: ViolationReporter::new(deps.report_transport),
                environment: deps.environment,
                submitter: deps.submitter,
                ui: deps.ui,
                reference: Mutex::new(None),
                core: Mutex::new(SessionCore::default()),
            }),
        })
    }

    pub fn acquirer(&self) -> &Arc<ResourceAcquirer> {
        &self.inner.acquirer
    }

    pub async fn grant_all(&self) -> PermissionBundle {
        self.inner.coordinator.grant_all().await
    }

    pub async fn enter_fullscreen(&self) -> PermissionBundle {
        self.inner.coordinator.enter_fullscreen().await
    }

    pub fn permissions(&self) -> PermissionBundle {
        self.inner.acquirer.bundle()
    }

    pub fn environment_status(&self) -> EnvironmentAssessment {
        assess_environment(
            &self.inner.config.environment,
            &self.inner.environment.capabilities(),
        )
    }

    /// Captures the reference face from the live camera. Exactly one face
    /// with an embedding must be visible.
    pub async fn verify_identity(&self) -> Result<ReferenceIdentity, IdentityVerificationError> {
        let frame = self
            .inner
            .acquirer
            .camera_frame()
            .ok_or(IdentityVerificationError::CameraUnavailable)?;
        let detection = self.inner.face_model.detect(&frame).await?;
        let reference = self.inner.evaluator.capture_reference(
            &detection,
            frame.jpeg.to_vec(),
            self.inner.clock.now_wall(),
        )?;
        *lock_unpoisoned(&self.inner.reference) = Some(reference.clone());
        tracing::info!("reference identity captured");
        Ok(reference)
    }

    /// Installs a reference verified outside this manager.
    pub fn set_reference_identity(&self, reference: ReferenceIdentity) {
        *lock_unpoisoned(&self.inner.reference) = Some(reference);
    }

    pub fn reset_identity(&self) {
        lock_unpoisoned(&self.inner.reference).take();
    }

    pub fn has_reference_identity(&self) -> bool {
        lock_unpoisoned(&self.inner.reference).is_some()
    }

    /// Opens a session in `Idle`. Escalation and sampling begin once the
    /// camera (and fullscreen, when required) is granted; host and revocation
    /// events before that are dropped.
    pub fn start(&self, exam_id: ExamId) -> Result<SessionStatus, SessionError> {
        let runtime = Handle::try_current().map_err(|_| SessionError::NoRuntime)?;
        let classifier = ViolationClassifier::new(self.inner.config.classifier, exam_id.clone())?;
        let escalation = EscalationEngine::new(self.inner.config.escalation)?;

        let epoch = {
            let mut core = lock_unpoisoned(&self.inner.core);
            if core.active.as_ref().is_some_and(|a| !a.ended) {
                return Err(SessionError::AlreadyActive);
            }
            core.epoch += 1;
            let epoch = core.epoch;
            core.active = Some(ActiveSession {
                epoch,
                exam_id: exam_id.clone(),
                classifier,
                escalation,
                log: Some(Arc::new(ViolationLog::new())),
                recorded: 0,
                ended: false,
                tasks: Vec::new(),
            });
            epoch
        };

        let weak = Arc::downgrade(&self.inner);
        let tasks = vec![
            runtime.spawn(pump_host_signals(
                weak.clone(),
                epoch,
                self.inner.environment.subscribe_signals(),
            )),
            runtime.spawn(pump_liveness(
                weak.clone(),
                epoch,
                self.inner.acquirer.on_liveness_lost(),
            )),
            runtime.spawn(gate_and_sample(weak, epoch)),
        ];

        {
            let mut core = lock_unpoisoned(&self.inner.core);
            match core.active.as_mut() {
                Some(a) if a.epoch == epoch && !a.ended => a.tasks = tasks,
                _ => tasks.iter().for_each(JoinHandle::abort),
            }
        }
        tracing::info!(exam_id = exam_id.as_str(), "monitoring session started");
        Ok(self.status())
    }

    /// Tears the session down: listeners detached, sampling stopped, every
    /// resource released and the log reference dropped. Safe to call at any
    /// time and any number of times; returns whether a live session ended.
    pub fn end(&self) -> bool {
        self.inner.end()
    }

    pub fn status(&self) -> SessionStatus {
        let permissions = self.inner.acquirer.bundle();
        let sampling = self.inner.sampler.is_running();
        let core = lock_unpoisoned(&self.inner.core);
        match core.active.as_ref() {
            Some(a) => SessionStatus {
                exam_id: Some(a.exam_id.clone()),
                state: a.escalation.state(),
                counter: a.escalation.counter().value(),
                violation_count: a.recorded,
                ended: a.ended,
                sampling,
                permissions,
            },
            None => SessionStatus {
                exam_id: None,
                state: EscalationState::Idle,
                counter: 0,
                violation_count: 0,
                ended: false,
                sampling,
                permissions,
            },
        }
    }

    /// The live session log; `None` before start and after end.
    pub fn violation_log(&self) -> Option<Arc<ViolationLog>> {
        let core = lock_unpoisoned(&self.inner.core);
        core.active.as_ref().and_then(|a| a.log.clone())
    }

    pub fn violations(&self) -> Vec<Arc<ViolationRecord>> {
        self.violation_log()
            .map(|log| log.snapshot())
            .unwrap_or_default()
    }
}

impl Inner {
    fn end(&self) -> bool {
        let (tasks, ended_now) = {
            let mut core = lock_unpoisoned(&self.core);
            match core.active.as_mut() {
                Some(a) if !a.ended => {
                    a.ended = true;
                    a.log = None;
                    (std::mem::take(&mut a.tasks), true)
                }
                _ => (Vec::new(), false),
            }
        };
        for task in &tasks {
            task.abort();
        }
        self.sampler.stop_sampling();
        self.acquirer.release_all();
        if ended_now {
            tracing::info!("monitoring session ended");
        }
        ended_now
    }

    fn ingest(&self, epoch: u64, event: SessionEvent) {
        let now = self.clock.now_mono();
        let wall = self.clock.now_wall();
        let verdict = match &event {
            SessionEvent::Presence(p) => {
                let reference = lock_unpoisoned(&self.reference);
                self.evaluator.compare_identity(&p.sample, reference.as_ref())
            }
            SessionEvent::Host(_) | SessionEvent::Revoked(_) => IdentityVerdict::NoReference,
        };

        let (exam_id, outcomes) = {
            let mut core = lock_unpoisoned(&self.core);
            let Some(active) = core.active.as_mut() else {
                return;
            };
            if active.ended || active.epoch != epoch {
                return;
            }
            if active.escalation.state() == EscalationState::Idle {
                tracing::debug!("monitoring gate closed; event ignored");
                return;
            }
            let Some(log) = active.log.clone() else {
                return;
            };
            let classified: Result<Vec<ClassifiedViolation>, ContractViolation> = match &event {
                SessionEvent::Host(signal) => active
                    .classifier
                    .on_host_signal(*signal, now, wall)
                    .map(|c| c.into_iter().collect()),
                SessionEvent::Revoked(kind) => active
                    .classifier
                    .on_resource_revoked(*kind, now, wall)
                    .map(|c| c.into_iter().collect()),
                SessionEvent::Presence(p) => {
                    active.classifier.on_presence_sample(&p.sample, verdict, wall)
                }
            };
            let classified = match classified {
                Ok(c) => c,
                Err(err) => {
                    tracing::warn!(error = %err, "violation dropped: record failed validation");
                    return;
                }
            };
            let mut outcomes = Vec::with_capacity(classified.len());
            for violation in classified {
                let directive = active.escalation.apply(&violation);
                let record = log.append(violation.record);
                active.recorded += 1;
                outcomes.push((record, directive));
            }
            (active.exam_id.clone(), outcomes)
        };

        for (record, directive) in outcomes {
            tracing::info!(
                exam_id = exam_id.as_str(),
                violation_type = %record.violation_type,
                severity = record.severity.as_str(),
                "violation recorded"
            );
            let snapshot = match &event {
                SessionEvent::Presence(p) if record.violation_type.is_presence_derived() => {
                    Some(&*p.snapshot_jpeg)
                }
                _ => None,
            };
            self.reporter.report(&record, snapshot);
            self.act(&exam_id, directive);
        }
    }

    fn act(&self, exam_id: &ExamId, directive: EscalationDirective) {
        match directive {
            EscalationDirective::None => {}
            EscalationDirective::FirstWarning(reason) => {
                tracing::warn!(
                    exam_id = exam_id.as_str(),
                    violation_type = %reason.violation_type,
                    "first warning issued"
                );
                self.ui.on_first_warning(&reason);
            }
            EscalationDirective::Terminate(reason) => {
                tracing::warn!(
                    exam_id = exam_id.as_str(),
                    violation_type = %reason.violation_type,
                    counter = reason.counter.value(),
                    "session terminated; submitting exam"
                );
                self.ui.on_escalate(&reason);
                self.submit_forced(exam_id.clone());
                self.end();
            }
        }
    }

    fn submit_forced(&self, exam_id: ExamId) {
        let Ok(runtime) = Handle::try_current() else {
            tracing::error!(exam_id = exam_id.as_str(), "no async runtime; forced submission skipped");
            return;
        };
        let submitter = Arc::clone(&self.submitter);
        runtime.spawn(async move {
            match submitter.submit(&exam_id, true).await {
                Ok(()) => tracing::info!(exam_id = exam_id.as_str(), "forced submission accepted"),
                Err(err) => tracing::error!(
                    exam_id = exam_id.as_str(),
                    error = %err,
                    "forced submission failed; session remains terminated"
                ),
            }
        });
    }

    /// Moves the session from `Idle` to `Monitoring`; false if it was ended
    /// or replaced in the meantime.
    fn begin_monitoring(&self, epoch: u64) -> bool {
        let mut core = lock_unpoisoned(&self.core);
        match core.active.as_mut() {
            Some(active) if active.epoch == epoch && !active.ended => {
                active.escalation.begin_monitoring();
                tracing::info!(exam_id = active.exam_id.as_str(), "monitoring gate opened");
                true
            }
            _ => false,
        }
    }

    fn monitoring_ready(&self, bundle: &PermissionBundle) -> bool {
        bundle.camera.is_granted()
            && (!self.config.require_fullscreen_for_monitoring || bundle.fullscreen.is_granted())
    }
}

async fn pump_host_signals(
    weak: Weak<Inner>,
    epoch: u64,
    mut signals: tokio::sync::mpsc::UnboundedReceiver<HostSignal>,
) {
    while let Some(signal) = signals.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        if signal == HostSignal::FullscreenExited {
            inner.acquirer.mark_fullscreen_exited();
        }
        inner.ingest(epoch, SessionEvent::Host(signal));
    }
}

async fn pump_liveness(
    weak: Weak<Inner>,
    epoch: u64,
    mut lost: tokio::sync::broadcast::Receiver<ResourceKind>,
) {
    loop {
        let kind = match lost.recv().await {
            Ok(kind) => kind,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "liveness notifications lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let Some(inner) = weak.upgrade() else {
            break;
        };
        inner.ingest(epoch, SessionEvent::Revoked(kind));
    }
}

/// Waits for the monitoring permissions, then opens escalation and runs the
/// sampling loop.
async fn gate_and_sample(weak: Weak<Inner>, epoch: u64) {
    let Some(mut bundles) = weak.upgrade().map(|inner| inner.acquirer.watch_bundle()) else {
        return;
    };
    loop {
        let ready = {
            let bundle = bundles.borrow_and_update();
            match weak.upgrade() {
                Some(inner) => inner.monitoring_ready(&bundle),
                None => return,
            }
        };
        if ready {
            break;
        }
        if bundles.changed().await.is_err() {
            return;
        }
    }

    let mut samples = {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if !inner.begin_monitoring(epoch) {
            return;
        }
        let interval = Duration::from_millis(inner.config.sampling_interval_ms);
        tracing::info!(interval_ms = inner.config.sampling_interval_ms, "presence sampling started");
        inner.sampler.start_sampling(interval)
    };
    while let Some(sampled) = samples.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        inner.ingest(epoch, SessionEvent::Presence(sampled));
    }
}
