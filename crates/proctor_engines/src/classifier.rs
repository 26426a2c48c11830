#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use proctor_kernel_contracts::presence::{GazeStatus, PresenceSample};
use proctor_kernel_contracts::resource::ResourceKind;
use proctor_kernel_contracts::violation::{
    ExamId, HostSignal, ViolationDetails, ViolationId, ViolationRecord, ViolationSeverity,
    ViolationType,
};
use proctor_kernel_contracts::{ContractViolation, MonotonicTimeNs, UnixTimeMs};
use sha2::{Digest, Sha256};

use crate::presence::IdentityVerdict;

/// How strictly a violation type gates on repetition or persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrictnessPolicy {
    /// Every occurrence is recorded.
    Immediate,
    /// Repeats inside the window after the last recorded occurrence are dropped.
    Debounced { window_ms: u64 },
    /// The condition must hold for the grace period before one record is made.
    /// Elapsed time is measured from the last sample that still saw the
    /// condition clear (the first failing sample when there is none), and the
    /// record fires once `elapsed >= grace_ms`. With 1 Hz sampling and a 5 s
    /// grace that is the fifth failing sample after the last good one.
    Persistent { grace_ms: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViolationPolicy {
    pub severity: ViolationSeverity,
    pub strictness: StrictnessPolicy,
    /// Whether the violation counts toward escalation.
    pub qualifying: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierConfig {
    pub host_debounce_ms: u64,
    pub no_face_grace_ms: u64,
    pub looking_away_escalates: bool,
    /// A host-derived infraction inside the debounce window of the previous
    /// counted host infraction is recorded but not counted again. A tab switch
    /// fires both visibility and blur events.
    pub coalesce_host_signals: bool,
}

impl ClassifierConfig {
    pub fn mvp_v1() -> Self {
        Self {
            host_debounce_ms: 2_000,
            no_face_grace_ms: 5_000,
            looking_away_escalates: false,
            coalesce_host_signals: true,
        }
    }

    pub fn policy_for(&self, violation_type: ViolationType) -> ViolationPolicy {
        let debounced = StrictnessPolicy::Debounced {
            window_ms: self.host_debounce_ms,
        };
        let (severity, strictness, qualifying) = match violation_type {
            ViolationType::NoFaceDetected => (
                ViolationSeverity::High,
                StrictnessPolicy::Persistent {
                    grace_ms: self.no_face_grace_ms,
                },
                true,
            ),
            ViolationType::MultipleFaces => {
                (ViolationSeverity::Critical, StrictnessPolicy::Immediate, true)
            }
            ViolationType::LookingAway => (
                ViolationSeverity::Low,
                StrictnessPolicy::Immediate,
                self.looking_away_escalates,
            ),
            ViolationType::FaceMismatch => {
                (ViolationSeverity::Critical, StrictnessPolicy::Immediate, true)
            }
            ViolationType::TabSwitch => (ViolationSeverity::High, debounced, true),
            ViolationType::FullscreenExit => (ViolationSeverity::High, debounced, true),
            ViolationType::ClipboardUse => (ViolationSeverity::Medium, debounced, true),
            ViolationType::WindowBlur => (ViolationSeverity::Medium, debounced, true),
            ViolationType::RightClick => (ViolationSeverity::Low, debounced, false),
            ViolationType::TextSelection => (ViolationSeverity::Low, debounced, false),
            ViolationType::ScreenShareStopped => (ViolationSeverity::High, debounced, true),
            ViolationType::CameraStopped => (ViolationSeverity::High, debounced, true),
        };
        ViolationPolicy {
            severity,
            strictness,
            qualifying,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedViolation {
    pub record: ViolationRecord,
    pub qualifying: bool,
}

/// Maps raw signals into violation records for one exam session.
#[derive(Debug, Clone)]
pub struct ViolationClassifier {
    config: ClassifierConfig,
    exam_id: ExamId,
    next_seq: u64,
    last_recorded: BTreeMap<ViolationType, MonotonicTimeNs>,
    last_counted_host_at: Option<MonotonicTimeNs>,
    last_face_seen_at: Option<MonotonicTimeNs>,
    absence_reported: bool,
}

impl ViolationClassifier {
    pub fn new(config: ClassifierConfig, exam_id: ExamId) -> Result<Self, ContractViolation> {
        if config.host_debounce_ms > 60_000 {
            return Err(ContractViolation::InvalidValue {
                field: "classifier_config.host_debounce_ms",
                reason: "must be <= 60000",
            });
        }
        if config.no_face_grace_ms == 0 || config.no_face_grace_ms > 300_000 {
            return Err(ContractViolation::InvalidValue {
                field: "classifier_config.no_face_grace_ms",
                reason: "must be within 1..=300000",
            });
        }
        Ok(Self {
            config,
            exam_id,
            next_seq: 1,
            last_recorded: BTreeMap::new(),
            last_counted_host_at: None,
            last_face_seen_at: None,
            absence_reported: false,
        })
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn exam_id(&self) -> &ExamId {
        &self.exam_id
    }

    pub fn on_host_signal(
        &mut self,
        signal: HostSignal,
        now: MonotonicTimeNs,
        wall: UnixTimeMs,
    ) -> Result<Option<ClassifiedViolation>, ContractViolation> {
        let mut details = ViolationDetails::new();
        details.insert("signal".to_string(), signal.as_str().to_string());
        self.classify_host_derived(signal.violation_type(), details, now, wall)
    }

    /// Liveness lost on a granted resource, e.g. sharing stopped from browser chrome.
    pub fn on_resource_revoked(
        &mut self,
        kind: ResourceKind,
        now: MonotonicTimeNs,
        wall: UnixTimeMs,
    ) -> Result<Option<ClassifiedViolation>, ContractViolation> {
        let violation_type = match kind {
            ResourceKind::ScreenShare => ViolationType::ScreenShareStopped,
            ResourceKind::Camera => ViolationType::CameraStopped,
            ResourceKind::Fullscreen => ViolationType::FullscreenExit,
            ResourceKind::Microphone => return Ok(None),
        };
        let mut details = ViolationDetails::new();
        details.insert("resource".to_string(), kind.as_str().to_string());
        self.classify_host_derived(violation_type, details, now, wall)
    }

    pub fn on_presence_sample(
        &mut self,
        sample: &PresenceSample,
        identity: IdentityVerdict,
        wall: UnixTimeMs,
    ) -> Result<Vec<ClassifiedViolation>, ContractViolation> {
        let now = sample.sampled_at;
        let mut out = Vec::new();

        if sample.face_count == 0 {
            let anchor = *self.last_face_seen_at.get_or_insert(now);
            let absent_ms = now.saturating_elapsed_ms(anchor);
            let grace_ms = self.config.no_face_grace_ms;
            if !self.absence_reported && absent_ms >= grace_ms {
                self.absence_reported = true;
                let mut details = ViolationDetails::new();
                details.insert("absent_ms".to_string(), absent_ms.to_string());
                out.push(self.build(ViolationType::NoFaceDetected, details, now, wall)?);
            }
            return Ok(out);
        }

        self.last_face_seen_at = Some(now);
        self.absence_reported = false;

        if sample.face_count > 1 {
            let mut details = ViolationDetails::new();
            details.insert("face_count".to_string(), sample.face_count.to_string());
            out.push(self.build(ViolationType::MultipleFaces, details, now, wall)?);
            return Ok(out);
        }

        if let IdentityVerdict::Mismatch { distance } = identity {
            let mut details = ViolationDetails::new();
            details.insert("distance".to_string(), format!("{distance:.3}"));
            out.push(self.build(ViolationType::FaceMismatch, details, now, wall)?);
        }

        if sample.gaze == GazeStatus::Away {
            out.push(self.build(ViolationType::LookingAway, ViolationDetails::new(), now, wall)?);
        }

        Ok(out)
    }

    fn classify_host_derived(
        &mut self,
        violation_type: ViolationType,
        details: ViolationDetails,
        now: MonotonicTimeNs,
        wall: UnixTimeMs,
    ) -> Result<Option<ClassifiedViolation>, ContractViolation> {
        let policy = self.config.policy_for(violation_type);
        if let StrictnessPolicy::Debounced { window_ms } = policy.strictness {
            if let Some(last) = self.last_recorded.get(&violation_type) {
                if now.saturating_elapsed_ms(*last) < window_ms {
                    tracing::debug!(
                        exam_id = %self.exam_id,
                        violation_type = %violation_type,
                        "debounced repeat host signal"
                    );
                    return Ok(None);
                }
            }
        }

        let mut classified = self.build(violation_type, details, now, wall)?;
        if classified.qualifying && self.config.coalesce_host_signals {
            let coalesced = self
                .last_counted_host_at
                .is_some_and(|last| now.saturating_elapsed_ms(last) < self.config.host_debounce_ms);
            if coalesced {
                classified.qualifying = false;
            } else {
                self.last_counted_host_at = Some(now);
            }
        }
        Ok(Some(classified))
    }

    fn build(
        &mut self,
        violation_type: ViolationType,
        details: ViolationDetails,
        now: MonotonicTimeNs,
        wall: UnixTimeMs,
    ) -> Result<ClassifiedViolation, ContractViolation> {
        let policy = self.config.policy_for(violation_type);
        let seq = self.next_seq;
        let id = violation_id(&self.exam_id, seq, wall)?;
        let record = ViolationRecord::v1(
            id,
            violation_type,
            policy.severity,
            wall,
            details,
            self.exam_id.clone(),
            violation_type == ViolationType::FaceMismatch,
        )?;
        self.next_seq += 1;
        self.last_recorded.insert(violation_type, now);
        Ok(ClassifiedViolation {
            record,
            qualifying: policy.qualifying,
        })
    }
}

/// Deterministic id: `vio_` plus the first 8 bytes of
/// SHA-256(exam_id | seq | timestamp) in hex.
pub fn violation_id(
    exam_id: &ExamId,
    seq: u64,
    wall: UnixTimeMs,
) -> Result<ViolationId, ContractViolation> {
    let mut hasher = Sha256::new();
    hasher.update(exam_id.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(seq.to_be_bytes());
    hasher.update(wall.0.to_be_bytes());
    let digest = hasher.finalize();
    let hex: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    ViolationId::new(format!("vio_{hex}"))
}
