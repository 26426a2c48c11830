#![forbid(unsafe_code)]

use proctor_kernel_contracts::escalation::{
    EscalationCounter, EscalationDirective, EscalationReason, EscalationState,
};
use proctor_kernel_contracts::violation::ViolationType;
use proctor_kernel_contracts::{ContractViolation, ReasonCodeId};

use crate::classifier::ClassifiedViolation;

pub mod reason_codes {
    use proctor_kernel_contracts::ReasonCodeId;

    pub const ESC_FIRST_WARNING: ReasonCodeId = ReasonCodeId(0x4553_0001);
    pub const ESC_TERMINATE_REPEATED: ReasonCodeId = ReasonCodeId(0x4553_0002);
    pub const ESC_TERMINATE_IDENTITY_MISMATCH: ReasonCodeId = ReasonCodeId(0x4553_0003);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationConfig {
    pub warn_at: u32,
    pub terminate_at: u32,
}

impl EscalationConfig {
    /// Two-strike policy: warn on the first infraction, submit on the second.
    pub fn mvp_v1() -> Self {
        Self {
            warn_at: 1,
            terminate_at: 2,
        }
    }
}

/// Per-session escalation state machine:
/// `Idle -> Monitoring -> Warned -> Terminated`, with identity mismatch
/// jumping straight to `Terminated`.
#[derive(Debug, Clone)]
pub struct EscalationEngine {
    config: EscalationConfig,
    state: EscalationState,
    counter: EscalationCounter,
}

impl EscalationEngine {
    pub fn new(config: EscalationConfig) -> Result<Self, ContractViolation> {
        if config.warn_at == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "escalation_config.warn_at",
                reason: "must be > 0",
            });
        }
        if config.terminate_at <= config.warn_at {
            return Err(ContractViolation::InvalidValue {
                field: "escalation_config.terminate_at",
                reason: "must be > warn_at",
            });
        }
        Ok(Self {
            config,
            state: EscalationState::Idle,
            counter: EscalationCounter::default(),
        })
    }

    pub fn state(&self) -> EscalationState {
        self.state
    }

    pub fn counter(&self) -> EscalationCounter {
        self.counter
    }

    pub fn begin_monitoring(&mut self) -> bool {
        if self.state != EscalationState::Idle {
            return false;
        }
        self.state = EscalationState::Monitoring;
        true
    }

    pub fn apply(&mut self, violation: &ClassifiedViolation) -> EscalationDirective {
        match self.state {
            EscalationState::Idle | EscalationState::Terminated => {
                return EscalationDirective::None
            }
            EscalationState::Monitoring | EscalationState::Warned => {}
        }
        if !violation.qualifying {
            return EscalationDirective::None;
        }

        let count = self.counter.increment();
        let record = &violation.record;

        if record.auto_submit {
            self.state = EscalationState::Terminated;
            return EscalationDirective::Terminate(self.reason(
                reason_codes::ESC_TERMINATE_IDENTITY_MISMATCH,
                violation,
                "Exam submitted automatically: the person on camera does not match the verified identity."
                    .to_string(),
            ));
        }

        if count >= self.config.terminate_at {
            self.state = EscalationState::Terminated;
            return EscalationDirective::Terminate(self.reason(
                reason_codes::ESC_TERMINATE_REPEATED,
                violation,
                format!(
                    "Exam submitted automatically after repeated violations (last: {}).",
                    describe(record.violation_type)
                ),
            ));
        }

        if count >= self.config.warn_at && self.state == EscalationState::Monitoring {
            self.state = EscalationState::Warned;
            return EscalationDirective::FirstWarning(self.reason(
                reason_codes::ESC_FIRST_WARNING,
                violation,
                format!(
                    "Warning: {} detected. Another violation will submit your exam automatically.",
                    describe(record.violation_type)
                ),
            ));
        }

        EscalationDirective::None
    }

    fn reason(
        &self,
        reason_code: ReasonCodeId,
        violation: &ClassifiedViolation,
        message: String,
    ) -> EscalationReason {
        EscalationReason {
            reason_code,
            violation_id: violation.record.id.clone(),
            violation_type: violation.record.violation_type,
            counter: self.counter,
            message,
        }
    }
}

fn describe(violation_type: ViolationType) -> &'static str {
    match violation_type {
        ViolationType::NoFaceDetected => "no face in camera view",
        ViolationType::MultipleFaces => "more than one person in camera view",
        ViolationType::LookingAway => "looking away from the screen",
        ViolationType::FaceMismatch => "identity mismatch",
        ViolationType::TabSwitch => "tab switch",
        ViolationType::FullscreenExit => "fullscreen exit",
        ViolationType::ClipboardUse => "clipboard use",
        ViolationType::WindowBlur => "leaving the exam window",
        ViolationType::RightClick => "right click",
        ViolationType::TextSelection => "text selection",
        ViolationType::ScreenShareStopped => "screen sharing stopped",
        ViolationType::CameraStopped => "camera stopped",
    }
}
