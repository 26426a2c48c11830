#![forbid(unsafe_code)]

use crate::violation::{ViolationId, ViolationType};
use crate::ReasonCodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EscalationState {
    Idle,
    Monitoring,
    Warned,
    Terminated,
}

impl EscalationState {
    pub fn as_str(self) -> &'static str {
        match self {
            EscalationState::Idle => "idle",
            EscalationState::Monitoring => "monitoring",
            EscalationState::Warned => "warned",
            EscalationState::Terminated => "terminated",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == EscalationState::Terminated
    }
}

/// Per-session count of qualifying infractions. Never decremented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EscalationCounter(u32);

impl EscalationCounter {
    pub fn value(self) -> u32 {
        self.0
    }

    pub fn increment(&mut self) -> u32 {
        self.0 = self.0.saturating_add(1);
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationReason {
    pub reason_code: ReasonCodeId,
    pub violation_id: ViolationId,
    pub violation_type: ViolationType,
    pub counter: EscalationCounter,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationDirective {
    None,
    /// Non-blocking overlay: a further attempt auto-submits.
    FirstWarning(EscalationReason),
    /// Forced submission of the exam.
    Terminate(EscalationReason),
}
