#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use crate::common::validate_token_text;
use crate::{ContractViolation, SchemaVersion, UnixTimeMs, Validate};

pub const VIOLATION_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

pub const MAX_DETAIL_ENTRIES: usize = 16;
pub const MAX_DETAIL_VALUE_LEN: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExamId(String);

impl ExamId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = Self(id.into());
        id.validate()?;
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for ExamId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token_text("exam_id", &self.0, 128)
    }
}

impl std::fmt::Display for ExamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ViolationId(String);

impl ViolationId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = Self(id.into());
        id.validate()?;
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for ViolationId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token_text("violation_id", &self.0, 64)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    NoFaceDetected,
    MultipleFaces,
    LookingAway,
    FaceMismatch,
    TabSwitch,
    FullscreenExit,
    ClipboardUse,
    WindowBlur,
    RightClick,
    TextSelection,
    ScreenShareStopped,
    CameraStopped,
}

impl ViolationType {
    pub const ALL: [ViolationType; 12] = [
        ViolationType::NoFaceDetected,
        ViolationType::MultipleFaces,
        ViolationType::LookingAway,
        ViolationType::FaceMismatch,
        ViolationType::TabSwitch,
        ViolationType::FullscreenExit,
        ViolationType::ClipboardUse,
        ViolationType::WindowBlur,
        ViolationType::RightClick,
        ViolationType::TextSelection,
        ViolationType::ScreenShareStopped,
        ViolationType::CameraStopped,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ViolationType::NoFaceDetected => "no_face_detected",
            ViolationType::MultipleFaces => "multiple_faces",
            ViolationType::LookingAway => "looking_away",
            ViolationType::FaceMismatch => "face_mismatch",
            ViolationType::TabSwitch => "tab_switch",
            ViolationType::FullscreenExit => "fullscreen_exit",
            ViolationType::ClipboardUse => "clipboard_use",
            ViolationType::WindowBlur => "window_blur",
            ViolationType::RightClick => "right_click",
            ViolationType::TextSelection => "text_selection",
            ViolationType::ScreenShareStopped => "screen_share_stopped",
            ViolationType::CameraStopped => "camera_stopped",
        }
    }

    /// Violations derived from camera sampling rather than host events.
    pub fn is_presence_derived(self) -> bool {
        matches!(
            self,
            ViolationType::NoFaceDetected
                | ViolationType::MultipleFaces
                | ViolationType::LookingAway
                | ViolationType::FaceMismatch
        )
    }
}

impl std::fmt::Display for ViolationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ViolationSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ViolationSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationSeverity::Low => "low",
            ViolationSeverity::Medium => "medium",
            ViolationSeverity::High => "high",
            ViolationSeverity::Critical => "critical",
        }
    }
}

/// Payload-free host environment events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostSignal {
    VisibilityHidden,
    WindowBlur,
    FullscreenExited,
    ClipboardCopy,
    ClipboardCut,
    ClipboardPaste,
    ContextMenu,
    TextSelection,
}

impl HostSignal {
    pub fn violation_type(self) -> ViolationType {
        match self {
            HostSignal::VisibilityHidden => ViolationType::TabSwitch,
            HostSignal::WindowBlur => ViolationType::WindowBlur,
            HostSignal::FullscreenExited => ViolationType::FullscreenExit,
            HostSignal::ClipboardCopy | HostSignal::ClipboardCut | HostSignal::ClipboardPaste => {
                ViolationType::ClipboardUse
            }
            HostSignal::ContextMenu => ViolationType::RightClick,
            HostSignal::TextSelection => ViolationType::TextSelection,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HostSignal::VisibilityHidden => "visibility_hidden",
            HostSignal::WindowBlur => "window_blur",
            HostSignal::FullscreenExited => "fullscreen_exited",
            HostSignal::ClipboardCopy => "copy",
            HostSignal::ClipboardCut => "cut",
            HostSignal::ClipboardPaste => "paste",
            HostSignal::ContextMenu => "context_menu",
            HostSignal::TextSelection => "text_selection",
        }
    }
}

pub type ViolationDetails = BTreeMap<String, String>;

/// Immutable record of one classified violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationRecord {
    pub schema_version: SchemaVersion,
    pub id: ViolationId,
    pub violation_type: ViolationType,
    pub severity: ViolationSeverity,
    pub timestamp: UnixTimeMs,
    pub details: ViolationDetails,
    pub exam_id: ExamId,
    /// Set only for identity mismatch, which ends the session on its own.
    pub auto_submit: bool,
}

impl ViolationRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn v1(
        id: ViolationId,
        violation_type: ViolationType,
        severity: ViolationSeverity,
        timestamp: UnixTimeMs,
        details: ViolationDetails,
        exam_id: ExamId,
        auto_submit: bool,
    ) -> Result<Self, ContractViolation> {
        let r = Self {
            schema_version: VIOLATION_CONTRACT_VERSION,
            id,
            violation_type,
            severity,
            timestamp,
            details,
            exam_id,
            auto_submit,
        };
        r.validate()?;
        Ok(r)
    }
}

impl Validate for ViolationRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != VIOLATION_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "violation_record.schema_version",
                reason: "must match VIOLATION_CONTRACT_VERSION",
            });
        }
        self.id.validate()?;
        self.exam_id.validate()?;
        if self.auto_submit && self.violation_type != ViolationType::FaceMismatch {
            return Err(ContractViolation::InvalidValue {
                field: "violation_record.auto_submit",
                reason: "only face_mismatch may request auto submit",
            });
        }
        if self.violation_type == ViolationType::MultipleFaces
            && self.severity != ViolationSeverity::Critical
        {
            return Err(ContractViolation::InvalidValue {
                field: "violation_record.severity",
                reason: "multiple_faces is always critical",
            });
        }
        if self.details.len() > MAX_DETAIL_ENTRIES {
            return Err(ContractViolation::InvalidValue {
                field: "violation_record.details",
                reason: "must be <= 16 entries",
            });
        }
        for (k, v) in &self.details {
            validate_token_text("violation_record.details.key", k, 64)?;
            if v.len() > MAX_DETAIL_VALUE_LEN {
                return Err(ContractViolation::InvalidValue {
                    field: "violation_record.details.value",
                    reason: "must be <= 512 chars",
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(t: ViolationType, s: ViolationSeverity, auto_submit: bool) -> Result<ViolationRecord, ContractViolation> {
        ViolationRecord::v1(
            ViolationId::new("vio_0001").unwrap(),
            t,
            s,
            UnixTimeMs(1_700_000_000_000),
            ViolationDetails::new(),
            ExamId::new("exam_42").unwrap(),
            auto_submit,
        )
    }

    #[test]
    fn at_violation_01_auto_submit_reserved_for_face_mismatch() {
        assert!(record(ViolationType::TabSwitch, ViolationSeverity::High, true).is_err());
        assert!(record(ViolationType::FaceMismatch, ViolationSeverity::Critical, true).is_ok());
    }

    #[test]
    fn at_violation_02_multiple_faces_must_be_critical() {
        assert!(record(ViolationType::MultipleFaces, ViolationSeverity::High, false).is_err());
        assert!(record(ViolationType::MultipleFaces, ViolationSeverity::Critical, false).is_ok());
    }

    #[test]
    fn at_violation_03_clipboard_signals_share_one_type() {
        for s in [
            HostSignal::ClipboardCopy,
            HostSignal::ClipboardCut,
            HostSignal::ClipboardPaste,
        ] {
            assert_eq!(s.violation_type(), ViolationType::ClipboardUse);
        }
        assert_eq!(
            HostSignal::VisibilityHidden.violation_type(),
            ViolationType::TabSwitch
        );
    }

    #[test]
    fn at_violation_04_wire_names_are_snake_case() {
        for t in ViolationType::ALL {
            assert!(t.as_str().chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
        assert_eq!(ViolationSeverity::Critical.as_str(), "critical");
    }
}
