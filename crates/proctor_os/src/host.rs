#![forbid(unsafe_code)]

//! Collaborators supplied by the host platform: media capture, environment
//! signals, exam submission and the UI surface.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use proctor_kernel_contracts::capability::{CapabilityReading, EnvironmentSnapshot};
use proctor_kernel_contracts::escalation::EscalationReason;
use proctor_kernel_contracts::resource::{PermissionBundle, ResourceKind};
use proctor_kernel_contracts::violation::{ExamId, HostSignal};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

/// One encoded camera frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub jpeg: Arc<[u8]>,
}

pub type TrackEndedCallback = Box<dyn FnOnce() + Send + 'static>;

pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn kind(&self) -> TrackKind;

    fn is_live(&self) -> bool;

    fn stop(&self);

    /// Registers a one-shot callback for when the track ends outside of
    /// `stop()`, e.g. the user stops sharing from browser chrome.
    fn on_ended(&self, callback: TrackEndedCallback);

    fn grab_frame(&self) -> Option<VideoFrame> {
        None
    }
}

#[derive(Debug, Default, Clone)]
pub struct CapturedStream {
    pub tracks: Vec<Arc<dyn MediaTrack>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserMediaRequest {
    pub video: bool,
    pub audio: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostCaptureError {
    #[error("permission denied: {0}")]
    NotAllowed(String),
    #[error("device not found: {0}")]
    NotFound(String),
    #[error("request aborted: {0}")]
    Aborted(String),
    #[error("not supported: {0}")]
    Unsupported(String),
}

impl HostCaptureError {
    /// Message shown inline next to the retry action.
    pub fn user_message(&self, kind: ResourceKind) -> String {
        let subject = match kind {
            ResourceKind::Camera => "Camera",
            ResourceKind::Microphone => "Microphone",
            ResourceKind::ScreenShare => "Screen sharing",
            ResourceKind::Fullscreen => "Fullscreen",
        };
        match self {
            HostCaptureError::NotAllowed(_) => format!(
                "{subject} access was denied. Allow access in your browser settings and try again."
            ),
            HostCaptureError::NotFound(_) => {
                format!("{subject} was not found. Connect a device and try again.")
            }
            HostCaptureError::Aborted(_) => {
                format!("{subject} request was cancelled. Please try again.")
            }
            HostCaptureError::Unsupported(_) => {
                format!("{subject} is not supported by this browser.")
            }
        }
    }
}

#[async_trait]
pub trait HostMediaApi: Send + Sync {
    /// Combined camera and/or microphone capture; may suspend on a consent prompt.
    async fn capture_user_media(
        &self,
        request: UserMediaRequest,
    ) -> Result<CapturedStream, HostCaptureError>;

    async fn capture_display(&self) -> Result<CapturedStream, HostCaptureError>;

    async fn request_fullscreen(&self) -> Result<(), HostCaptureError>;

    fn exit_fullscreen(&self);
}

pub trait HostEnvironment: Send + Sync {
    /// Each call opens an independent subscription. Dropping the receiver unsubscribes.
    fn subscribe_signals(&self) -> mpsc::UnboundedReceiver<HostSignal>;

    fn capabilities(&self) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            battery: CapabilityReading::Unknown,
            connection: CapabilityReading::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("submission rejected with http {0}")]
    Rejected(u16),
    #[error("submission transport failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait ExamSubmitter: Send + Sync {
    async fn submit(&self, exam_id: &ExamId, auto: bool) -> Result<(), SubmitError>;
}

pub trait ProctorUiSink: Send + Sync {
    fn on_permissions_granted(&self, _bundle: &PermissionBundle) {}

    fn on_first_warning(&self, reason: &EscalationReason);

    fn on_escalate(&self, reason: &EscalationReason);
}
