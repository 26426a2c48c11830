#![forbid(unsafe_code)]

use crate::{ContractViolation, SchemaVersion, Validate};

pub const RESOURCE_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

const MAX_ERROR_MESSAGE_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Camera,
    Microphone,
    ScreenShare,
    Fullscreen,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Camera,
        ResourceKind::Microphone,
        ResourceKind::ScreenShare,
        ResourceKind::Fullscreen,
    ];

    /// Resources that must be granted for the bundle to count as complete.
    pub const REQUIRED_FOR_BUNDLE: [ResourceKind; 3] = [
        ResourceKind::Camera,
        ResourceKind::Microphone,
        ResourceKind::ScreenShare,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Camera => "camera",
            ResourceKind::Microphone => "microphone",
            ResourceKind::ScreenShare => "screen_share",
            ResourceKind::Fullscreen => "fullscreen",
        }
    }

    /// Whether the underlying host resource exposes media tracks with a liveness signal.
    pub fn has_tracks(self) -> bool {
        !matches!(self, ResourceKind::Fullscreen)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Prompt,
    Requesting,
    Granted,
    Denied,
}

impl ResourceState {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceState::Prompt => "prompt",
            ResourceState::Requesting => "requesting",
            ResourceState::Granted => "granted",
            ResourceState::Denied => "denied",
        }
    }
}

/// Read-only view of one revocable host resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    pub schema_version: SchemaVersion,
    pub kind: ResourceKind,
    pub state: ResourceState,
    pub error_message: Option<String>,
    pub track_live: bool,
}

impl ResourceHandle {
    pub fn prompt(kind: ResourceKind) -> Self {
        Self {
            schema_version: RESOURCE_CONTRACT_VERSION,
            kind,
            state: ResourceState::Prompt,
            error_message: None,
            track_live: false,
        }
    }

    pub fn v1(
        kind: ResourceKind,
        state: ResourceState,
        error_message: Option<String>,
        track_live: bool,
    ) -> Result<Self, ContractViolation> {
        let h = Self {
            schema_version: RESOURCE_CONTRACT_VERSION,
            kind,
            state,
            error_message,
            track_live,
        };
        h.validate()?;
        Ok(h)
    }

    pub fn is_granted(&self) -> bool {
        self.state == ResourceState::Granted
    }
}

impl Validate for ResourceHandle {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != RESOURCE_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "resource_handle.schema_version",
                reason: "must match RESOURCE_CONTRACT_VERSION",
            });
        }
        if self.track_live && self.state != ResourceState::Granted {
            return Err(ContractViolation::InvalidValue {
                field: "resource_handle.track_live",
                reason: "only a granted handle can have a live track",
            });
        }
        match (&self.error_message, self.state) {
            (Some(_), ResourceState::Granted | ResourceState::Requesting) => {
                return Err(ContractViolation::InvalidValue {
                    field: "resource_handle.error_message",
                    reason: "must be absent while granted or requesting",
                });
            }
            (None, ResourceState::Denied) => {
                return Err(ContractViolation::InvalidValue {
                    field: "resource_handle.error_message",
                    reason: "must be present when denied",
                });
            }
            _ => {}
        }
        if let Some(msg) = &self.error_message {
            crate::common::validate_token_text(
                "resource_handle.error_message",
                msg,
                MAX_ERROR_MESSAGE_LEN,
            )?;
        }
        Ok(())
    }
}

/// Aggregate view over the four resource handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionBundle {
    pub camera: ResourceHandle,
    pub microphone: ResourceHandle,
    pub screen_share: ResourceHandle,
    pub fullscreen: ResourceHandle,
    pub all_granted: bool,
}

impl PermissionBundle {
    pub fn initial() -> Self {
        Self::from_handles(
            ResourceHandle::prompt(ResourceKind::Camera),
            ResourceHandle::prompt(ResourceKind::Microphone),
            ResourceHandle::prompt(ResourceKind::ScreenShare),
            ResourceHandle::prompt(ResourceKind::Fullscreen),
        )
    }

    /// `all_granted` is always derived, never supplied by the caller.
    pub fn from_handles(
        camera: ResourceHandle,
        microphone: ResourceHandle,
        screen_share: ResourceHandle,
        fullscreen: ResourceHandle,
    ) -> Self {
        let all_granted = camera.is_granted() && microphone.is_granted() && screen_share.is_granted();
        Self {
            camera,
            microphone,
            screen_share,
            fullscreen,
            all_granted,
        }
    }

    pub fn handle(&self, kind: ResourceKind) -> &ResourceHandle {
        match kind {
            ResourceKind::Camera => &self.camera,
            ResourceKind::Microphone => &self.microphone,
            ResourceKind::ScreenShare => &self.screen_share,
            ResourceKind::Fullscreen => &self.fullscreen,
        }
    }

    pub fn error_for(&self, kind: ResourceKind) -> Option<&str> {
        self.handle(kind).error_message.as_deref()
    }

    pub fn missing(&self, required: &[ResourceKind]) -> Vec<ResourceKind> {
        required
            .iter()
            .copied()
            .filter(|k| !self.handle(*k).is_granted())
            .collect()
    }
}

impl Validate for PermissionBundle {
    fn validate(&self) -> Result<(), ContractViolation> {
        for kind in ResourceKind::ALL {
            let h = self.handle(kind);
            if h.kind != kind {
                return Err(ContractViolation::InvalidValue {
                    field: "permission_bundle.handle.kind",
                    reason: "handle stored under the wrong resource slot",
                });
            }
            h.validate()?;
        }
        let expected = ResourceKind::REQUIRED_FOR_BUNDLE
            .iter()
            .all(|k| self.handle(*k).is_granted());
        if self.all_granted != expected {
            return Err(ContractViolation::InvalidValue {
                field: "permission_bundle.all_granted",
                reason: "must equal camera && microphone && screen_share granted",
            });
        }
        Ok(())
    }
}
