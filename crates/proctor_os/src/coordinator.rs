#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use proctor_kernel_contracts::resource::{PermissionBundle, ResourceKind};

use crate::acquirer::{AcquireOutcome, ResourceAcquirer};
use crate::host::ProctorUiSink;

/// Drives the grouped permission prompt. Callers observe the returned
/// bundle; no acquisition failure escapes as an error.
pub struct PermissionCoordinator {
    acquirer: Arc<ResourceAcquirer>,
    ui: Arc<dyn ProctorUiSink>,
    in_flight: AtomicBool,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for PermissionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionCoordinator")
            .field("in_flight", &self.in_flight.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl PermissionCoordinator {
    pub fn new(acquirer: Arc<ResourceAcquirer>, ui: Arc<dyn ProctorUiSink>) -> Self {
        Self {
            acquirer,
            ui,
            in_flight: AtomicBool::new(false),
        }
    }

    pub async fn grant_all(&self) -> PermissionBundle {
        let current = self.acquirer.bundle();
        if current.all_granted {
            return current;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("grant_all already in flight");
            return current;
        }
        let _guard = InFlightGuard(&self.in_flight);

        self.acquirer.clear_errors(&ResourceKind::REQUIRED_FOR_BUNDLE);
        let ((camera, microphone), screen) = tokio::join!(
            self.acquirer.acquire_camera_and_microphone(),
            self.acquirer.acquire(ResourceKind::ScreenShare),
        );

        let bundle = self.acquirer.bundle();
        if bundle.all_granted {
            tracing::info!("all required permissions granted");
            self.ui.on_permissions_granted(&bundle);
        } else {
            for outcome in [&camera, &microphone, &screen] {
                if let AcquireOutcome::Denied(handle) = outcome {
                    tracing::warn!(
                        resource = %handle.kind,
                        error = handle.error_message.as_deref().unwrap_or(""),
                        "permission not granted"
                    );
                }
            }
        }
        bundle
    }

    /// Fullscreen is requested separately; a refusal is recorded, not fatal.
    pub async fn enter_fullscreen(&self) -> PermissionBundle {
        if let AcquireOutcome::Denied(handle) = self.acquirer.acquire(ResourceKind::Fullscreen).await
        {
            tracing::warn!(
                error = handle.error_message.as_deref().unwrap_or(""),
                "fullscreen not entered"
            );
        }
        self.acquirer.bundle()
    }
}
