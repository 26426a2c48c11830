#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use proctor_kernel_contracts::presence::FaceDetection;

use crate::host::VideoFrame;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FaceModelError {
    #[error("face model failed to load: {0}")]
    Load(String),
    #[error("face model is not loaded")]
    NotReady,
    #[error("face detection failed: {0}")]
    Detection(String),
}

/// Opaque face detection/embedding capability supplied by the host.
#[async_trait]
pub trait FaceModel: Send + Sync {
    async fn load(&self) -> Result<(), FaceModelError>;

    async fn detect(&self, frame: &VideoFrame) -> Result<FaceDetection, FaceModelError>;

    fn unload(&self) {}
}

/// Shared, lazily loaded model with an explicit lifecycle. One handle is
/// shared by the sampler and identity verification.
pub struct FaceModelHandle {
    model: Arc<dyn FaceModel>,
    ready: AtomicBool,
    init_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for FaceModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaceModelHandle")
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl FaceModelHandle {
    pub fn new(model: Arc<dyn FaceModel>) -> Arc<Self> {
        Arc::new(Self {
            model,
            ready: AtomicBool::new(false),
            init_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Loads the model once. Concurrent callers wait for the first load;
    /// a failed load is retried on the next call.
    pub async fn ensure_ready(&self) -> Result<(), FaceModelError> {
        if self.is_ready() {
            return Ok(());
        }
        let _guard = self.init_lock.lock().await;
        if self.is_ready() {
            return Ok(());
        }
        self.model.load().await?;
        self.ready.store(true, Ordering::Release);
        tracing::info!("face model loaded");
        Ok(())
    }

    pub async fn detect(&self, frame: &VideoFrame) -> Result<FaceDetection, FaceModelError> {
        self.ensure_ready().await?;
        self.model.detect(frame).await
    }

    pub async fn teardown(&self) {
        let _guard = self.init_lock.lock().await;
        if self.ready.swap(false, Ordering::AcqRel) {
            self.model.unload();
            tracing::debug!("face model unloaded");
        }
    }
}
