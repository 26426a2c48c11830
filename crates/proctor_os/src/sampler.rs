#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use proctor_engines::presence::PresenceEvaluator;
use proctor_kernel_contracts::presence::PresenceSample;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::acquirer::ResourceAcquirer;
use crate::clock::SessionClock;
use crate::face_model::FaceModelHandle;
use crate::lock_unpoisoned;

#[derive(Debug, Clone)]
pub struct SampledPresence {
    pub sample: PresenceSample,
    /// Frame the sample was taken from, kept for report snapshots.
    pub snapshot_jpeg: Arc<[u8]>,
}

/// Fixed-period detection loop over the current camera frame.
pub struct PresenceSampler {
    acquirer: Arc<ResourceAcquirer>,
    model: Arc<FaceModelHandle>,
    evaluator: PresenceEvaluator,
    clock: SessionClock,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for PresenceSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceSampler")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl PresenceSampler {
    pub fn new(
        acquirer: Arc<ResourceAcquirer>,
        model: Arc<FaceModelHandle>,
        evaluator: PresenceEvaluator,
        clock: SessionClock,
    ) -> Self {
        Self {
            acquirer,
            model,
            evaluator,
            clock,
            worker: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        lock_unpoisoned(&self.worker)
            .as_ref()
            .is_some_and(|w| !w.is_finished())
    }

    /// Starts a fresh loop, replacing any running one. The first tick fires
    /// immediately. Samples stop arriving once `stop_sampling` returns.
    pub fn start_sampling(&self, interval: Duration) -> mpsc::UnboundedReceiver<SampledPresence> {
        let (tx, rx) = mpsc::unbounded_channel();
        let acquirer = Arc::clone(&self.acquirer);
        let model = Arc::clone(&self.model);
        let evaluator = self.evaluator.clone();
        let clock = self.clock;
        let interval = interval.max(Duration::from_millis(1));

        let worker = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(frame) = acquirer.camera_frame() else {
                    tracing::debug!("no live camera frame; sampling tick skipped");
                    continue;
                };
                let detection = match model.detect(&frame).await {
                    Ok(detection) => detection,
                    Err(err) => {
                        tracing::warn!(error = %err, "detection pass failed; tick skipped");
                        continue;
                    }
                };
                let sample = match evaluator.evaluate(&detection, clock.now_mono()) {
                    Ok(sample) => sample,
                    Err(err) => {
                        tracing::warn!(error = %err, "detection output rejected; tick skipped");
                        continue;
                    }
                };
                let sampled = SampledPresence {
                    sample,
                    snapshot_jpeg: Arc::clone(&frame.jpeg),
                };
                if tx.send(sampled).is_err() {
                    break;
                }
            }
        });

        if let Some(previous) = lock_unpoisoned(&self.worker).replace(worker) {
            previous.abort();
        }
        rx
    }

    pub fn stop_sampling(&self) {
        if let Some(worker) = lock_unpoisoned(&self.worker).take() {
            worker.abort();
            tracing::debug!("presence sampling stopped");
        }
    }
}

impl Drop for PresenceSampler {
    fn drop(&mut self) {
        self.stop_sampling();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{detection_with_faces, FakeFaceModel, FakeHost};
    use proctor_engines::presence::PresenceEvaluatorConfig;
    use proctor_kernel_contracts::resource::ResourceKind;

    async fn sampler_with(model: Arc<FakeFaceModel>) -> (PresenceSampler, Arc<ResourceAcquirer>) {
        let host = FakeHost::granting_all();
        let acquirer = ResourceAcquirer::new(host);
        acquirer.acquire(ResourceKind::Camera).await;
        let sampler = PresenceSampler::new(
            Arc::clone(&acquirer),
            FaceModelHandle::new(model),
            PresenceEvaluator::new(PresenceEvaluatorConfig::mvp_v1()).unwrap(),
            SessionClock::with_wall_origin(0),
        );
        (sampler, acquirer)
    }

    #[tokio::test(start_paused = true)]
    async fn at_sampler_01_emits_one_sample_per_tick() {
        let model = FakeFaceModel::new();
        model.script([detection_with_faces(1), detection_with_faces(2)]);
        let (sampler, _acquirer) = sampler_with(model).await;
        let mut rx = sampler.start_sampling(Duration::from_millis(1_000));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.sample.face_count, 1);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.sample.face_count, 2);
        assert_eq!(
            second.sample.sampled_at.saturating_elapsed_ms(first.sample.sampled_at),
            1_000
        );
        assert!(sampler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn at_sampler_02_failed_detection_is_skipped() {
        let model = FakeFaceModel::new();
        model.script([detection_with_faces(0)]);
        model.fail_next_detect();
        let (sampler, _acquirer) = sampler_with(model.clone()).await;
        let mut rx = sampler.start_sampling(Duration::from_millis(1_000));

        let sample = rx.recv().await.unwrap();
        assert_eq!(sample.sample.face_count, 0);
        assert_eq!(model.detects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn at_sampler_03_stop_closes_the_stream() {
        let model = FakeFaceModel::new();
        let (sampler, _acquirer) = sampler_with(model).await;
        let mut rx = sampler.start_sampling(Duration::from_millis(1_000));
        rx.recv().await.unwrap();
        sampler.stop_sampling();
        assert!(rx.recv().await.is_none());
        assert!(!sampler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn at_sampler_04_no_camera_means_no_samples() {
        let model = FakeFaceModel::new();
        let (sampler, acquirer) = sampler_with(model.clone()).await;
        acquirer.release(ResourceKind::Camera);
        let mut rx = sampler.start_sampling(Duration::from_millis(1_000));
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(model.detects(), 0);
    }
}
