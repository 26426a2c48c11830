#![forbid(unsafe_code)]

use std::sync::Arc;

use proctor_engines::reporter::{ReportTransport, ViolationReportPayload};
use proctor_kernel_contracts::violation::ViolationRecord;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Fire-and-forget dispatch of violation reports. Delivery runs on the
/// blocking pool; failures are logged and dropped, never retried.
#[derive(Clone)]
pub struct ViolationReporter {
    transport: Arc<dyn ReportTransport>,
}

impl std::fmt::Debug for ViolationReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViolationReporter").finish_non_exhaustive()
    }
}

impl ViolationReporter {
    pub fn new(transport: Arc<dyn ReportTransport>) -> Self {
        Self { transport }
    }

    /// Returns the delivery task for callers that want to observe it; the
    /// session never awaits it. `None` outside a tokio runtime.
    pub fn report(
        &self,
        record: &ViolationRecord,
        snapshot_jpeg: Option<&[u8]>,
    ) -> Option<JoinHandle<()>> {
        let payload = ViolationReportPayload::from_record(record, snapshot_jpeg);
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(
                violation_id = record.id.as_str(),
                "no async runtime; violation report dropped"
            );
            return None;
        };
        let transport = Arc::clone(&self.transport);
        let violation_id = record.id.as_str().to_string();
        Some(runtime.spawn(async move {
            let delivery = tokio::task::spawn_blocking(move || transport.post(&payload)).await;
            match delivery {
                Ok(Ok(())) => {
                    tracing::debug!(violation_id = %violation_id, "violation report delivered")
                }
                Ok(Err(err)) => {
                    tracing::warn!(violation_id = %violation_id, error = %err, "violation report dropped")
                }
                Err(err) => {
                    tracing::warn!(violation_id = %violation_id, error = %err, "violation report task failed")
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{record, RecordingTransport};
    use proctor_engines::reporter::ReportDeliveryError;
    use proctor_kernel_contracts::violation::ViolationType;

    #[tokio::test]
    async fn at_reporter_01_payload_matches_record() {
        let transport = RecordingTransport::new();
        let reporter = ViolationReporter::new(transport.clone());
        let record = record(ViolationType::MultipleFaces, 1);
        reporter
            .report(&record, Some(&[1, 2, 3]))
            .unwrap()
            .await
            .unwrap();
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].exam_id, record.exam_id.as_str());
        assert_eq!(sent[0].violation_type, record.violation_type);
        assert_eq!(sent[0].timestamp, record.timestamp);
        assert_eq!(sent[0].severity, record.severity);
        assert!(sent[0].snapshot.is_some());
    }

    #[tokio::test]
    async fn at_reporter_02_delivery_failure_is_contained() {
        let transport = RecordingTransport::failing(ReportDeliveryError::HttpStatus(503));
        let reporter = ViolationReporter::new(transport.clone());
        reporter
            .report(&record(ViolationType::TabSwitch, 1), None)
            .unwrap()
            .await
            .unwrap();
        assert_eq!(transport.attempts(), 1);
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn at_reporter_03_no_runtime_drops_without_panicking() {
        let transport = RecordingTransport::new();
        let reporter = ViolationReporter::new(transport.clone());
        assert!(reporter.report(&record(ViolationType::TabSwitch, 1), None).is_none());
        assert_eq!(transport.attempts(), 0);
    }
}
