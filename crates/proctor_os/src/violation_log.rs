#![forbid(unsafe_code)]

use std::sync::{Arc, PoisonError, RwLock};

use proctor_kernel_contracts::violation::ViolationRecord;

/// Append-only session log. Records are immutable once appended, so
/// readers take cheap `Arc` clones and never block the writer for long.
#[derive(Debug, Default)]
pub struct ViolationLog {
    records: RwLock<Vec<Arc<ViolationRecord>>>,
}

impl ViolationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, record: ViolationRecord) -> Arc<ViolationRecord> {
        let record = Arc::new(record);
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&record));
        record
    }

    pub fn snapshot(&self) -> Vec<Arc<ViolationRecord>> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proctor_engines::classifier::violation_id;
    use proctor_kernel_contracts::violation::{
        ExamId, ViolationDetails, ViolationSeverity, ViolationType,
    };
    use proctor_kernel_contracts::UnixTimeMs;

    #[test]
    fn at_log_01_snapshot_is_stable_while_appending() {
        let log = ViolationLog::new();
        let exam = ExamId::new("exam_log").unwrap();
        let record = |seq: u64| {
            ViolationRecord::v1(
                violation_id(&exam, seq, UnixTimeMs(seq)).unwrap(),
                ViolationType::RightClick,
                ViolationSeverity::Low,
                UnixTimeMs(seq),
                ViolationDetails::new(),
                exam.clone(),
                false,
            )
            .unwrap()
        };
        log.append(record(1));
        let before = log.snapshot();
        log.append(record(2));
        assert_eq!(before.len(), 1);
        assert_eq!(log.len(), 2);
        assert_eq!(log.snapshot()[0].timestamp, UnixTimeMs(1));
    }
}
