#![forbid(unsafe_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use proctor_kernel_contracts::{MonotonicTimeNs, UnixTimeMs};
use tokio::time::Instant;

/// Session-relative monotonic time plus a wall-clock anchor for record timestamps.
///
/// Monotonic readings come from tokio's clock so paused-time tests drive them.
/// Wall time is derived from the anchor rather than re-read, keeping the two
/// consistent across system clock adjustments.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    origin: Instant,
    origin_wall_ms: u64,
}

impl SessionClock {
    pub fn start() -> Self {
        let origin_wall_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self::with_wall_origin(origin_wall_ms)
    }

    pub fn with_wall_origin(origin_wall_ms: u64) -> Self {
        Self {
            origin: Instant::now(),
            origin_wall_ms,
        }
    }

    pub fn now_mono(&self) -> MonotonicTimeNs {
        let elapsed = self.origin.elapsed().as_nanos();
        MonotonicTimeNs(u64::try_from(elapsed).unwrap_or(u64::MAX))
    }

    pub fn now_wall(&self) -> UnixTimeMs {
        let elapsed_ms = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        UnixTimeMs(self.origin_wall_ms.saturating_add(elapsed_ms))
    }
}
