#![forbid(unsafe_code)]

/// Reading from an optional host capability. `Unknown` means the capability
/// is absent or unmeasurable, which is distinct from a measured good value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CapabilityReading<T> {
    Known(T),
    Unknown,
}

impl<T> CapabilityReading<T> {
    pub fn is_known(&self) -> bool {
        matches!(self, CapabilityReading::Known(_))
    }

    pub fn known(self) -> Option<T> {
        match self {
            CapabilityReading::Known(v) => Some(v),
            CapabilityReading::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryStatus {
    /// 0.0..=1.0
    pub level: f32,
    pub charging: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionQuality {
    Slow2g,
    Cellular2g,
    Cellular3g,
    Cellular4g,
    Offline,
}

impl ConnectionQuality {
    pub fn parse(effective_type: &str) -> Option<Self> {
        match effective_type.trim().to_ascii_lowercase().as_str() {
            "slow-2g" => Some(ConnectionQuality::Slow2g),
            "2g" => Some(ConnectionQuality::Cellular2g),
            "3g" => Some(ConnectionQuality::Cellular3g),
            "4g" => Some(ConnectionQuality::Cellular4g),
            "offline" => Some(ConnectionQuality::Offline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentSnapshot {
    pub battery: CapabilityReading<BatteryStatus>,
    pub connection: CapabilityReading<ConnectionQuality>,
}
