#![forbid(unsafe_code)]

use proctor_kernel_contracts::capability::{
    BatteryStatus, CapabilityReading, ConnectionQuality, EnvironmentSnapshot,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentConfig {
    pub min_battery_level: f32,
}

impl EnvironmentConfig {
    pub fn mvp_v1() -> Self {
        Self {
            min_battery_level: 0.15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentAssessment {
    Healthy,
    Degraded { reasons: Vec<&'static str> },
    /// At least one capability is unknown and nothing measured is wrong.
    Unmeasurable,
}

pub fn assess_environment(
    config: &EnvironmentConfig,
    snapshot: &EnvironmentSnapshot,
) -> EnvironmentAssessment {
    let mut reasons = Vec::new();
    if let CapabilityReading::Known(BatteryStatus { level, charging }) = snapshot.battery {
        if !charging && level < config.min_battery_level {
            reasons.push("battery_low");
        }
    }
    if let CapabilityReading::Known(quality) = snapshot.connection {
        match quality {
            ConnectionQuality::Offline => reasons.push("connection_offline"),
            ConnectionQuality::Slow2g | ConnectionQuality::Cellular2g => {
                reasons.push("connection_slow")
            }
            ConnectionQuality::Cellular3g | ConnectionQuality::Cellular4g => {}
        }
    }
    if !reasons.is_empty() {
        return EnvironmentAssessment::Degraded { reasons };
    }
    if snapshot.battery.is_known() && snapshot.connection.is_known() {
        EnvironmentAssessment::Healthy
    } else {
        EnvironmentAssessment::Unmeasurable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(
        battery: CapabilityReading<BatteryStatus>,
        connection: CapabilityReading<ConnectionQuality>,
    ) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            battery,
            connection,
        }
    }

    #[test]
    fn at_env_01_unknown_capabilities_are_unmeasurable_not_healthy() {
        let cfg = EnvironmentConfig::mvp_v1();
        assert_eq!(
            assess_environment(
                &cfg,
                &snapshot(CapabilityReading::Unknown, CapabilityReading::Unknown)
            ),
            EnvironmentAssessment::Unmeasurable
        );
        assert_eq!(
            assess_environment(
                &cfg,
                &snapshot(
                    CapabilityReading::Known(BatteryStatus {
                        level: 0.9,
                        charging: false
                    }),
                    CapabilityReading::Unknown
                )
            ),
            EnvironmentAssessment::Unmeasurable
        );
    }

    #[test]
    fn at_env_02_low_battery_and_slow_link_degrade() {
        let cfg = EnvironmentConfig::mvp_v1();
        let out = assess_environment(
            &cfg,
            &snapshot(
                CapabilityReading::Known(BatteryStatus {
                    level: 0.05,
                    charging: false,
                }),
                CapabilityReading::Known(ConnectionQuality::Slow2g),
            ),
        );
        assert_eq!(
            out,
            EnvironmentAssessment::Degraded {
                reasons: vec!["battery_low", "connection_slow"]
            }
        );
    }

    #[test]
    fn at_env_03_charging_battery_is_healthy() {
        let cfg = EnvironmentConfig::mvp_v1();
        let out = assess_environment(
            &cfg,
            &snapshot(
                CapabilityReading::Known(BatteryStatus {
                    level: 0.05,
                    charging: true,
                }),
                CapabilityReading::Known(ConnectionQuality::Cellular4g),
            ),
        );
        assert_eq!(out, EnvironmentAssessment::Healthy);
    }
}
