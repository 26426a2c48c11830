#![forbid(unsafe_code)]

use std::env;

use proctor_engines::classifier::ClassifierConfig;
use proctor_engines::environment::EnvironmentConfig;
use proctor_engines::escalation::EscalationConfig;
use proctor_engines::presence::PresenceEvaluatorConfig;
use proctor_engines::reporter::ReportTransportConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProctorConfig {
    pub sampling_interval_ms: u64,
    /// Presence sampling waits for fullscreen as well as the camera.
    pub require_fullscreen_for_monitoring: bool,
    pub evaluator: PresenceEvaluatorConfig,
    pub classifier: ClassifierConfig,
    pub escalation: EscalationConfig,
    pub environment: EnvironmentConfig,
}

impl ProctorConfig {
    pub fn mvp_v1() -> Self {
        Self {
            sampling_interval_ms: 1_000,
            require_fullscreen_for_monitoring: true,
            evaluator: PresenceEvaluatorConfig::mvp_v1(),
            classifier: ClassifierConfig::mvp_v1(),
            escalation: EscalationConfig::mvp_v1(),
            environment: EnvironmentConfig::mvp_v1(),
        }
    }

    pub fn from_env() -> Self {
        Self::from_env_with(|key| env::var(key).ok())
    }

    /// Malformed or out-of-range values keep the baseline.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut c = Self::mvp_v1();
        c.sampling_interval_ms = parse_u64(&lookup, "PROCTOR_SAMPLING_INTERVAL_MS", 100..=60_000)
            .unwrap_or(c.sampling_interval_ms);
        c.require_fullscreen_for_monitoring = parse_flag(&lookup, "PROCTOR_REQUIRE_FULLSCREEN")
            .unwrap_or(c.require_fullscreen_for_monitoring);
        c.classifier.looking_away_escalates =
            parse_flag(&lookup, "PROCTOR_LOOKING_AWAY_ESCALATES")
                .unwrap_or(c.classifier.looking_away_escalates);
        c.classifier.no_face_grace_ms =
            parse_u64(&lookup, "PROCTOR_NO_FACE_GRACE_MS", 1_000..=300_000)
                .unwrap_or(c.classifier.no_face_grace_ms);
        c.classifier.host_debounce_ms = parse_u64(&lookup, "PROCTOR_HOST_DEBOUNCE_MS", 0..=60_000)
            .unwrap_or(c.classifier.host_debounce_ms);
        c.evaluator.identity_match_threshold = lookup("PROCTOR_IDENTITY_THRESHOLD")
            .and_then(|v| v.trim().parse::<f32>().ok())
            .filter(|v| v.is_finite() && *v > 0.0 && *v <= 2.0)
            .unwrap_or(c.evaluator.identity_match_threshold);
        c
    }
}

/// `None` when no report endpoint is configured.
pub fn report_transport_config_from_env() -> Option<ReportTransportConfig> {
    report_transport_config_with(|key| env::var(key).ok())
}

pub fn report_transport_config_with(
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<ReportTransportConfig> {
    let endpoint = lookup("PROCTOR_REPORT_ENDPOINT").and_then(optional_string)?;
    let mut config = ReportTransportConfig::mvp_v1(endpoint);
    config.bearer_token = lookup("PROCTOR_REPORT_BEARER").and_then(optional_string);
    config.timeout_ms = lookup("PROCTOR_REPORT_TIMEOUT_MS")
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|v| (100..=60_000).contains(v))
        .unwrap_or(config.timeout_ms);
    Some(config)
}

fn parse_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    range: std::ops::RangeInclusive<u64>,
) -> Option<u64> {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| range.contains(v))
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    match lookup(key)?.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

fn optional_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
