#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use proctor_kernel_contracts::violation::{ViolationRecord, ViolationSeverity, ViolationType};
use proctor_kernel_contracts::UnixTimeMs;

/// JSON body accepted by the violation-ingestion endpoint.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationReportPayload {
    pub exam_id: String,
    #[serde(rename = "type")]
    pub violation_type: ViolationType,
    pub timestamp: UnixTimeMs,
    pub details: BTreeMap<String, String>,
    pub severity: ViolationSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
}

impl ViolationReportPayload {
    pub fn from_record(record: &ViolationRecord, snapshot_jpeg: Option<&[u8]>) -> Self {
        Self {
            exam_id: record.exam_id.as_str().to_string(),
            violation_type: record.violation_type,
            timestamp: record.timestamp,
            details: record.details.clone(),
            severity: record.severity,
            snapshot: snapshot_jpeg
                .filter(|b| !b.is_empty())
                .map(|b| format!("data:image/jpeg;base64,{}", STANDARD.encode(b))),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ReportDeliveryError {
    #[error("report endpoint returned http {0}")]
    HttpStatus(u16),
    #[error("report transport failed: {0}")]
    Transport(&'static str),
    #[error("report transport misconfigured: {0}")]
    InvalidConfig(&'static str),
}

/// One blocking delivery attempt. Callers decide where it runs.
pub trait ReportTransport: Send + Sync {
    fn post(&self, payload: &ViolationReportPayload) -> Result<(), ReportDeliveryError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportTransportConfig {
    pub endpoint: String,
    pub timeout_ms: u32,
    pub user_agent: String,
    pub bearer_token: Option<String>,
}

impl ReportTransportConfig {
    pub fn mvp_v1(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout_ms: 5_000,
            user_agent: "proctor-monitor/0.1".to_string(),
            bearer_token: None,
        }
    }
}

#[derive(Debug)]
pub struct HttpReportTransport {
    agent: ureq::Agent,
    config: ReportTransportConfig,
}

impl HttpReportTransport {
    pub fn new(config: ReportTransportConfig) -> Result<Self, ReportDeliveryError> {
        let endpoint = config.endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ReportDeliveryError::InvalidConfig(
                "endpoint must be an http(s) url",
            ));
        }
        if config.timeout_ms == 0 {
            return Err(ReportDeliveryError::InvalidConfig("timeout must be > 0"));
        }
        let timeout = Duration::from_millis(u64::from(config.timeout_ms).max(100));
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .user_agent(&config.user_agent)
            .build();
        Ok(Self { agent, config })
    }
}

impl ReportTransport for HttpReportTransport {
    fn post(&self, payload: &ViolationReportPayload) -> Result<(), ReportDeliveryError> {
        let mut request = self
            .agent
            .post(&self.config.endpoint)
            .set("Content-Type", "application/json")
            .set("Accept", "application/json");
        if let Some(token) = &self.config.bearer_token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        match request.send_json(payload) {
            Ok(response) if (200..300).contains(&response.status()) => Ok(()),
            Ok(response) => Err(ReportDeliveryError::HttpStatus(response.status())),
            Err(ureq::Error::Status(status, _)) => Err(ReportDeliveryError::HttpStatus(status)),
            Err(ureq::Error::Transport(transport)) => Err(ReportDeliveryError::Transport(
                classify_transport_error_kind(&format!("{:?} {}", transport.kind(), transport)),
            )),
        }
    }
}

fn classify_transport_error_kind(raw: &str) -> &'static str {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        "timeout"
    } else if lower.contains("tls") || lower.contains("ssl") {
        "tls"
    } else if lower.contains("dns") {
        "dns"
    } else if lower.contains("connection") || lower.contains("connect") {
        "connection"
    } else {
        "transport"
    }
}
