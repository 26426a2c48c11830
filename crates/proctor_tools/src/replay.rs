#![forbid(unsafe_code)]

//! Offline replay of a recorded monitoring trace through the classifier and
//! escalation engine. Presence samples are given as detection summaries, so
//! no face model is needed.

use proctor_engines::classifier::{ClassifiedViolation, ClassifierConfig, ViolationClassifier};
use proctor_engines::escalation::{EscalationConfig, EscalationEngine};
use proctor_engines::presence::{IdentityVerdict, PresenceEvaluator, PresenceEvaluatorConfig};
use proctor_kernel_contracts::escalation::{EscalationDirective, EscalationState};
use proctor_kernel_contracts::presence::{GazeStatus, PresenceSample};
use proctor_kernel_contracts::resource::ResourceKind;
use proctor_kernel_contracts::violation::{ExamId, HostSignal, ViolationRecord};
use proctor_kernel_contracts::{MonotonicTimeNs, UnixTimeMs};

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct ReplayTrace {
    pub exam_id: String,
    #[serde(default)]
    pub start_wall_ms: u64,
    #[serde(default)]
    pub options: ReplayOptions,
    pub events: Vec<TraceEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct ReplayOptions {
    pub looking_away_escalates: bool,
    pub no_face_grace_ms: Option<u64>,
    pub host_debounce_ms: Option<u64>,
    pub identity_match_threshold: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct TraceEvent {
    /// Milliseconds since the session started.
    pub at_ms: u64,
    #[serde(flatten)]
    pub kind: TraceEventKind,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEventKind {
    HostSignal {
        signal: HostSignal,
    },
    ResourceRevoked {
        resource: String,
    },
    Presence {
        face_count: u8,
        #[serde(default)]
        gaze: Option<String>,
        /// Embedding distance to the reference identity, if one was set.
        #[serde(default)]
        identity_distance: Option<f32>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveEntry {
    pub at_ms: u64,
    pub action: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    pub records: Vec<ViolationRecord>,
    pub directives: Vec<DirectiveEntry>,
    pub final_state: EscalationState,
    pub counter: u32,
    /// Events after termination are not processed.
    pub ignored_events: usize,
}

impl ReplayReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        for r in &self.records {
            let details = r
                .details
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(",");
            out.push_str(&format!(
                "{} {} {} severity={} auto_submit={} {}\n",
                r.timestamp.0,
                r.id.as_str(),
                r.violation_type,
                r.severity.as_str(),
                r.auto_submit,
                details
            ));
        }
        for d in &self.directives {
            out.push_str(&format!("@{}ms {}: {}\n", d.at_ms, d.action, d.message));
        }
        out.push_str(&format!(
            "final_state={} counter={} ignored_events={}",
            self.final_state.as_str(),
            self.counter,
            self.ignored_events
        ));
        out
    }
}

pub fn parse_trace(json: &str) -> Result<ReplayTrace, String> {
    serde_json::from_str(json).map_err(|e| format!("invalid trace: {e}"))
}

pub fn replay(trace: &ReplayTrace) -> Result<ReplayReport, String> {
    let exam_id = ExamId::new(trace.exam_id.clone()).map_err(|e| format!("exam_id: {e}"))?;

    let mut classifier_config = ClassifierConfig::mvp_v1();
    classifier_config.looking_away_escalates = trace.options.looking_away_escalates;
    if let Some(ms) = trace.options.no_face_grace_ms {
        classifier_config.no_face_grace_ms = ms;
    }
    if let Some(ms) = trace.options.host_debounce_ms {
        classifier_config.host_debounce_ms = ms;
    }
    let mut evaluator_config = PresenceEvaluatorConfig::mvp_v1();
    if let Some(threshold) = trace.options.identity_match_threshold {
        evaluator_config.identity_match_threshold = threshold;
    }
    let evaluator = PresenceEvaluator::new(evaluator_config).map_err(|e| e.to_string())?;

    let mut classifier =
        ViolationClassifier::new(classifier_config, exam_id).map_err(|e| e.to_string())?;
    let mut escalation =
        EscalationEngine::new(EscalationConfig::mvp_v1()).map_err(|e| e.to_string())?;
    escalation.begin_monitoring();

    let mut events = trace.events.clone();
    events.sort_by_key(|e| e.at_ms);

    let mut records = Vec::new();
    let mut directives = Vec::new();
    let mut ignored_events = 0usize;

    for event in &events {
        if escalation.state().is_terminal() {
            ignored_events += 1;
            continue;
        }
        let now = MonotonicTimeNs::from_millis(event.at_ms);
        let wall = UnixTimeMs(trace.start_wall_ms.saturating_add(event.at_ms));
        let classified: Vec<ClassifiedViolation> = match &event.kind {
            TraceEventKind::HostSignal { signal } => classifier
                .on_host_signal(*signal, now, wall)
                .map_err(|e| e.to_string())?
                .into_iter()
                .collect(),
            TraceEventKind::ResourceRevoked { resource } => classifier
                .on_resource_revoked(parse_resource(resource)?, now, wall)
                .map_err(|e| e.to_string())?
                .into_iter()
                .collect(),
            TraceEventKind::Presence {
                face_count,
                gaze,
                identity_distance,
            } => {
                let gaze = if *face_count == 1 {
                    parse_gaze(gaze.as_deref())?
                } else {
                    GazeStatus::Unknown
                };
                let sample = PresenceSample::v1(now, *face_count, gaze, None)
                    .map_err(|e| e.to_string())?;
                let verdict = match identity_distance {
                    _ if *face_count != 1 => IdentityVerdict::NoDescriptor,
                    Some(d) => evaluator.verdict_for_distance(*d),
                    None => IdentityVerdict::NoReference,
                };
                classifier
                    .on_presence_sample(&sample, verdict, wall)
                    .map_err(|e| e.to_string())?
            }
        };

        for violation in classified {
            match escalation.apply(&violation) {
                EscalationDirective::None => {}
                EscalationDirective::FirstWarning(reason) => directives.push(DirectiveEntry {
                    at_ms: event.at_ms,
                    action: "first_warning",
                    message: reason.message,
                }),
                EscalationDirective::Terminate(reason) => directives.push(DirectiveEntry {
                    at_ms: event.at_ms,
                    action: "terminate",
                    message: reason.message,
                }),
            }
            tracing::debug!(
                violation_type = %violation.record.violation_type,
                qualifying = violation.qualifying,
                "replayed violation"
            );
            records.push(violation.record);
        }
    }

    Ok(ReplayReport {
        records,
        directives,
        final_state: escalation.state(),
        counter: escalation.counter().value(),
        ignored_events,
    })
}

fn parse_resource(raw: &str) -> Result<ResourceKind, String> {
    ResourceKind::ALL
        .into_iter()
        .find(|k| k.as_str() == raw)
        .ok_or_else(|| {
            let allowed: Vec<_> = ResourceKind::ALL.iter().map(|k| k.as_str()).collect();
            format!("unknown resource '{raw}'. allowed: {}", allowed.join(", "))
        })
}

fn parse_gaze(raw: Option<&str>) -> Result<GazeStatus, String> {
    match raw {
        None | Some("unknown") => Ok(GazeStatus::Unknown),
        Some("at_camera") => Ok(GazeStatus::AtCamera),
        Some("away") => Ok(GazeStatus::Away),
        Some(other) => Err(format!(
            "unknown gaze '{other}'. allowed: at_camera, away, unknown"
        )),
    }
}
