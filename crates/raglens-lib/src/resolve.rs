//! Field resolution over schema-variant event records
//!
//! Pipeline producers disagree on naming: the same concept shows up as
//! `step_id`, `stepId`, or a nested `step.id` depending on the producer
//! version. Every semantic field is therefore resolved through an ordered
//! candidate list, and a miss degrades to a default instead of failing.

use crate::event::TraceEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sentinel step id used when no candidate resolves.
pub const FALLBACK_STEP_ID: &str = "step";
/// Sentinel action class used when no candidate resolves.
pub const FALLBACK_ACTION_CLASS: &str = "unknown";

pub const STEP_ID_KEYS: [&str; 5] = ["step_id", "stepId", "step.id", "step.name", "id"];
pub const ACTION_CLASS_KEYS: [&str; 8] = [
    "action_class",
    "actionClass",
    "action.class",
    "action.type",
    "action.name",
    "action",
    "class",
    "type",
];
pub const END_TIME_KEYS: [&str; 10] = [
    "ts",
    "timestamp",
    "ts_utc",
    "end_ts",
    "endTs",
    "end_time",
    "endTime",
    "time",
    "created_at",
    "createdAt",
];
pub const START_TIME_KEYS: [&str; 8] = [
    "start_ts",
    "startTs",
    "start_time",
    "startTime",
    "begin_ts",
    "beginTs",
    "started_at",
    "startedAt",
];
pub const DURATION_KEYS: [&str; 7] = [
    "duration_ms",
    "durationMs",
    "duration",
    "took_ms",
    "tookMs",
    "latency_ms",
    "latencyMs",
];
pub const NEXT_STEP_KEYS: [&str; 6] = [
    "next_step_id",
    "nextStepId",
    "next_step",
    "nextStep",
    "next_id",
    "next",
];
pub const LEVEL_KEYS: [&str; 4] = ["level", "log_level", "logLevel", "severity"];
pub const MESSAGE_KEYS: [&str; 6] = ["message", "msg", "note", "text", "detail", "description"];
pub const ERROR_VALUE_KEYS: [&str; 3] = ["error", "exception", "err"];
pub const EXCEPTION_MESSAGE_KEYS: [&str; 6] = [
    "exception_message",
    "exceptionMessage",
    "error_message",
    "errorMessage",
    "error.message",
    "exception.message",
];
pub const SUCCESS_KEYS: [&str; 3] = ["success", "ok", "succeeded"];
pub const STATE_BEFORE_KEYS: [&str; 6] = [
    "state_before",
    "stateBefore",
    "before_state",
    "beforeState",
    "input_state",
    "before",
];
// A plain `state` field is accepted as a synonym for the after-snapshot.
pub const STATE_AFTER_KEYS: [&str; 7] = [
    "state_after",
    "stateAfter",
    "after_state",
    "afterState",
    "output_state",
    "after",
    "state",
];
pub const EVENT_TYPE_KEYS: [&str; 4] = ["event_type", "eventType", "type", "kind"];
pub const CONSUMER_STEP_KEYS: [&str; 4] = [
    "consumer_step_id",
    "consumerStepId",
    "consumer_step",
    "consumerStep",
];

/// Derived identity of one event: who ran, what kind of work, and whether
/// it failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepIdentity {
    pub step_id: String,
    pub action_class: String,
    pub is_error: bool,
}

/// Probe a single candidate path. Dotted paths descend through nested
/// objects (`"step.id"` reads `event["step"]["id"]`).
pub fn lookup_path<'a>(event: &'a TraceEvent, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = event.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Return the first candidate that resolves to a non-null value.
pub fn lookup<'a>(event: &'a TraceEvent, candidates: &[&str]) -> Option<&'a Value> {
    candidates
        .iter()
        .find_map(|path| lookup_path(event, path).filter(|v| !v.is_null()))
}

/// Return the first candidate that resolves to a non-empty string. Numbers
/// and booleans are stringified so producers that log `"id": 7` still
/// resolve.
pub fn first_string(event: &TraceEvent, candidates: &[&str]) -> Option<String> {
    for path in candidates {
        match lookup_path(event, path) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.trim().to_string()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            Some(Value::Bool(b)) => return Some(b.to_string()),
            _ => continue,
        }
    }
    None
}

/// Return the first candidate that resolves to a finite number. Numeric
/// strings count.
pub fn first_number(event: &TraceEvent, candidates: &[&str]) -> Option<f64> {
    for path in candidates {
        match lookup_path(event, path) {
            Some(Value::Number(n)) => {
                if let Some(v) = n.as_f64().filter(|v| v.is_finite()) {
                    return Some(v);
                }
            }
            Some(Value::String(s)) => {
                if let Ok(v) = s.trim().parse::<f64>() {
                    if v.is_finite() {
                        return Some(v);
                    }
                }
            }
            _ => continue,
        }
    }
    None
}

/// Step id as written by the producer, without the sentinel default.
pub fn resolved_step_id(event: &TraceEvent) -> Option<String> {
    first_string(event, &STEP_ID_KEYS)
}

/// Action class as written by the producer, without the sentinel default.
pub fn resolved_action_class(event: &TraceEvent) -> Option<String> {
    first_string(event, &ACTION_CLASS_KEYS)
}

/// Resolve the identity view of an event, falling back to sentinels.
pub fn step_identity(event: &TraceEvent) -> StepIdentity {
    StepIdentity {
        step_id: resolved_step_id(event).unwrap_or_else(|| FALLBACK_STEP_ID.to_string()),
        action_class: resolved_action_class(event)
            .unwrap_or_else(|| FALLBACK_ACTION_CLASS.to_string()),
        is_error: is_error_event(event),
    }
}

/// Explicit duration in milliseconds, when the producer logged one.
pub fn duration_ms(event: &TraceEvent) -> Option<f64> {
    first_number(event, &DURATION_KEYS).filter(|v| *v >= 0.0)
}

pub fn next_step_id(event: &TraceEvent) -> Option<String> {
    first_string(event, &NEXT_STEP_KEYS)
}

pub fn level(event: &TraceEvent) -> Option<String> {
    first_string(event, &LEVEL_KEYS)
}

pub fn message(event: &TraceEvent) -> Option<String> {
    first_string(event, &MESSAGE_KEYS)
}

pub fn event_type(event: &TraceEvent) -> Option<String> {
    first_string(event, &EVENT_TYPE_KEYS)
}

pub fn consumer_step_id(event: &TraceEvent) -> Option<String> {
    first_string(event, &CONSUMER_STEP_KEYS)
}

/// Pipeline state before the step ran, when the producer captured it.
pub fn state_before(event: &TraceEvent) -> Option<&Value> {
    lookup(event, &STATE_BEFORE_KEYS).filter(|v| v.is_object())
}

/// Pipeline state after the step ran. `state` alone means "after".
pub fn state_after(event: &TraceEvent) -> Option<&Value> {
    lookup(event, &STATE_AFTER_KEYS).filter(|v| v.is_object())
}

/// An event counts as an error when any of these hold: the level says
/// ERROR, an error/exception field is non-null, an explicit success flag is
/// false, or an exception message is present.
pub fn is_error_event(event: &TraceEvent) -> bool {
    if let Some(level) = first_string(event, &LEVEL_KEYS) {
        if level.eq_ignore_ascii_case("error") {
            return true;
        }
    }
    if lookup(event, &ERROR_VALUE_KEYS).is_some() {
        return true;
    }
    if matches!(lookup(event, &SUCCESS_KEYS), Some(Value::Bool(false))) {
        return true;
    }
    first_string(event, &EXCEPTION_MESSAGE_KEYS).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: Value) -> TraceEvent {
        value.as_object().expect("test event must be an object").clone()
    }

    #[test]
    fn step_id_resolves_across_naming_conventions() {
        for raw in [
            json!({"step_id": "fetch"}),
            json!({"stepId": "fetch"}),
            json!({"step": {"id": "fetch"}}),
        ] {
            assert_eq!(resolved_step_id(&event(raw)).as_deref(), Some("fetch"));
        }
    }

    #[test]
    fn numeric_step_id_is_stringified() {
        assert_eq!(resolved_step_id(&event(json!({"id": 7}))).as_deref(), Some("7"));
    }

    #[test]
    fn missing_identity_falls_back_to_sentinels() {
        let identity = step_identity(&event(json!({"payload": {}})));
        assert_eq!(identity.step_id, FALLBACK_STEP_ID);
        assert_eq!(identity.action_class, FALLBACK_ACTION_CLASS);
        assert!(!identity.is_error);
    }

    #[test]
    fn candidate_order_wins_over_later_keys() {
        let e = event(json!({"action_class": "Retrieval", "type": "GENERIC"}));
        assert_eq!(resolved_action_class(&e).as_deref(), Some("Retrieval"));
    }

    #[test]
    fn error_detection_covers_all_signals() {
        assert!(is_error_event(&event(json!({"level": "error"}))));
        assert!(is_error_event(&event(json!({"level": "ERROR"}))));
        assert!(is_error_event(&event(json!({"exception": {"kind": "Timeout"}}))));
        assert!(is_error_event(&event(json!({"success": false}))));
        assert!(is_error_event(&event(json!({"error_message": "boom"}))));
        assert!(!is_error_event(&event(json!({"level": "INFO", "success": true}))));
        assert!(!is_error_event(&event(json!({"error": null}))));
    }

    #[test]
    fn plain_state_is_an_after_snapshot() {
        let e = event(json!({"state": {"docs": 3}}));
        assert!(state_after(&e).is_some());
        assert!(state_before(&e).is_none());
    }

    #[test]
    fn non_object_state_is_ignored() {
        let e = event(json!({"state": "not an object"}));
        assert!(state_after(&e).is_none());
    }
}
