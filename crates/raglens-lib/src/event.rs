//! Trace event parsing
//!
//! Turns raw trace text into an ordered sequence of loosely-typed event
//! records. Three layouts are accepted interchangeably: a JSON object
//! wrapping an event array, a bare JSON array, and line-delimited JSON.
//! Producers evolve independently of this tool, so parsing is tolerant:
//! malformed lines are dropped, never fatal.

use crate::error::{Result, TraceError};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

/// One pipeline step execution as logged by a producer. No fixed schema;
/// field resolution happens in [`crate::resolve`].
pub type TraceEvent = serde_json::Map<String, Value>;

/// Wrapper fields probed, in priority order, when the document parses as a
/// JSON object.
pub const TRACE_ARRAY_FIELDS: [&str; 3] = ["pipeline_trace_events", "trace_events", "events"];

/// Parse a trace document into an ordered event sequence.
///
/// An empty result means "no trace data", not an error; callers that need a
/// hard failure map it to [`TraceError::NoEvents`].
pub fn parse_trace(text: &str) -> Vec<TraceEvent> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => {
            for field in TRACE_ARRAY_FIELDS {
                if let Some(Value::Array(items)) = map.get(field) {
                    return collect_objects(items);
                }
            }
            debug!("document is a JSON object without a recognized event array field");
            Vec::new()
        }
        Ok(Value::Array(items)) => collect_objects(&items),
        Ok(_) => Vec::new(),
        Err(_) => parse_line_delimited(trimmed),
    }
}

/// Read and parse a trace file.
///
/// A missing file is a distinct user-facing condition and maps to
/// [`TraceError::FileNotFound`] rather than a bare I/O error.
pub fn parse_trace_file(path: &Path) -> Result<Vec<TraceEvent>> {
    if !path.exists() {
        return Err(TraceError::file_not_found(path));
    }
    let text = std::fs::read_to_string(path)?;
    Ok(parse_trace(&text))
}

fn collect_objects(items: &[Value]) -> Vec<TraceEvent> {
    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(map.clone()),
            _ => None,
        })
        .collect()
}

/// Line-delimited fallback: one event per non-blank line, lines that fail
/// to parse or do not yield an object are silently skipped.
fn parse_line_delimited(text: &str) -> Vec<TraceEvent> {
    let mut events = Vec::new();
    let mut skipped = 0usize;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => events.push(map),
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(skipped, kept = events.len(), "dropped unparseable lines");
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wrapped_event_array() {
        let text = r#"{"pipeline_trace_events": [{"step_id": "a"}, {"step_id": "b"}]}"#;
        let events = parse_trace(text);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].get("step_id"), Some(&Value::from("a")));
    }

    #[test]
    fn wrapper_fields_probe_in_priority_order() {
        let text = r#"{"events": [{"n": 1}], "trace_events": [{"n": 2}, {"n": 3}]}"#;
        let events = parse_trace(text);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].get("n"), Some(&Value::from(2)));
    }

    #[test]
    fn bare_array_keeps_document_order() {
        let text = r#"[{"n": 1}, {"n": 2}, {"n": 3}]"#;
        let events = parse_trace(text);
        let order: Vec<i64> = events
            .iter()
            .filter_map(|e| e.get("n").and_then(Value::as_i64))
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn malformed_line_does_not_poison_later_lines() {
        let text = "{\"n\": 1}\nnot json at all\n{\"n\": 2}";
        let events = parse_trace(text);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].get("n"), Some(&Value::from(2)));
    }

    #[test]
    fn blank_lines_and_non_objects_are_skipped() {
        let text = "{\"n\": 1}\n\n42\n\"plain string\"\n{\"n\": 2}";
        let events = parse_trace(text);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn empty_input_yields_no_events() {
        assert!(parse_trace("").is_empty());
        assert!(parse_trace("   \n  ").is_empty());
    }

    #[test]
    fn object_without_event_array_yields_no_events() {
        assert!(parse_trace(r#"{"config": {"retries": 3}}"#).is_empty());
    }
}
