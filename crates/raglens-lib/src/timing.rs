//! Per-step timing reconstruction
//!
//! Producers rarely log complete timing. Some emit only an end timestamp,
//! some only a duration, and asynchronous queue hand-offs emit separate
//! CONSUME marker events. This module runs a single forward pass over the
//! trace and derives start, end, duration, and elapsed time per step from
//! whatever is available, chaining from the previous step when nothing is.

use crate::event::TraceEvent;
use crate::resolve::{self, CONSUMER_STEP_KEYS, END_TIME_KEYS, START_TIME_KEYS};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Epoch values below this are interpreted as seconds, not milliseconds.
const EPOCH_MS_THRESHOLD: f64 = 1e12;

/// Reconstructed wall-clock view of one step. Every field is optional
/// because every field can be missing from the source trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTiming {
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
    pub duration_ms: Option<i64>,
    pub elapsed_ms: Option<i64>,
}

/// Timing for a whole trace, index-aligned with the parsed event sequence.
#[derive(Debug, Clone, Default)]
pub struct TraceTimeline {
    pub steps: Vec<StepTiming>,
    pub trace_start_ms: Option<i64>,
}

impl TraceTimeline {
    pub fn step(&self, index: usize) -> Option<&StepTiming> {
        self.steps.get(index)
    }
}

/// Convert a raw timestamp value to epoch milliseconds.
///
/// Numbers are epoch seconds or milliseconds depending on magnitude.
/// Strings are tried as a numeric epoch, then RFC 3339, then two common
/// naive date-time layouts read as UTC.
pub fn value_to_epoch_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => epoch_number_to_ms(n.as_f64()?),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<f64>() {
                return epoch_number_to_ms(n);
            }
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
                return Some(dt.timestamp_millis());
            }
            for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                    return Some(naive.and_utc().timestamp_millis());
                }
            }
            None
        }
        _ => None,
    }
}

fn epoch_number_to_ms(value: f64) -> Option<i64> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    let ms = if value < EPOCH_MS_THRESHOLD {
        value * 1000.0
    } else {
        value
    };
    Some(ms.round() as i64)
}

/// First candidate field that converts to a valid epoch time.
fn first_epoch_ms(event: &TraceEvent, candidates: &[&str]) -> Option<i64> {
    candidates
        .iter()
        .find_map(|path| resolve::lookup_path(event, path).and_then(value_to_epoch_ms))
}

fn explicit_duration_ms(event: &TraceEvent) -> Option<i64> {
    resolve::duration_ms(event).map(|v| v.round() as i64)
}

fn is_consume_marker(event: &TraceEvent) -> bool {
    resolve::event_type(event).is_some_and(|t| t.eq_ignore_ascii_case("consume"))
}

/// Reconstruct timing for every event in the trace.
///
/// Start time is resolved in priority order: explicit start field, end
/// minus explicit duration, a queued CONSUME hand-off timestamp for this
/// step id, and finally the previous event's end time. Duration prefers an
/// explicit field over the end minus start difference.
pub fn reconstruct(events: &[TraceEvent]) -> TraceTimeline {
    // CONSUME markers record when a queue hand-off reached its consumer.
    // Queue them per consumer step id in document order so repeated steps
    // pick them up first-in first-out.
    let mut consume_queues: HashMap<String, VecDeque<i64>> = HashMap::new();
    for event in events {
        if !is_consume_marker(event) {
            continue;
        }
        let Some(consumer) = resolve::first_string(event, &CONSUMER_STEP_KEYS) else {
            continue;
        };
        let Some(ts) = first_epoch_ms(event, &END_TIME_KEYS) else {
            continue;
        };
        consume_queues.entry(consumer).or_default().push_back(ts);
    }
    if !consume_queues.is_empty() {
        debug!(
            steps_with_markers = consume_queues.len(),
            "queued consume hand-off timestamps"
        );
    }

    let mut steps = Vec::with_capacity(events.len());
    let mut previous_end_ms: Option<i64> = None;

    for event in events {
        let end_ms = first_epoch_ms(event, &END_TIME_KEYS);
        let explicit_duration = explicit_duration_ms(event);

        let mut start_ms = first_epoch_ms(event, &START_TIME_KEYS);
        if start_ms.is_none() {
            start_ms = match (end_ms, explicit_duration) {
                (Some(end), Some(duration)) => Some(end - duration),
                _ => None,
            };
        }
        if start_ms.is_none() {
            start_ms = pop_consume_start(&mut consume_queues, event, end_ms);
        }
        if start_ms.is_none() {
            start_ms = previous_end_ms;
        }

        let duration_ms = explicit_duration.or(match (start_ms, end_ms) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        });

        if end_ms.is_some() {
            previous_end_ms = end_ms;
        }

        steps.push(StepTiming {
            start_ms,
            end_ms,
            duration_ms,
            elapsed_ms: None,
        });
    }

    let trace_start_ms = steps
        .iter()
        .filter_map(|s| s.start_ms)
        .min()
        .or_else(|| steps.iter().filter_map(|s| s.end_ms).min());

    if let Some(trace_start) = trace_start_ms {
        for step in &mut steps {
            step.elapsed_ms = step.end_ms.map(|end| end - trace_start);
        }
    }

    TraceTimeline {
        steps,
        trace_start_ms,
    }
}

/// Take the oldest queued hand-off for this step, but only when it does
/// not postdate the step's own end time.
fn pop_consume_start(
    queues: &mut HashMap<String, VecDeque<i64>>,
    event: &TraceEvent,
    end_ms: Option<i64>,
) -> Option<i64> {
    let step_id = resolve::resolved_step_id(event)?;
    let end = end_ms?;
    let queue = queues.get_mut(&step_id)?;
    match queue.front() {
        Some(ts) if *ts <= end => queue.pop_front(),
        _ => None,
    }
}
