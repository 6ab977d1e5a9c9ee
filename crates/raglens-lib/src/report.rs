//! Report generation
//!
//! Assembles the parsed trace, reconstructed timing, state diffs, and
//! anomaly flags into the structures hosts render: a summary per step and
//! a report for the whole trace, plus a markdown rendering.

use crate::diff::{diff_top_level, FieldChange};
use crate::error::{Result, TraceError};
use crate::event::TraceEvent;
use crate::resolve;
use crate::stats::DurationStats;
use crate::timing::{self, StepTiming, TraceTimeline};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Messages longer than this many characters are cut in step headers.
pub const MESSAGE_LIMIT: usize = 500;

/// Header summary for one step; every field is optional and omitted from
/// serialized output when unresolvable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepHeader {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts_utc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_step_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Everything a host needs to render one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// 1-based position within the trace.
    pub position: usize,
    pub step_id: String,
    pub action_class: String,
    pub is_error: bool,
    pub is_slow: bool,
    pub header: StepHeader,
    pub timing: StepTiming,
    /// Top-level changes between this step's before and after snapshots.
    pub state_changes: BTreeMap<String, FieldChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceReport {
    pub step_count: usize,
    pub trace_start_ms: Option<i64>,
    pub total_elapsed_ms: Option<i64>,
    pub error_count: usize,
    pub slow_count: usize,
    pub steps: Vec<StepReport>,
}

/// Resolve the header summary for one event.
pub fn step_header(event: &TraceEvent, timing: &StepTiming) -> StepHeader {
    StepHeader {
        ts_utc: timing.end_ms.and_then(epoch_ms_to_utc),
        duration_ms: timing.duration_ms,
        level: resolve::level(event),
        next_step_id: resolve::next_step_id(event),
        message: resolve::message(event).map(|m| truncate_chars(&m, MESSAGE_LIMIT)),
    }
}

/// Build the report for one step of the trace.
pub fn step_report(
    events: &[TraceEvent],
    index: usize,
    stats: Option<&DurationStats>,
) -> Result<StepReport> {
    if events.is_empty() {
        return Err(TraceError::NoEvents);
    }
    if index >= events.len() {
        return Err(TraceError::invalid_step_index(index, events.len()));
    }
    let timeline = timing::reconstruct(events);
    Ok(build_step(&events[index], index, &timeline, stats))
}

/// Build the report for a whole trace.
pub fn trace_report(
    events: &[TraceEvent],
    stats: Option<&DurationStats>,
) -> Result<TraceReport> {
    if events.is_empty() {
        return Err(TraceError::NoEvents);
    }
    let timeline = timing::reconstruct(events);
    let steps: Vec<StepReport> = events
        .iter()
        .enumerate()
        .map(|(index, event)| build_step(event, index, &timeline, stats))
        .collect();

    let error_count = steps.iter().filter(|s| s.is_error).count();
    let slow_count = steps.iter().filter(|s| s.is_slow).count();
    let total_elapsed_ms = steps.iter().filter_map(|s| s.timing.elapsed_ms).max();
    debug!(
        steps = steps.len(),
        errors = error_count,
        slow = slow_count,
        "trace report assembled"
    );

    Ok(TraceReport {
        step_count: steps.len(),
        trace_start_ms: timeline.trace_start_ms,
        total_elapsed_ms,
        error_count,
        slow_count,
        steps,
    })
}

fn build_step(
    event: &TraceEvent,
    index: usize,
    timeline: &TraceTimeline,
    stats: Option<&DurationStats>,
) -> StepReport {
    let identity = resolve::step_identity(event);
    let timing = timeline.step(index).copied().unwrap_or_default();
    let is_slow = stats.is_some_and(|s| s.is_slow_step(&identity, timing.duration_ms));
    let state_changes = match (resolve::state_before(event), resolve::state_after(event)) {
        (Some(before), Some(after)) => diff_top_level(before, after),
        _ => BTreeMap::new(),
    };

    StepReport {
        position: index + 1,
        step_id: identity.step_id,
        action_class: identity.action_class,
        is_error: identity.is_error,
        is_slow,
        header: step_header(event, &timing),
        timing,
        state_changes,
    }
}

/// Render a full trace report as markdown.
pub fn render_markdown(report: &TraceReport) -> String {
    let mut out = String::new();
    out.push_str("# Trace report\n\n");
    out.push_str(&format!("- steps: {}\n", report.step_count));
    if let Some(started) = report.trace_start_ms.and_then(epoch_ms_to_utc) {
        out.push_str(&format!("- started: {started}\n"));
    }
    if let Some(elapsed) = report.total_elapsed_ms {
        out.push_str(&format!("- total elapsed: {}\n", format_duration_ms(elapsed)));
    }
    out.push_str(&format!("- errors: {}\n", report.error_count));
    out.push_str(&format!("- slow steps: {}\n", report.slow_count));

    for step in &report.steps {
        out.push('\n');
        out.push_str(&format!(
            "## {}. {} [{}]",
            step.position, step.step_id, step.action_class
        ));
        if step.is_error {
            out.push_str(" ERROR");
        } else if step.is_slow {
            out.push_str(" SLOW");
        }
        out.push('\n');

        if let Some(ts) = &step.header.ts_utc {
            out.push_str(&format!("- ts: {ts}\n"));
        }
        if let Some(duration) = step.header.duration_ms {
            out.push_str(&format!("- duration: {}\n", format_duration_ms(duration)));
        }
        if let Some(elapsed) = step.timing.elapsed_ms {
            out.push_str(&format!("- elapsed: {}\n", format_duration_ms(elapsed)));
        }
        if let Some(level) = &step.header.level {
            out.push_str(&format!("- level: {level}\n"));
        }
        if let Some(next) = &step.header.next_step_id {
            out.push_str(&format!("- next: {next}\n"));
        }
        if let Some(message) = &step.header.message {
            out.push_str(&format!("- message: {message}\n"));
        }
        if !step.state_changes.is_empty() {
            out.push_str("\n### State changes\n");
            for (key, change) in &step.state_changes {
                out.push_str(&format!("- `{key}`: {} -> {}\n", change.from, change.to));
            }
        }
    }
    out
}

/// Millisecond span formatted the way the terminal renderer shows it.
pub fn format_duration_ms(ms: i64) -> String {
    if ms.abs() >= 1000 {
        format!("{:.2}s", ms as f64 / 1000.0)
    } else {
        format!("{ms}ms")
    }
}

fn epoch_ms_to_utc(ms: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        text.chars().take(limit).collect()
    } else {
        text.to_string()
    }
}
