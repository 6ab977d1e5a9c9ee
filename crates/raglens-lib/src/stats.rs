//! Duration statistics and slow-step detection
//!
//! Builds a reference distribution of step durations from the trace files
//! sitting next to the active one, then flags steps that run well past
//! what their action class usually takes. The distribution is rebuilt on
//! every invocation and never persisted.

use crate::event::{parse_trace, TraceEvent};
use crate::resolve::{step_identity, StepIdentity};
use crate::timing;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// At most this many sibling files are scanned per invocation.
pub const MAX_SIBLING_FILES: usize = 120;
/// Sibling files larger than this are skipped.
pub const MAX_SIBLING_FILE_BYTES: u64 = 20 * 1024 * 1024;
/// Minimum samples a pool needs before it yields a threshold.
pub const MIN_SAMPLES: usize = 6;

const MIN_ALLOWED_MS: f64 = 150.0;
const MEDIAN_FACTOR: f64 = 2.2;
const P90_FACTOR: f64 = 1.25;

/// Observed step durations, grouped by lowercased action class plus a
/// global pool across all classes.
#[derive(Debug, Clone, Default)]
pub struct DurationStats {
    per_class: HashMap<String, Vec<i64>>,
    global: Vec<i64>,
}

impl DurationStats {
    /// Record one observed duration. Negative values are discarded.
    pub fn record(&mut self, action_class: &str, duration_ms: i64) {
        if duration_ms < 0 {
            return;
        }
        self.per_class
            .entry(action_class.to_lowercase())
            .or_default()
            .push(duration_ms);
        self.global.push(duration_ms);
    }

    /// Record every resolvable step duration from one parsed trace.
    pub fn accumulate_trace(&mut self, events: &[TraceEvent]) {
        let timeline = timing::reconstruct(events);
        for (event, step) in events.iter().zip(&timeline.steps) {
            if let Some(duration) = step.duration_ms {
                self.record(&step_identity(event).action_class, duration);
            }
        }
    }

    /// Samples recorded for one action class.
    pub fn class_sample_count(&self, action_class: &str) -> usize {
        self.per_class
            .get(&action_class.to_lowercase())
            .map_or(0, Vec::len)
    }

    pub fn global_sample_count(&self) -> usize {
        self.global.len()
    }

    /// Upper bound on a normal duration for this action class.
    ///
    /// Uses the class's own distribution when it has enough samples, falls
    /// back to the global pool otherwise, and yields nothing when history
    /// is too sparse to judge.
    pub fn allowed_duration_ms(&self, action_class: &str) -> Option<f64> {
        let pool = match self.per_class.get(&action_class.to_lowercase()) {
            Some(samples) if samples.len() >= MIN_SAMPLES => samples,
            _ if self.global.len() >= MIN_SAMPLES => &self.global,
            _ => return None,
        };
        let mut sorted = pool.clone();
        sorted.sort_unstable();
        let median = nearest_rank(&sorted, 0.5) as f64;
        let p90 = nearest_rank(&sorted, 0.9) as f64;
        Some(
            MIN_ALLOWED_MS
                .max(MEDIAN_FACTOR * median)
                .max(P90_FACTOR * p90),
        )
    }

    /// Whether this step ran anomalously long. Error steps are never
    /// flagged, and nothing is flagged without a computed threshold.
    pub fn is_slow_step(&self, identity: &StepIdentity, duration_ms: Option<i64>) -> bool {
        if identity.is_error {
            return false;
        }
        match (duration_ms, self.allowed_duration_ms(&identity.action_class)) {
            (Some(duration), Some(allowed)) => duration as f64 > allowed,
            _ => false,
        }
    }
}

/// Nearest-rank percentile over an ascending-sorted slice.
fn nearest_rank(sorted: &[i64], percentile: f64) -> i64 {
    let index = ((sorted.len() as f64) * percentile).ceil() as usize;
    sorted[index.saturating_sub(1).min(sorted.len() - 1)]
}

/// Scan the directory holding the active trace and accumulate durations
/// from every `.json`/`.jsonl` file found there, within the file-count and
/// file-size caps. Unreadable entries are skipped.
pub fn collect_sibling_stats(dir: &Path) -> DurationStats {
    let mut stats = DurationStats::default();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "sibling scan skipped");
            return stats;
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| is_trace_file(path))
        .collect();
    // Deterministic scan order regardless of directory enumeration order.
    paths.sort();

    for path in paths.into_iter().take(MAX_SIBLING_FILES) {
        match fs::metadata(&path) {
            Ok(meta) if meta.len() <= MAX_SIBLING_FILE_BYTES => {}
            Ok(_) => {
                debug!(file = %path.display(), "sibling file over size cap, skipped");
                continue;
            }
            Err(_) => continue,
        }
        let Ok(text) = fs::read_to_string(&path) else {
            debug!(file = %path.display(), "sibling file unreadable, skipped");
            continue;
        };
        stats.accumulate_trace(&parse_trace(&text));
    }

    debug!(
        classes = stats.per_class.len(),
        samples = stats.global.len(),
        "sibling duration statistics collected"
    );
    stats
}

fn is_trace_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json") || ext.eq_ignore_ascii_case("jsonl"))
}
