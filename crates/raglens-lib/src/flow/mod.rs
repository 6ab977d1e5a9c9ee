//! Flow graph construction
//!
//! Filters a trace down to its structural steps, infers one outgoing
//! transition per step, and detects the dominant repeated-step loop. The
//! resulting graph drives the activity-diagram serialization in
//! [`diagram`].

pub mod diagram;

use crate::event::TraceEvent;
use crate::resolve::{self, StepIdentity};
use crate::stats::DurationStats;
use crate::timing::TraceTimeline;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Below this many strict structural events the looser filter kicks in.
const MIN_STRICT_NODES: usize = 3;

/// Action classes too generic to anchor a flow step.
const GENERIC_ACTION_CLASSES: [&str; 2] = ["unknown", "action"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Ok,
    Slow,
    Error,
}

impl NodeStatus {
    pub fn label(self) -> &'static str {
        match self {
            NodeStatus::Ok => "OK",
            NodeStatus::Slow => "SLOW",
            NodeStatus::Error => "ERROR",
        }
    }
}

/// One structural step in the flow graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowNode {
    /// Position within the graph's node sequence.
    pub index: usize,
    /// Position of the source event within the parsed trace.
    pub event_index: usize,
    pub step_id: String,
    pub action_class: String,
    pub status: NodeStatus,
    pub next_step_id: Option<String>,
    pub elapsed_ms: Option<i64>,
    pub duration_ms: Option<i64>,
}

/// Directed transition between two node indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEdge {
    pub from: usize,
    pub to: usize,
}

/// The loop chosen to partition the diagram into iterations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopInfo {
    pub step_id: String,
    /// Node indices where the looping step occurs, ascending.
    pub occurrences: Vec<usize>,
    /// One iteration per gap between consecutive occurrences.
    pub iterations: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowGraph {
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
    pub loop_info: Option<LoopInfo>,
}

fn is_generic_class(class: &str) -> bool {
    GENERIC_ACTION_CLASSES
        .iter()
        .any(|generic| class.eq_ignore_ascii_case(generic))
}

/// Strict structural test: a real step id and a non-generic action class.
fn is_structural(event: &TraceEvent) -> bool {
    resolve::resolved_step_id(event).is_some()
        && resolve::resolved_action_class(event).is_some_and(|class| !is_generic_class(&class))
}

/// Looser test for sparse traces: anything with a resolvable identity,
/// excluding only true unknowns.
fn has_identity(event: &TraceEvent) -> bool {
    resolve::resolved_step_id(event).is_some()
        || resolve::resolved_action_class(event)
            .is_some_and(|class| !class.eq_ignore_ascii_case("unknown"))
}

/// Build the flow graph for a trace.
///
/// `timeline` must be the reconstruction of the same event sequence. Pass
/// `stats` to have slow steps marked; without it every non-error step is
/// reported as ok.
pub fn build_flow(
    events: &[TraceEvent],
    timeline: &TraceTimeline,
    stats: Option<&DurationStats>,
) -> FlowGraph {
    let mut selected: Vec<usize> = (0..events.len())
        .filter(|&i| is_structural(&events[i]))
        .collect();
    if selected.len() < MIN_STRICT_NODES {
        let relaxed: Vec<usize> = (0..events.len())
            .filter(|&i| has_identity(&events[i]))
            .collect();
        debug!(
            strict = selected.len(),
            relaxed = relaxed.len(),
            "too few structural events, relaxing filter"
        );
        selected = relaxed;
    }

    let nodes: Vec<FlowNode> = selected
        .into_iter()
        .enumerate()
        .map(|(index, event_index)| {
            let event = &events[event_index];
            let identity = resolve::step_identity(event);
            let step = timeline.step(event_index).copied().unwrap_or_default();
            let status = node_status(&identity, step.duration_ms, stats);
            FlowNode {
                index,
                event_index,
                step_id: identity.step_id,
                action_class: identity.action_class,
                status,
                next_step_id: resolve::next_step_id(event),
                elapsed_ms: step.elapsed_ms,
                duration_ms: step.duration_ms,
            }
        })
        .collect();

    let edges: Vec<FlowEdge> = nodes
        .iter()
        .filter_map(|node| {
            edge_target(&nodes, node.index).map(|to| FlowEdge {
                from: node.index,
                to,
            })
        })
        .collect();

    let loop_info = detect_loop(&nodes);
    debug!(
        nodes = nodes.len(),
        edges = edges.len(),
        looping = loop_info.is_some(),
        "flow graph built"
    );

    FlowGraph {
        nodes,
        edges,
        loop_info,
    }
}

fn node_status(
    identity: &StepIdentity,
    duration_ms: Option<i64>,
    stats: Option<&DurationStats>,
) -> NodeStatus {
    if identity.is_error {
        NodeStatus::Error
    } else if stats.is_some_and(|s| s.is_slow_step(identity, duration_ms)) {
        NodeStatus::Slow
    } else {
        NodeStatus::Ok
    }
}

/// Pick the outgoing edge for one node.
///
/// A declared next-step id targets the nearest matching node after this
/// one, wrapping to the first match in the trace when the pointer goes
/// backwards. Without a declared pointer (or with one that matches no
/// node) the edge falls through to the next node in sequence.
fn edge_target(nodes: &[FlowNode], from: usize) -> Option<usize> {
    if let Some(next_id) = nodes[from].next_step_id.as_deref() {
        let forward = nodes[from + 1..].iter().find(|n| n.step_id == next_id);
        let target = forward.or_else(|| nodes.iter().find(|n| n.step_id == next_id));
        if let Some(target) = target {
            return Some(target.index);
        }
    }
    (from + 1 < nodes.len()).then_some(from + 1)
}

/// Choose the step id whose repetitions best partition the trace.
///
/// Among step ids occurring at least three times, the group with the
/// largest sum of gaps between consecutive occurrences wins; ties go to
/// the group appearing earliest. This is a structural heuristic, not a
/// guaranteed loop detector, and its selection rule is part of the report
/// semantics.
fn detect_loop(nodes: &[FlowNode]) -> Option<LoopInfo> {
    let mut occurrences: HashMap<&str, Vec<usize>> = HashMap::new();
    for node in nodes {
        occurrences
            .entry(node.step_id.as_str())
            .or_default()
            .push(node.index);
    }

    let mut best: Option<(usize, Vec<usize>, &str)> = None;
    for (step_id, indices) in occurrences {
        if indices.len() < 3 {
            continue;
        }
        let gap_sum: usize = indices.windows(2).map(|pair| pair[1] - pair[0]).sum();
        let replace = match &best {
            None => true,
            Some((best_sum, best_indices, _)) => {
                gap_sum > *best_sum || (gap_sum == *best_sum && indices[0] < best_indices[0])
            }
        };
        if replace {
            best = Some((gap_sum, indices, step_id));
        }
    }

    best.map(|(_, indices, step_id)| LoopInfo {
        step_id: step_id.to_string(),
        iterations: indices.len() - 1,
        occurrences: indices,
    })
}
