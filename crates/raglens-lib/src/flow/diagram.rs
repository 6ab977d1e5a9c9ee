//! Activity-diagram serialization
//!
//! Renders a [`FlowGraph`](super::FlowGraph) as PlantUML activity source.
//! The output is always a syntactically closed diagram: an empty graph
//! still yields balanced start/end markers around a placeholder activity.

use super::{FlowGraph, FlowNode, LoopInfo};
use std::collections::HashMap;

/// At most this many inferred transitions are listed in the note block.
const MAX_NOTE_EDGES: usize = 80;
/// At most this many repeated-step groups are listed in the note block.
const MAX_NOTE_GROUPS: usize = 20;
/// At most this many sample positions are shown per repeated-step group.
const MAX_GROUP_SAMPLES: usize = 8;

/// Serialize the graph as PlantUML activity-diagram source.
pub fn render_activity_diagram(graph: &FlowGraph) -> String {
    let mut out = String::new();
    out.push_str("@startuml\n");
    out.push_str("start\n");

    if graph.nodes.is_empty() {
        out.push_str(":no structural trace events;\n");
    } else {
        let partitioned = graph
            .loop_info
            .as_ref()
            .is_some_and(|info| push_partitioned(&mut out, &graph.nodes, info));
        if !partitioned {
            for node in &graph.nodes {
                push_activity(&mut out, node);
            }
        }
        push_note(&mut out, graph);
    }

    out.push_str("stop\n");
    out.push_str("@enduml\n");
    out
}

/// Render the node sequence with one partition per loop iteration. Returns
/// false when the loop info does not line up with the node sequence, in
/// which case the caller falls back to a flat rendering.
fn push_partitioned(out: &mut String, nodes: &[FlowNode], info: &LoopInfo) -> bool {
    let (Some(&first), Some(&last)) = (info.occurrences.first(), info.occurrences.last()) else {
        return false;
    };
    if last >= nodes.len() {
        return false;
    }

    for node in nodes.get(..first).unwrap_or_default() {
        push_activity(out, node);
    }
    for (iteration, bounds) in info.occurrences.windows(2).enumerate() {
        out.push_str(&format!(
            "partition \"Loop iteration {}\" {{\n",
            iteration + 1
        ));
        for node in nodes.get(bounds[0]..bounds[1]).unwrap_or_default() {
            push_activity(out, node);
        }
        out.push_str("}\n");
    }
    for node in nodes.get(last..).unwrap_or_default() {
        push_activity(out, node);
    }
    true
}

fn push_activity(out: &mut String, node: &FlowNode) {
    let mut label = format!(
        "{}. {} [{}] {}",
        node.index + 1,
        node.step_id,
        node.action_class,
        node.status.label()
    );
    if let Some(elapsed) = node.elapsed_ms {
        label.push_str(&format!(" +{}", fmt_ms(elapsed)));
    }
    if let Some(duration) = node.duration_ms {
        label.push_str(&format!(" ({})", fmt_ms(duration)));
    }
    out.push_str(&format!(":{};\n", sanitize_label(&label)));
}

/// Note block summarizing inferred transitions and repeated steps.
fn push_note(out: &mut String, graph: &FlowGraph) {
    let repeats = repeated_groups(&graph.nodes);
    if graph.edges.is_empty() && repeats.is_empty() {
        return;
    }

    out.push_str("note right\n");
    if !graph.edges.is_empty() {
        out.push_str("Inferred transitions:\n");
        for edge in graph.edges.iter().take(MAX_NOTE_EDGES) {
            let from_id = graph.nodes.get(edge.from).map_or("?", |n| n.step_id.as_str());
            let to_id = graph.nodes.get(edge.to).map_or("?", |n| n.step_id.as_str());
            out.push_str(&format!(
                "  {} -> {} ({} -> {})\n",
                edge.from + 1,
                edge.to + 1,
                sanitize_label(from_id),
                sanitize_label(to_id)
            ));
        }
        if graph.edges.len() > MAX_NOTE_EDGES {
            out.push_str(&format!("  +{} more\n", graph.edges.len() - MAX_NOTE_EDGES));
        }
    }
    if !repeats.is_empty() {
        out.push_str("Repeated steps:\n");
        for (step_id, positions) in repeats.iter().take(MAX_NOTE_GROUPS) {
            let shown: Vec<String> = positions
                .iter()
                .take(MAX_GROUP_SAMPLES)
                .map(|index| (index + 1).to_string())
                .collect();
            let overflow = if positions.len() > MAX_GROUP_SAMPLES {
                ", ..."
            } else {
                ""
            };
            out.push_str(&format!(
                "  {} x{} at {}{}\n",
                sanitize_label(step_id),
                positions.len(),
                shown.join(", "),
                overflow
            ));
        }
        if repeats.len() > MAX_NOTE_GROUPS {
            out.push_str(&format!("  +{} more groups\n", repeats.len() - MAX_NOTE_GROUPS));
        }
    }
    out.push_str("end note\n");
}

/// Step ids occurring more than once, ordered by first occurrence.
fn repeated_groups(nodes: &[FlowNode]) -> Vec<(String, Vec<usize>)> {
    let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
    for node in nodes {
        groups
            .entry(node.step_id.as_str())
            .or_default()
            .push(node.index);
    }
    let mut repeats: Vec<(String, Vec<usize>)> = groups
        .into_iter()
        .filter(|(_, positions)| positions.len() >= 2)
        .map(|(step_id, positions)| (step_id.to_string(), positions))
        .collect();
    repeats.sort_by_key(|(_, positions)| positions[0]);
    repeats
}

/// Activity labels end at the first semicolon, and notes end at a line
/// boundary. Strip both hazards from producer-supplied text.
fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .filter_map(|c| match c {
            ';' => None,
            '\n' | '\r' => Some(' '),
            other => Some(other),
        })
        .collect()
}

fn fmt_ms(ms: i64) -> String {
    if ms.abs() >= 1000 {
        format!("{:.2}s", ms as f64 / 1000.0)
    } else {
        format!("{ms}ms")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TraceEvent;
    use crate::flow::build_flow;
    use crate::timing;
    use serde_json::{json, Map};

    fn graph_for(events: Vec<TraceEvent>) -> FlowGraph {
        let timeline = timing::reconstruct(&events);
        build_flow(&events, &timeline, None)
    }

    fn event(step_id: &str, class: &str) -> TraceEvent {
        let mut map = Map::new();
        map.insert("step_id".to_string(), json!(step_id));
        map.insert("action_class".to_string(), json!(class));
        map
    }

    fn assert_balanced(source: &str) {
        assert!(source.starts_with("@startuml\n"));
        assert!(source.ends_with("@enduml\n"));
        assert!(source.contains("\nstart\n") || source.starts_with("@startuml\nstart\n"));
        assert!(source.contains("\nstop\n"));
        let opens = source.matches('{').count();
        let closes = source.matches('}').count();
        assert_eq!(opens, closes);
    }

    #[test]
    fn empty_graph_renders_a_minimal_valid_diagram() {
        let source = render_activity_diagram(&FlowGraph::default());
        assert_balanced(&source);
        assert!(source.contains(":no structural trace events;"));
        assert!(!source.contains("note right"));
    }

    #[test]
    fn activities_carry_position_class_and_status() {
        let source = render_activity_diagram(&graph_for(vec![
            event("fetch", "Retrieval"),
            event("rerank", "Rerank"),
            event("answer", "Generate"),
        ]));
        assert_balanced(&source);
        assert!(source.contains(":1. fetch [Retrieval] OK;"));
        assert!(source.contains(":3. answer [Generate] OK;"));
        assert!(source.contains("  1 -> 2 (fetch -> rerank)"));
    }

    #[test]
    fn loop_occurrences_become_partitions() {
        let events = vec![
            event("plan", "Plan"),
            event("loop", "Retrieve"),
            event("read", "Read"),
            event("loop", "Retrieve"),
            event("judge", "Judge"),
            event("loop", "Retrieve"),
            event("answer", "Generate"),
        ];
        let source = render_activity_diagram(&graph_for(events));
        assert_balanced(&source);
        assert!(source.contains("partition \"Loop iteration 1\" {"));
        assert!(source.contains("partition \"Loop iteration 2\" {"));
        assert!(!source.contains("Loop iteration 3"));
    }

    #[test]
    fn hostile_step_ids_cannot_break_the_syntax() {
        let source = render_activity_diagram(&graph_for(vec![
            event("bad;id\nx", "Fetch"),
            event("b", "Fetch"),
        ]));
        assert_balanced(&source);
        assert!(!source.contains("bad;"));
        assert!(source.contains("badid x"));
    }

    #[test]
    fn edge_listing_is_capped_with_an_overflow_marker() {
        let events: Vec<TraceEvent> = (0..82).map(|i| event(&format!("s{i}"), "Fetch")).collect();
        let source = render_activity_diagram(&graph_for(events));
        assert_balanced(&source);
        assert!(source.contains("  80 -> 81 (s79 -> s80)"));
        assert!(!source.contains("  81 -> 82"));
        assert!(source.contains("  +1 more\n"));
    }

    #[test]
    fn repeated_group_samples_are_capped() {
        let events: Vec<TraceEvent> = (0..10).map(|_| event("again", "Fetch")).collect();
        let source = render_activity_diagram(&graph_for(events));
        assert_balanced(&source);
        assert!(source.contains("  again x10 at 1, 2, 3, 4, 5, 6, 7, 8, ...\n"));
    }

    #[test]
    fn group_listing_is_capped_with_an_overflow_marker() {
        let mut events = Vec::new();
        for _ in 0..2 {
            for i in 0..21 {
                events.push(event(&format!("g{i}"), "Fetch"));
            }
        }
        let source = render_activity_diagram(&graph_for(events));
        assert_balanced(&source);
        assert!(source.contains("  g19 x2 at"));
        assert!(!source.contains("  g20 x2 at"));
        assert!(source.contains("  +1 more groups\n"));
    }

    #[test]
    fn timing_suffixes_appear_when_known() {
        let mut with_time = event("fetch", "Retrieval");
        with_time.insert("ts".to_string(), json!("2024-01-01T00:00:02Z"));
        with_time.insert("duration_ms".to_string(), json!(250));
        let mut base = event("begin", "Plan");
        base.insert("start_ts".to_string(), json!("2024-01-01T00:00:00Z"));
        base.insert("ts".to_string(), json!("2024-01-01T00:00:00Z"));

        let source = render_activity_diagram(&graph_for(vec![base, with_time]));
        assert!(source.contains(":2. fetch [Retrieval] OK +2.00s (250ms);"));
    }

    #[test]
    fn malformed_loop_info_falls_back_to_flat_rendering() {
        let mut graph = graph_for(vec![
            event("a", "Fetch"),
            event("b", "Fetch"),
        ]);
        graph.loop_info = Some(LoopInfo {
            step_id: "ghost".to_string(),
            occurrences: vec![5, 9],
            iterations: 1,
        });
        let source = render_activity_diagram(&graph);
        assert_balanced(&source);
        assert!(source.contains(":1. a [Fetch] OK;"));
    }
}
