use ascii_tree::{write_tree, Tree};
use raglens_lib::report::{format_duration_ms, StepReport, TraceReport};
use std::path::Path;

/// Renders a `TraceReport` into a human-readable ASCII tree format.
///
/// This gives a quick, high-level overview of the pipeline execution
/// directly in the terminal.
pub fn render_report_as_tree(trace_path: &Path, report: &TraceReport) -> String {
    let mut root_label = format!("📊 {} ({} steps", trace_path.display(), report.step_count);
    if let Some(elapsed) = report.total_elapsed_ms {
        root_label.push_str(&format!(", {}", format_duration_ms(elapsed)));
    }
    root_label.push(')');
    if report.error_count > 0 {
        root_label.push_str(&format!(" ❌ {} errors", report.error_count));
    }
    if report.slow_count > 0 {
        root_label.push_str(&format!(" 🐢 {} slow", report.slow_count));
    }

    let step_nodes = report.steps.iter().map(render_step_node).collect();

    let tree = Tree::Node(root_label, step_nodes);
    let mut buffer = String::new();
    write_tree(&mut buffer, &tree).unwrap();
    buffer
}

/// Renders a single step into a `Tree` node for the ASCII tree.
///
/// - error step -> `❌`, slow step -> `🐢`, otherwise -> `✅`
fn render_step_node(step: &StepReport) -> Tree {
    let status_icon = if step.is_error {
        "❌"
    } else if step.is_slow {
        "🐢"
    } else {
        "✅"
    };

    let mut label = format!(
        "{} {}. {} [{}]",
        status_icon, step.position, step.step_id, step.action_class
    );
    if let Some(duration) = step.header.duration_ms {
        label.push_str(&format!(" {}", format_duration_ms(duration)));
    }
    if let Some(elapsed) = step.timing.elapsed_ms {
        label.push_str(&format!(" (+{})", format_duration_ms(elapsed)));
    }

    let mut children = Vec::new();
    if let Some(ts) = &step.header.ts_utc {
        children.push(Tree::Leaf(vec![format!("ts: {ts}")]));
    }
    if let Some(level) = &step.header.level {
        children.push(Tree::Leaf(vec![format!("level: {level}")]));
    }
    if let Some(next) = &step.header.next_step_id {
        children.push(Tree::Leaf(vec![format!("next: {next}")]));
    }
    if let Some(message) = &step.header.message {
        children.push(Tree::Leaf(vec![format!("message: {message}")]));
    }
    if !step.state_changes.is_empty() {
        let changes = step
            .state_changes
            .iter()
            .map(|(key, change)| format!("{key}: {} -> {}", change.from, change.to))
            .collect();
        children.push(Tree::Node("state changes".to_string(), vec![Tree::Leaf(changes)]));
    }

    Tree::Node(label, children)
}
