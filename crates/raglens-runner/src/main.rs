use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use raglens_lib::flow::diagram::render_activity_diagram;
use raglens_lib::plantuml::{self, DiagramTarget};
use raglens_lib::{
    build_flow, collect_sibling_stats, parse_trace_file, reconstruct, render_markdown,
    step_report, trace_report, DurationStats,
};
use std::path::PathBuf;
use tracing::{debug, subscriber};
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

mod renderer;

/// A command-line viewer for RAG pipeline execution traces.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a trace file (`.json` or `.jsonl`).
    path: PathBuf,

    /// Report a single step (1-based) instead of the whole trace.
    #[arg(long)]
    step: Option<usize>,

    /// Print the activity diagram source and its renderer link.
    #[arg(long)]
    diagram: bool,

    /// Print the full report as markdown.
    #[arg(long)]
    markdown: bool,

    /// Base URL of the diagram rendering server.
    #[arg(long)]
    server: Option<String>,

    /// Skip the sibling-file scan used for slow-step detection.
    #[arg(long)]
    no_stats: bool,

    /// Decode an encoded diagram string and print its source, then exit.
    #[arg(long, value_name = "ENCODED")]
    decode: Option<String>,
}

/// Initializes the tracing subscriber for terminal diagnostics.
fn init_tracing() -> Result<()> {
    let subscriber =
        Registry::default().with(EnvFilter::new("info,raglens_lib=debug,raglens_runner=debug"));

    subscriber::set_global_default(subscriber)
        .context("Failed to set global default tracing subscriber")?;

    Ok(())
}

fn main() -> Result<()> {
    // Load environment variables from a .env file in the current directory.
    dotenv().ok();

    init_tracing()?;
    let cli = Cli::parse();

    if let Some(encoded) = &cli.decode {
        let source = plantuml::decode_diagram(encoded)
            .context("Failed to decode the diagram transport string")?;
        println!("{source}");
        return Ok(());
    }

    let events = parse_trace_file(&cli.path)
        .with_context(|| format!("Failed to load trace from {}", cli.path.display()))?;

    let stats: Option<DurationStats> = if cli.no_stats {
        debug!("sibling-file scan disabled");
        None
    } else {
        cli.path.parent().map(collect_sibling_stats)
    };

    if let Some(step) = cli.step {
        let index = step
            .checked_sub(1)
            .context("Steps are numbered from 1")?;
        let report = step_report(&events, index, stats.as_ref())?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if cli.diagram {
        let timeline = reconstruct(&events);
        let graph = build_flow(&events, &timeline, stats.as_ref());
        let source = render_activity_diagram(&graph);
        println!("{source}");

        let base = cli.server.clone().unwrap_or_else(plantuml::server_url);
        match plantuml::diagram_link(&base, &source)? {
            DiagramTarget::Url(url) => println!("🔗 {url}"),
            DiagramTarget::ClipboardFallback { .. } => {
                println!("⚠️ Diagram too large for a URL; paste the source above into the renderer.");
            }
        }
        return Ok(());
    }

    let report = trace_report(&events, stats.as_ref())?;

    if cli.markdown {
        println!("{}", render_markdown(&report));
        return Ok(());
    }

    let tree_output = renderer::render_report_as_tree(&cli.path, &report);
    println!("{tree_output}");

    Ok(())
}
