//! Trace interpretation engine for RAG pipeline execution logs.
//!
//! Turns raw trace text (a JSON document, a bare array, or line-delimited
//! JSON) into step reports with state diffs, reconstructed per-step
//! timing, slow-step flags derived from sibling-trace statistics, and a
//! flow graph rendered as PlantUML activity source with its URL transport
//! encoding.
//!
//! The engine is synchronous, deterministic, and host-independent: it
//! maps input text to structured results and leaves presentation to the
//! host. `raglens-runner` is one such host for the terminal.

pub mod diff;
pub mod error;
pub mod event;
pub mod flow;
pub mod plantuml;
pub mod report;
pub mod resolve;
pub mod stats;
pub mod timing;

pub use error::{Result, TraceError};
pub use event::{parse_trace, parse_trace_file, TraceEvent};
pub use flow::{build_flow, FlowGraph};
pub use report::{render_markdown, step_report, trace_report, StepReport, TraceReport};
pub use stats::{collect_sibling_stats, DurationStats};
pub use timing::{reconstruct, TraceTimeline};
