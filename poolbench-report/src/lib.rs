#![warn(missing_docs)]
//! poolbench Report - Metrics Documents
//!
//! The per-benchmark metrics document and its two renderings:
//! - JSON on disk, consumed by the visualization step
//! - A human-readable terminal summary

mod human;
mod json;
mod report;

pub use human::{format_summary, speedup};
pub use json::{DocumentError, document_path, generate_json_report, load_document, write_document};
pub use report::{BenchmarkResult, RunMetrics};
