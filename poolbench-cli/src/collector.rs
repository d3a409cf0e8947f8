//! Metrics Collector
//!
//! Turns the transcript of one measured run into [`RunMetrics`]. The
//! transcript is whatever the run and its timing wrapper printed, a mix of
//! `key: value` lines and anything else:
//!
//! ```text
//! items: 64
//! gilknocker: 0.8312
//! wall_clock: 4.21
//! cpu: 99%
//! vmpeak: 10432 kB
//! ```
//!
//! A key that is missing or unparseable is recorded as zero (or absent, for
//! `gilknocker`) and reported as a [`ParseIssue`]; it never fails the run.

use poolbench_report::RunMetrics;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Wall-clock seconds, float
pub const WALL_CLOCK_KEY: &str = "wall_clock";
/// CPU percent, integer, `%` suffix tolerated
pub const CPU_KEY: &str = "cpu";
/// Peak process-tree memory, integer kB
pub const VMPEAK_KEY: &str = "vmpeak";
/// Contention fraction, float in `[0, 1]`
pub const CONTENTION_KEY: &str = "gilknocker";

static LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*"?([A-Za-z_][A-Za-z0-9_]*)"?\s*:\s*"?([^"]*?)"?\s*$"#)
        .unwrap_or_else(|e| panic!("invalid metric line pattern: {e}"))
});

/// A metric that could not be read from the transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseIssue {
    /// The key never appeared
    Missing(&'static str),
    /// The key appeared with a value that does not parse
    Malformed {
        /// Metric key
        key: &'static str,
        /// Raw value text
        value: String,
    },
}

impl fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseIssue::Missing(key) => write!(f, "metric '{key}' missing from run output"),
            ParseIssue::Malformed { key, value } => {
                write!(f, "metric '{key}' has unparseable value '{value}'")
            }
        }
    }
}

/// Metrics parsed from one transcript, plus what went wrong along the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Collected {
    /// Parsed values, zero or absent where an issue was recorded
    pub metrics: RunMetrics,
    /// Keys that were missing or malformed
    pub issues: Vec<ParseIssue>,
}

/// Last raw value of `key` in the transcript. Later lines win, so a wrapper's
/// own report overrides anything the run printed under the same key.
fn find_raw<'a>(transcript: &'a str, key: &str) -> Option<&'a str> {
    transcript
        .lines()
        .filter_map(|line| LINE_RE.captures(line))
        .filter(|caps| &caps[1] == key)
        .filter_map(|caps| caps.get(2).map(|m| m.as_str()))
        .last()
}

fn strip_suffix<'a>(raw: &'a str, suffixes: &[&str]) -> &'a str {
    let raw = raw.trim();
    for suffix in suffixes {
        if let Some(stripped) = raw.strip_suffix(suffix) {
            return stripped.trim_end();
        }
    }
    raw
}

fn parse_key<T: std::str::FromStr>(
    transcript: &str,
    key: &'static str,
    suffixes: &[&str],
    issues: &mut Vec<ParseIssue>,
) -> Option<T> {
    let Some(raw) = find_raw(transcript, key) else {
        issues.push(ParseIssue::Missing(key));
        return None;
    };
    match strip_suffix(raw, suffixes).parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            issues.push(ParseIssue::Malformed {
                key,
                value: raw.to_string(),
            });
            None
        }
    }
}

/// Parse a transcript. `expect_contention` says whether a probe applied to
/// this run, which decides if a missing `gilknocker` line is an issue.
pub fn collect(transcript: &str, expect_contention: bool) -> Collected {
    let mut issues = Vec::new();

    let wall_clock_seconds = parse_key::<f64>(transcript, WALL_CLOCK_KEY, &["s"], &mut issues)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .unwrap_or(0.0);

    // GNU time prints fractional percentages on some platforms
    let cpu_percent = parse_key::<f64>(transcript, CPU_KEY, &["%"], &mut issues)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v.round() as u32)
        .unwrap_or(0);

    let peak_memory_kb = parse_key::<u64>(transcript, VMPEAK_KEY, &["kB", "KB", "kb"], &mut issues)
        .unwrap_or(0);

    let contention_fraction = if expect_contention {
        parse_key::<f64>(transcript, CONTENTION_KEY, &[], &mut issues)
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(0.0, 1.0))
    } else {
        None
    };

    for issue in &issues {
        tracing::warn!("{issue}");
    }

    Collected {
        metrics: RunMetrics {
            wall_clock_seconds,
            cpu_percent,
            peak_memory_kb,
            contention_fraction,
        },
        issues,
    }
}

/// Item count the run reported, if any.
pub fn reported_items(transcript: &str) -> Option<usize> {
    find_raw(transcript, "items")?.trim().parse().ok()
}
