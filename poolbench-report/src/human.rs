//! Human-readable summary of a metrics document.

use crate::report::{BenchmarkResult, RunMetrics};

/// Wall-clock speedup of `metrics` over `baseline` (above 1.0 is faster).
pub fn speedup(baseline: &RunMetrics, metrics: &RunMetrics) -> Option<f64> {
    (metrics.wall_clock_seconds > 0.0 && baseline.wall_clock_seconds > 0.0)
        .then(|| baseline.wall_clock_seconds / metrics.wall_clock_seconds)
}

/// Format a document for terminal display.
///
/// Speedups are relative to the `sequential` entry when there is one. CPU use
/// is also shown as a share of `cores` fully busy cores.
pub fn format_summary(benchmark: &str, result: &BenchmarkResult, cores: usize) -> String {
    let mut output = String::new();
    output.push('\n');
    output.push_str(&format!("poolbench results: {benchmark}\n"));
    output.push_str(&"=".repeat(78));
    output.push('\n');

    if result.is_empty() {
        output.push_str("  (no modes recorded)\n");
        return output;
    }

    let baseline = result.get("sequential");
    let width = result.modes().map(str::len).max().unwrap_or(10).max(10);

    output.push_str(&format!(
        "  {:<width$}  {:>10}  {:>8}  {:>6}  {:>9}  {:>11}  {:>10}\n",
        "mode", "wall (s)", "speedup", "cpu", "of cores", "memory (MB)", "contention",
    ));
    output.push_str(&format!("  {}\n", "-".repeat(width + 66)));

    let cores = cores.max(1) as f64;
    for (mode, metrics) in result.iter() {
        let speed = baseline
            .and_then(|b| speedup(b, metrics))
            .map(|s| format!("{s:.2}x"))
            .unwrap_or_else(|| "-".to_string());
        let utilization = metrics.cpu_percent as f64 / cores;
        let memory_mb = metrics.peak_memory_kb as f64 / 1024.0;
        let contention = metrics
            .contention_fraction
            .map(|f| format!("{:.1}%", f * 100.0))
            .unwrap_or_else(|| "-".to_string());

        output.push_str(&format!(
            "  {:<width$}  {:>10.3}  {:>8}  {:>5}%  {:>8.1}%  {:>11.1}  {:>10}\n",
            mode,
            metrics.wall_clock_seconds,
            speed,
            metrics.cpu_percent,
            utilization,
            memory_mb,
            contention,
        ));
    }

    if let Some((mode, best)) = result
        .iter()
        .filter(|(_, m)| m.wall_clock_seconds > 0.0)
        .min_by(|a, b| a.1.wall_clock_seconds.total_cmp(&b.1.wall_clock_seconds))
    {
        output.push('\n');
        output.push_str(&format!(
            "  fastest: {mode} ({:.3} s)\n",
            best.wall_clock_seconds
        ));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(wall: f64, cpu: u32, contention: Option<f64>) -> RunMetrics {
        RunMetrics {
            wall_clock_seconds: wall,
            cpu_percent: cpu,
            peak_memory_kb: 20_480,
            contention_fraction: contention,
        }
    }

    #[test]
    fn test_speedup() {
        let base = metrics(4.0, 100, None);
        assert_eq!(speedup(&base, &metrics(1.0, 400, None)), Some(4.0));
        assert_eq!(speedup(&base, &metrics(0.0, 0, None)), None);
    }

    #[test]
    fn test_summary_rows() {
        let mut result = BenchmarkResult::new();
        result.insert("thread", metrics(2.0, 100, Some(0.875)));
        result.insert("sequential", metrics(4.0, 100, None));
        result.insert("nogil", metrics(1.0, 400, None));

        let text = format_summary("fib", &result, 4);
        assert!(text.contains("poolbench results: fib"));

        let thread = text.lines().find(|l| l.trim_start().starts_with("thread")).unwrap();
        assert!(thread.contains("2.00x"), "{thread}");
        assert!(thread.contains("87.5%"), "{thread}");
        assert!(thread.contains("20.0"), "{thread}");

        let nogil = text.lines().find(|l| l.trim_start().starts_with("nogil")).unwrap();
        assert!(nogil.contains("4.00x"), "{nogil}");
        assert!(nogil.contains("100.0%"), "{nogil}");

        assert!(text.contains("fastest: nogil"));
    }

    #[test]
    fn test_summary_without_baseline() {
        let mut result = BenchmarkResult::new();
        result.insert("interp", metrics(1.0, 100, None));
        let text = format_summary("fib", &result, 2);
        let row = text.lines().find(|l| l.trim_start().starts_with("interp")).unwrap();
        assert!(row.contains(" - "), "{row}");
    }

    #[test]
    fn test_empty_summary() {
        let text = format_summary("fib", &BenchmarkResult::new(), 8);
        assert!(text.contains("no modes recorded"));
    }
}
