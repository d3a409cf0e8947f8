//! Configuration loading from poolbench.toml
//!
//! Settings can be placed in a `poolbench.toml` file in the project root. The
//! file is discovered by walking up from the current directory; command-line
//! flags override it.

use poolbench_core::{DEFAULT_PROBE_INTERVAL, StrategyMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name searched for by [`PoolConfig::discover`]
pub const CONFIG_FILE: &str = "poolbench.toml";

/// poolbench configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PoolConfig {
    /// Driver configuration
    #[serde(default)]
    pub driver: DriverConfig,
    /// Timing and memory monitor configuration
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Contention probe configuration
    #[serde(default)]
    pub probe: ProbeConfig,
}

/// Which modes the driver attempts, and with how many workers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Mode names, in the order they are attempted
    #[serde(default = "default_modes")]
    pub modes: Vec<String>,
    /// Workers per strategy
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Directory the metrics document is written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            modes: default_modes(),
            workers: default_workers(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_modes() -> Vec<String> {
    StrategyMode::DRIVER_DEFAULT
        .iter()
        .map(|m| m.name().to_string())
        .collect()
}
fn default_workers() -> usize {
    16
}
fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

/// How each run is wrapped for timing and memory sampling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// External timing command prefixed to each run (empty = built-in)
    #[serde(default)]
    pub wrapper: Vec<String>,
    /// Interval between process-tree memory samples (e.g., "10ms")
    #[serde(default = "default_memory_interval")]
    pub memory_sample_interval: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            wrapper: Vec::new(),
            memory_sample_interval: default_memory_interval(),
        }
    }
}

fn default_memory_interval() -> String {
    "10ms".to_string()
}

/// Contention probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Interval between lock knocks (e.g., "1000us")
    #[serde(default = "default_probe_interval")]
    pub interval: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval: default_probe_interval(),
        }
    }
}

fn default_probe_interval() -> String {
    "1000us".to_string()
}

impl PoolConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Try to discover and load configuration by walking up from current directory
    pub fn discover() -> Option<Self> {
        let dir = std::env::current_dir().ok()?;
        Self::discover_from(&dir)
    }

    /// Walk up from `start` looking for [`CONFIG_FILE`].
    pub fn discover_from(start: &Path) -> Option<Self> {
        let mut dir = start.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return match Self::load(&config_path) {
                    Ok(config) => Some(config),
                    Err(e) => {
                        tracing::warn!(path = %config_path.display(), error = %e, "ignoring unreadable config");
                        None
                    }
                };
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }

    /// Configured modes, parsed.
    pub fn modes(&self) -> anyhow::Result<Vec<StrategyMode>> {
        parse_modes(self.driver.modes.iter().map(String::as_str))
    }

    /// Memory sampling interval, falling back to 10ms on a bad value.
    pub fn memory_sample_interval(&self) -> Duration {
        duration_or(&self.monitor.memory_sample_interval, Duration::from_millis(10))
    }

    /// Probe interval, falling back to the default on a bad value.
    pub fn probe_interval(&self) -> Duration {
        duration_or(&self.probe.interval, DEFAULT_PROBE_INTERVAL)
    }

    /// Generate a default configuration as TOML string
    pub fn default_toml() -> String {
        r#"# poolbench configuration

[driver]
# Modes attempted by `poolbench bench`, in order
modes = ["interp", "interp2", "interp3", "thread", "nogil", "sequential", "subprocess"]
# Workers per strategy
workers = 16
# Directory for <benchmark>.json
output_dir = "."

[monitor]
# External timing command; empty uses the built-in wrapper
# wrapper = ["/usr/bin/time", "-f", "wall_clock: %e\ncpu: %P"]
wrapper = []
# Process-tree memory sampling interval
memory_sample_interval = "10ms"

[probe]
# Contention probe knock interval
interval = "1000us"
"#
        .to_string()
    }

    /// Parse duration string (e.g., "3s", "500ms", "2m") to nanoseconds
    pub fn parse_duration(s: &str) -> anyhow::Result<u64> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("Empty duration string"));
        }

        // Find where the number ends and unit begins
        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic())
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid duration number: {}", num_part))?;
        if value < 0.0 {
            return Err(anyhow::anyhow!("Negative duration: {}", s));
        }

        let multiplier: u64 = match unit_part.to_lowercase().as_str() {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" | "" => 1_000_000_000,
            "m" | "min" => 60_000_000_000,
            _ => return Err(anyhow::anyhow!("Unknown duration unit: {}", unit_part)),
        };

        Ok((value * multiplier as f64) as u64)
    }
}

fn duration_or(s: &str, fallback: Duration) -> Duration {
    match PoolConfig::parse_duration(s) {
        Ok(0) | Err(_) => {
            tracing::warn!(value = s, ?fallback, "invalid duration in config, using fallback");
            fallback
        }
        Ok(ns) => Duration::from_nanos(ns),
    }
}

/// Parse mode names, rejecting unknown ones.
pub fn parse_modes<'a>(names: impl IntoIterator<Item = &'a str>) -> anyhow::Result<Vec<StrategyMode>> {
    names
        .into_iter()
        .map(|name| name.parse::<StrategyMode>().map_err(anyhow::Error::msg))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.driver.workers, 16);
        assert_eq!(config.modes().unwrap(), StrategyMode::DRIVER_DEFAULT.to_vec());
        assert!(config.monitor.wrapper.is_empty());
        assert_eq!(config.memory_sample_interval(), Duration::from_millis(10));
        assert_eq!(config.probe_interval(), Duration::from_micros(1000));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(PoolConfig::parse_duration("3s").unwrap(), 3_000_000_000);
        assert_eq!(PoolConfig::parse_duration("500ms").unwrap(), 500_000_000);
        assert_eq!(PoolConfig::parse_duration("1000us").unwrap(), 1_000_000);
        assert_eq!(PoolConfig::parse_duration("1000ns").unwrap(), 1000);
        assert_eq!(PoolConfig::parse_duration("2m").unwrap(), 120_000_000_000);
        assert_eq!(PoolConfig::parse_duration("1.5s").unwrap(), 1_500_000_000);
        assert!(PoolConfig::parse_duration("").is_err());
        assert!(PoolConfig::parse_duration("5 parsecs").is_err());
        assert!(PoolConfig::parse_duration("-1s").is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            [driver]
            modes = ["thread", "sequential"]
            workers = 4

            [monitor]
            wrapper = ["/usr/bin/time", "-f", "wall_clock: %e"]
        "#;

        let config: PoolConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.modes().unwrap(),
            vec![StrategyMode::Thread, StrategyMode::Sequential]
        );
        assert_eq!(config.driver.workers, 4);
        assert_eq!(config.monitor.wrapper.len(), 3);
        // Defaults should still apply
        assert_eq!(config.probe.interval, "1000us");
        assert_eq!(config.driver.output_dir, PathBuf::from("."));
    }

    #[test]
    fn test_bad_values() {
        let config: PoolConfig = toml::from_str(
            r#"
            [driver]
            modes = ["thread", "greenlet"]
            [probe]
            interval = "often"
        "#,
        )
        .unwrap();
        assert!(config.modes().is_err());
        assert_eq!(config.probe_interval(), DEFAULT_PROBE_INTERVAL);
    }

    #[test]
    fn test_default_toml_parses() {
        let config: PoolConfig = toml::from_str(&PoolConfig::default_toml()).unwrap();
        assert_eq!(config.driver.workers, 16);
        assert_eq!(config.modes().unwrap().len(), 7);
    }

    #[test]
    fn test_discover_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[driver]\nworkers = 3\n",
        )
        .unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let config = PoolConfig::discover_from(&nested).unwrap();
        assert_eq!(config.driver.workers, 3);
    }
}
