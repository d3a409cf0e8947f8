//! Report Data Structures

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Resource usage of one measured run.
///
/// Field names on disk are the stable keys the visualization step reads.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Elapsed wall time of the run, in seconds
    #[serde(rename = "wall_clock")]
    pub wall_clock_seconds: f64,
    /// CPU time as a percentage of wall time (may exceed 100)
    #[serde(rename = "cpu")]
    pub cpu_percent: u32,
    /// Peak resident memory of the whole process tree, in kB
    #[serde(rename = "vmpeak")]
    pub peak_memory_kb: u64,
    /// Fraction of wall time spent waiting on the execution lock
    #[serde(
        rename = "gilknocker",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub contention_fraction: Option<f64>,
}

/// Metrics for every attempted mode of one benchmark, in attempted order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BenchmarkResult {
    entries: Vec<(String, RunMetrics)>,
}

impl BenchmarkResult {
    /// Empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `metrics` under `mode`. A repeated mode replaces the earlier
    /// entry in place, so keys stay unique and keep their first position.
    pub fn insert(&mut self, mode: impl Into<String>, metrics: RunMetrics) {
        let mode = mode.into();
        match self.entries.iter_mut().find(|(key, _)| *key == mode) {
            Some((_, slot)) => *slot = metrics,
            None => self.entries.push((mode, metrics)),
        }
    }

    /// Metrics recorded for `mode`.
    pub fn get(&self, mode: &str) -> Option<&RunMetrics> {
        self.entries
            .iter()
            .find(|(key, _)| key == mode)
            .map(|(_, metrics)| metrics)
    }

    /// Modes in attempted order.
    pub fn modes(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// Entries in attempted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RunMetrics)> {
        self.entries.iter().map(|(key, metrics)| (key.as_str(), metrics))
    }

    /// Number of recorded modes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no mode has been recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for BenchmarkResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (mode, metrics) in &self.entries {
            map.serialize_entry(mode, metrics)?;
        }
        map.end()
    }
}

struct ResultVisitor;

impl<'de> Visitor<'de> for ResultVisitor {
    type Value = BenchmarkResult;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map from mode name to run metrics")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut result = BenchmarkResult::new();
        while let Some((mode, metrics)) = access.next_entry::<String, RunMetrics>()? {
            if result.get(&mode).is_some() {
                return Err(serde::de::Error::custom(format!("duplicate mode '{mode}'")));
            }
            result.entries.push((mode, metrics));
        }
        Ok(result)
    }
}

impl<'de> Deserialize<'de> for BenchmarkResult {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(ResultVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(wall: f64) -> RunMetrics {
        RunMetrics {
            wall_clock_seconds: wall,
            cpu_percent: 99,
            peak_memory_kb: 2048,
            contention_fraction: None,
        }
    }

    #[test]
    fn test_insert_keeps_order_and_uniqueness() {
        let mut result = BenchmarkResult::new();
        result.insert("thread", metrics(2.0));
        result.insert("sequential", metrics(1.0));
        result.insert("thread", metrics(3.0));

        assert_eq!(result.modes().collect::<Vec<_>>(), ["thread", "sequential"]);
        assert_eq!(result.get("thread").unwrap().wall_clock_seconds, 3.0);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_serialized_keys() {
        let m = RunMetrics {
            contention_fraction: Some(0.25),
            ..metrics(1.5)
        };
        let json = serde_json::to_value(m).unwrap();
        assert_eq!(json["wall_clock"], 1.5);
        assert_eq!(json["cpu"], 99);
        assert_eq!(json["vmpeak"], 2048);
        assert_eq!(json["gilknocker"], 0.25);

        let without = serde_json::to_value(metrics(1.5)).unwrap();
        assert!(without.get("gilknocker").is_none());
    }

    #[test]
    fn test_map_preserves_attempted_order() {
        let mut result = BenchmarkResult::new();
        for mode in ["interp", "thread", "nogil", "sequential"] {
            result.insert(mode, metrics(1.0));
        }
        let json = serde_json::to_string(&result).unwrap();
        let positions: Vec<_> = ["interp", "thread", "nogil", "sequential"]
            .iter()
            .map(|m| json.find(&format!("\"{m}\"")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{json}");

        let back: BenchmarkResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let json = r#"{"thread": {"wall_clock": 1.0, "cpu": 1, "vmpeak": 1},
                       "thread": {"wall_clock": 2.0, "cpu": 1, "vmpeak": 1}}"#;
        assert!(serde_json::from_str::<BenchmarkResult>(json).is_err());
    }
}
