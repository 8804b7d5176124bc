//! Metric extraction from sysbench's report.
//!
//! Best effort: each label takes the first value that matches its pattern,
//! labels that never match are left out. Nothing here rejects output.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static METRIC_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(min|avg|max|95th percentile):\s+(\d+\.\d+)").expect("metric regex is valid")
});

/// Latency figures reported by sysbench, kept as printed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchMetrics {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub min: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub avg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max: Option<String>,
    #[serde(
        rename = "95th percentile",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub p95: Option<String>,
}

impl BenchMetrics {
    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.avg.is_none() && self.max.is_none() && self.p95.is_none()
    }

    fn slot(&mut self, label: &str) -> Option<&mut Option<String>> {
        match label {
            "min" => Some(&mut self.min),
            "avg" => Some(&mut self.avg),
            "max" => Some(&mut self.max),
            "95th percentile" => Some(&mut self.p95),
            _ => None,
        }
    }
}

pub fn parse_metrics(output: &str) -> BenchMetrics {
    let mut metrics = BenchMetrics::default();

    for line in output.lines() {
        let Some(caps) = METRIC_LINE.captures(line.trim()) else {
            continue;
        };
        if let Some(slot) = metrics.slot(&caps[1]) {
            if slot.is_none() {
                *slot = Some(caps[2].to_string());
            }
        }
    }

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
SQL statistics:
    queries performed:
        read:                            1200
Latency (ms):
         min:                                    1.02
         avg:                                   12.34
         max:                                  101.50
         95th percentile:                       45.67
         sum:                                 9876.00
";

    #[test]
    fn parses_full_report() {
        let metrics = parse_metrics(REPORT);
        assert_eq!(metrics.min.as_deref(), Some("1.02"));
        assert_eq!(metrics.avg.as_deref(), Some("12.34"));
        assert_eq!(metrics.max.as_deref(), Some("101.50"));
        assert_eq!(metrics.p95.as_deref(), Some("45.67"));
    }

    #[test]
    fn missing_labels_are_absent() {
        let metrics = parse_metrics("avg: 12.34\n95th percentile: 45.67\n");
        assert_eq!(
            serde_json::to_value(&metrics).unwrap(),
            serde_json::json!({"avg": "12.34", "95th percentile": "45.67"})
        );
    }

    #[test]
    fn first_match_wins() {
        let metrics = parse_metrics("avg: 1.50\navg: 2.50\n");
        assert_eq!(metrics.avg.as_deref(), Some("1.50"));
    }

    #[test]
    fn integers_and_noise_do_not_match() {
        let metrics = parse_metrics("avg: 12\nqueries avg: 3.0\nmaximum: 4.0\n");
        assert!(metrics.is_empty());
    }
}
