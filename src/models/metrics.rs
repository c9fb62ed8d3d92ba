use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::dsl_model::Stage;
use crate::utils::hardware::HostInfo;

/// Hits over samples, kept as counts so the ratio is computed once from
/// integers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rate {
    pub hits: u64,
    pub total: u64,
}

impl Rate {
    pub fn add(&mut self, hit: bool) {
        self.total += 1;
        if hit {
            self.hits += 1;
        }
    }

    /// 0.0 when nothing has been recorded.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.hits as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckCount {
    pub passes: u64,
    pub fails: u64,
}

/// Latency distribution in milliseconds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct LatencySummary {
    pub fastest_response: f64,
    pub slowest_response: f64,
    pub mean_response_time: f64,
    pub median_response_time: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Point-in-time view of the aggregate state.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub error_rate: f64,
    pub active_vus: u64,
    pub latency: LatencySummary,
    pub checks: BTreeMap<String, CheckCount>,
    pub status_counts: BTreeMap<String, u64>,
    pub rates: BTreeMap<String, Rate>,
    pub finalized: bool,
}

/// Final report of a run.
#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    pub name: String,
    pub target_url: String,
    pub http_method: String,
    pub stages: Vec<Stage>,
    pub max_vus: u64,
    pub elapsed_secs: f64,
    pub throughput: f64,
    pub timestamp: String,
    pub host: HostInfo,
    pub summary: Summary,
    /// Configured error-rate threshold, if any.
    pub error_threshold: Option<f64>,
}

impl Metrics {
    pub fn error_rate(&self) -> f64 {
        self.summary.error_rate
    }

    /// True when the run exceeded its configured error-rate threshold.
    pub fn degraded(&self) -> bool {
        self.error_threshold
            .map(|limit| self.summary.error_rate > limit)
            .unwrap_or(false)
    }
}
