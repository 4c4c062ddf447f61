use crate::engine::RunState;
use crate::error::AbortReason;
use crate::stats::threshold::ThresholdOutcome;
use crate::stats::{AggregateSnapshot, MetricSummary, SeriesSnapshot, ITERATIONS};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Per-checkpoint latency and pass/fail breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub count: u64,
    pub passes: u64,
    pub fails: u64,
    pub avg_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl From<&SeriesSnapshot> for CheckpointSummary {
    fn from(series: &SeriesSnapshot) -> Self {
        Self {
            count: series.count(),
            passes: series.passes(),
            fails: series.failures(),
            avg_ms: series.avg(),
            p95_ms: series.percentile(95.0),
            p99_ms: series.percentile(99.0),
            max_ms: series.max(),
        }
    }
}

/// Run-level facts known only to the orchestrator.
#[derive(Debug, Clone)]
pub struct RunMeta {
    pub state: RunState,
    pub abort_reason: Option<AbortReason>,
    pub started_at: SystemTime,
    pub duration: Duration,
    pub vus_max: usize,
    pub vus_spawned: u64,
    pub drain_timed_out_vus: usize,
}

/// Final, immutable outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<AbortReason>,
    /// Unix epoch milliseconds
    pub started_at_ms: u64,
    pub duration_ms: f64,
    pub vus_max: usize,
    pub vus_spawned: u64,
    pub iterations: u64,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub checkpoints: BTreeMap<String, CheckpointSummary>,
    pub status_codes: BTreeMap<u16, u64>,
    pub errors: BTreeMap<String, u64>,
    pub thresholds: Vec<ThresholdOutcome>,
    pub drain_timed_out_vus: usize,
}

impl RunResult {
    pub fn assemble(meta: RunMeta, snapshot: &AggregateSnapshot, thresholds: Vec<ThresholdOutcome>) -> Self {
        let metrics: BTreeMap<String, MetricSummary> = snapshot
            .series()
            .map(|(name, series)| (name.to_string(), series.summary()))
            .collect();
        let checkpoints = snapshot
            .checkpoints()
            .map(|(name, series)| (name.to_string(), CheckpointSummary::from(&series)))
            .collect();
        let iterations = metrics.get(ITERATIONS).map(|m| m.count).unwrap_or(0);

        Self {
            state: meta.state,
            abort_reason: meta.abort_reason,
            started_at_ms: meta
                .started_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            duration_ms: crate::utils::duration_ms(meta.duration),
            vus_max: meta.vus_max,
            vus_spawned: meta.vus_spawned,
            iterations,
            metrics,
            checkpoints,
            status_codes: snapshot.status_codes.clone(),
            errors: snapshot.errors.clone(),
            thresholds,
            drain_timed_out_vus: meta.drain_timed_out_vus,
        }
    }

    /// Completed with every threshold passing.
    pub fn passed(&self) -> bool {
        self.state == RunState::Completed && self.thresholds.iter().all(|t| t.passed)
    }

    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdOutcome> {
        self.thresholds.iter().filter(|t| !t.passed)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize run result")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write run result to {}", path.display()))
    }
}
