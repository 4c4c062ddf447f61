pub mod config;
pub mod engine;
pub mod error;
pub mod stats;
pub mod utils;

pub use config::{RunConfig, RunPlan, ScheduleStep};
pub use engine::control::ControlState;
pub use engine::schedule::{Phase, Schedule, Stage};
pub use engine::vu::{Exchange, Pacing, Scenario, VuContext, VuState};
pub use engine::{Orchestrator, RunMonitor, RunState};
pub use error::{AbortReason, CheckpointFailure, ConfigError};
pub use stats::report::{CheckpointSummary, RunResult};
pub use stats::threshold::{Threshold, ThresholdOutcome};
pub use stats::{Metric, MetricSource, RequestOutcome, ShardedAggregator};
pub use utils::parse_duration_str;
