use crate::engine::schedule::{Schedule, Stage};
use crate::engine::vu::Pacing;
use crate::error::ConfigError;
use crate::stats::threshold::Threshold;
use crate::utils::parse_config_duration;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONTROL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_ABORT_GRACE_SAMPLES: u64 = 50;
pub const DEFAULT_USER_AGENT: &str = concat!("volley/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct ScheduleStep {
    pub duration: String,
    pub target: usize,
}

impl ScheduleStep {
    pub fn new(duration: &str, target: usize) -> Self {
        Self {
            duration: duration.to_string(),
            target,
        }
    }
}

/// Run configuration as written by users (YAML or JSON).
///
/// Durations are strings such as `"30s"`, `"500ms"`, `"1m"`. Keys accept the
/// camelCase spellings common in load-test scripts (`abortOnFail`,
/// `gracefulStop`, `startVUs`...).
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
pub struct RunConfig {
    /// Ramping schedule (stages)
    #[serde(alias = "schedule")]
    pub stages: Option<Vec<ScheduleStep>>,
    /// VU count in force before the first stage (default 0)
    #[serde(alias = "startVUs", alias = "startVus")]
    pub start_vus: Option<usize>,
    /// Constant-load shortcut: number of VUs, used with `duration` when no stages are set
    pub vus: Option<usize>,
    /// Constant-load shortcut: duration of the run
    pub duration: Option<String>,
    /// Pass/fail criteria: metric name to list of expressions (e.g. `p(95)<500`)
    #[serde(alias = "criteria")]
    pub thresholds: Option<BTreeMap<String, Vec<String>>>,
    /// Pause after every iteration of every VU
    #[serde(alias = "perVuSleep")]
    pub sleep: Option<String>,
    /// Minimum start-to-start time per iteration
    #[serde(alias = "minIterationDuration")]
    pub min_iteration_duration: Option<String>,
    /// Abort the run as soon as a threshold fails
    #[serde(alias = "abortOnFail")]
    pub abort_on_fail: Option<bool>,
    /// Samples a metric needs before its threshold may abort the run
    #[serde(alias = "abortGraceSamples")]
    pub abort_grace_samples: Option<u64>,
    /// How long to wait for VUs to finish their iteration once the run ends
    #[serde(alias = "drainTimeout", alias = "gracefulStop", alias = "stop")]
    pub drain_timeout: Option<String>,
    /// Orchestrator tick: how often the schedule and thresholds are checked
    #[serde(alias = "controlInterval")]
    pub control_interval: Option<String>,
    /// Aggregator shard count (default scales with the peak VU count)
    pub shards: Option<usize>,
    /// User-Agent header for the shared HTTP client
    #[serde(alias = "userAgent")]
    pub user_agent: Option<String>,
    /// Per-request timeout of the shared HTTP client
    #[serde(alias = "requestTimeout")]
    pub request_timeout: Option<String>,
}

/// Validated, typed form of a [`RunConfig`].
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub schedule: Schedule,
    pub thresholds: Vec<Threshold>,
    pub pacing: Pacing,
    pub abort_on_fail: bool,
    pub abort_grace_samples: u64,
    pub drain_timeout: Duration,
    pub control_interval: Duration,
    pub shards: Option<usize>,
    pub user_agent: String,
    pub request_timeout: Duration,
}

fn optional_duration(field: &str, value: &Option<String>) -> Result<Option<Duration>, ConfigError> {
    value
        .as_deref()
        .map(|v| parse_config_duration(field, v))
        .transpose()
}

impl RunConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load a config file: JSON when the extension is `.json`, YAML otherwise.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }

    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(RunConfig)
    }

    fn schedule(&self) -> Result<Schedule, ConfigError> {
        if let Some(steps) = &self.stages {
            let stages = steps
                .iter()
                .enumerate()
                .map(|(i, step)| {
                    parse_config_duration(&format!("stages[{}].duration", i), &step.duration)
                        .map(|d| Stage::new(d, step.target))
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Schedule::new(self.start_vus.unwrap_or(0), stages);
        }
        match (&self.duration, self.vus) {
            (Some(duration), vus) => {
                let duration = parse_config_duration("duration", duration)?;
                Schedule::constant(vus.unwrap_or(1), duration)
            }
            (None, _) => Err(ConfigError::MissingLoad),
        }
    }

    /// Validate everything and convert to typed values.
    pub fn plan(&self) -> Result<RunPlan, ConfigError> {
        let schedule = self.schedule()?;
        let thresholds = match &self.thresholds {
            Some(table) => Threshold::parse_table(table)?,
            None => Vec::new(),
        };

        let control_interval =
            optional_duration("controlInterval", &self.control_interval)?.unwrap_or(DEFAULT_CONTROL_INTERVAL);
        if control_interval.is_zero() {
            return Err(ConfigError::InvalidDuration {
                field: "controlInterval".to_string(),
                value: self.control_interval.clone().unwrap_or_default(),
            });
        }

        Ok(RunPlan {
            schedule,
            thresholds,
            pacing: Pacing {
                iteration_sleep: optional_duration("sleep", &self.sleep)?.unwrap_or_default(),
                min_iteration_duration: optional_duration("minIterationDuration", &self.min_iteration_duration)?,
            },
            abort_on_fail: self.abort_on_fail.unwrap_or(false),
            abort_grace_samples: self.abort_grace_samples.unwrap_or(DEFAULT_ABORT_GRACE_SAMPLES),
            drain_timeout: optional_duration("drainTimeout", &self.drain_timeout)?.unwrap_or(DEFAULT_DRAIN_TIMEOUT),
            control_interval,
            shards: self.shards.filter(|&s| s > 0),
            user_agent: self
                .user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            request_timeout: optional_duration("requestTimeout", &self.request_timeout)?
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        })
    }
}
