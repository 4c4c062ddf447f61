//! Error types shared across the engine.
//!
//! Only configuration problems are fatal. Checkpoint failures are recorded as
//! failed outcomes and the run carries on; threshold breaches and external
//! cancellation surface as an [`AbortReason`] on the final result.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Invalid run configuration, detected before any virtual user starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("schedule has no stages")]
    EmptySchedule,

    #[error("stage {index} has a zero duration")]
    ZeroDurationStage { index: usize },

    #[error("schedule is too long to represent")]
    ScheduleTooLong,

    #[error("invalid duration '{value}' for {field}")]
    InvalidDuration { field: String, value: String },

    #[error("invalid threshold '{expression}' on metric '{metric}': {reason}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        reason: String,
    },

    #[error("no load defined: set either `stages` or `vus` with `duration`")]
    MissingLoad,

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why a single checkpoint was recorded as failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckpointFailure {
    /// The operation itself returned an error (connection refused, timeout...).
    #[error("{0}")]
    Errored(String),

    /// The operation or its check panicked.
    #[error("panicked: {0}")]
    Panicked(String),

    /// The operation completed but its check rejected the response.
    #[error("check rejected response with status {status}")]
    Rejected { status: u16 },
}

/// Reason a run ended in the `Aborted` state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    ThresholdBreach {
        metric: String,
        expression: String,
        observed: f64,
    },
    Cancelled,
    Configuration { message: String },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::ThresholdBreach {
                metric,
                expression,
                observed,
            } => write!(
                f,
                "threshold '{}' on {} breached (observed {:.4})",
                expression, metric, observed
            ),
            AbortReason::Cancelled => write!(f, "cancelled"),
            AbortReason::Configuration { message } => write!(f, "configuration error: {}", message),
        }
    }
}
