//! Pass/fail rules over aggregated metrics.
//!
//! Expressions follow the familiar `p(95)<500` / `rate < 0.01` form: a
//! statistic selector, a comparison operator and a numeric bound with an
//! optional `ms` or `s` unit. Everything is parsed up front so a typo fails
//! the run before any VU starts.

use super::{MetricKind, MetricSource, SeriesSnapshot};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selector {
    Rate,
    Percentile(f64),
    Avg,
    Min,
    Max,
    Med,
    Count,
    Sum,
}

impl Selector {
    fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        let selector = match s {
            "rate" => Selector::Rate,
            "avg" => Selector::Avg,
            "min" => Selector::Min,
            "max" => Selector::Max,
            "med" => Selector::Med,
            "count" => Selector::Count,
            "sum" => Selector::Sum,
            _ => {
                let inner = s
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .or_else(|| s.strip_prefix('p'))
                    .ok_or_else(|| format!("unknown statistic '{}'", s))?;
                let p: f64 = inner
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid percentile '{}'", s))?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(format!("percentile {} out of range 0-100", p));
                }
                Selector::Percentile(p)
            }
        };
        Ok(selector)
    }

    pub fn observe(&self, series: &SeriesSnapshot) -> f64 {
        match self {
            Selector::Rate => series.rate(),
            Selector::Percentile(p) => series.percentile(*p),
            Selector::Avg => series.avg(),
            Selector::Min => series.min(),
            Selector::Max => series.max(),
            Selector::Med => series.median(),
            Selector::Count => series.count() as f64,
            Selector::Sum => series.sum(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl Comparison {
    pub fn holds(&self, observed: f64, bound: f64) -> bool {
        match self {
            Comparison::Lt => observed < bound,
            Comparison::Le => observed <= bound,
            Comparison::Gt => observed > bound,
            Comparison::Ge => observed >= bound,
            Comparison::Eq => (observed - bound).abs() < f64::EPSILON,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Eq => "==",
        };
        f.write_str(op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Predicate {
    pub selector: Selector,
    pub op: Comparison,
    pub bound: f64,
}

impl Predicate {
    pub fn parse(expression: &str) -> Result<Self, String> {
        // Two-character operators first so "<=" is not read as "<".
        const OPERATORS: [(&str, Comparison); 5] = [
            ("<=", Comparison::Le),
            (">=", Comparison::Ge),
            ("==", Comparison::Eq),
            ("<", Comparison::Lt),
            (">", Comparison::Gt),
        ];
        let (at, token, op) = OPERATORS
            .iter()
            .filter_map(|(token, op)| expression.find(token).map(|at| (at, *token, *op)))
            .min_by_key(|(at, token, _)| (*at, std::cmp::Reverse(token.len())))
            .ok_or_else(|| "missing comparison operator".to_string())?;

        let selector = Selector::parse(&expression[..at])?;
        let bound = parse_bound(&expression[at + token.len()..])?;
        Ok(Self {
            selector,
            op,
            bound,
        })
    }

    pub fn check(&self, series: &SeriesSnapshot) -> (f64, bool) {
        let observed = self.selector.observe(series);
        (observed, self.op.holds(observed, self.bound))
    }
}

/// Numeric bound with an optional time unit; seconds are scaled to milliseconds.
fn parse_bound(s: &str) -> Result<f64, String> {
    let s = s.trim();
    let (number, scale) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1.0)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1000.0)
    } else {
        (s, 1.0)
    };
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid bound '{}'", s))?;
    if !value.is_finite() {
        return Err(format!("invalid bound '{}'", s));
    }
    Ok(value * scale)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: String,
    pub expression: String,
    pub predicate: Predicate,
}

impl Threshold {
    pub fn parse(metric: &str, expression: &str) -> Result<Self, ConfigError> {
        let metric = metric.trim();
        let invalid = |reason: String| ConfigError::InvalidThreshold {
            metric: metric.to_string(),
            expression: expression.to_string(),
            reason,
        };
        if metric.is_empty() {
            return Err(invalid("empty metric name".to_string()));
        }
        let predicate = Predicate::parse(expression).map_err(invalid)?;
        Ok(Self {
            metric: metric.to_string(),
            expression: expression.trim().to_string(),
            predicate,
        })
    }

    /// Parse a `{metric: [expressions]}` table. Output order is stable (by metric).
    pub fn parse_table(table: &BTreeMap<String, Vec<String>>) -> Result<Vec<Self>, ConfigError> {
        table
            .iter()
            .flat_map(|(metric, exprs)| exprs.iter().map(move |e| Self::parse(metric, e)))
            .collect()
    }

    pub fn evaluate<S: MetricSource + ?Sized>(&self, source: &S) -> ThresholdOutcome {
        let series = source
            .query(&self.metric)
            .unwrap_or_else(|| SeriesSnapshot::empty(MetricKind::Trend));
        let (observed, passed) = self.predicate.check(&series);
        ThresholdOutcome {
            metric: self.metric.clone(),
            expression: self.expression.clone(),
            observed,
            passed,
            samples: series.count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOutcome {
    pub metric: String,
    pub expression: String,
    pub observed: f64,
    pub passed: bool,
    pub samples: u64,
}

/// Evaluate every threshold against the source, in order.
pub fn evaluate<S: MetricSource + ?Sized>(thresholds: &[Threshold], source: &S) -> Vec<ThresholdOutcome> {
    thresholds.iter().map(|t| t.evaluate(source)).collect()
}

/// First failing threshold whose metric has at least `min_samples` samples.
pub fn first_breach<S: MetricSource + ?Sized>(
    thresholds: &[Threshold],
    source: &S,
    min_samples: u64,
) -> Option<ThresholdOutcome> {
    thresholds
        .iter()
        .map(|t| t.evaluate(source))
        .find(|o| !o.passed && o.samples >= min_samples.max(1))
}
