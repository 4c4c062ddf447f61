use crate::utils::duration_ms;
use hdrhistogram::Histogram;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, SystemTime};

pub mod report;
pub mod threshold;

pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const CHECKS: &str = "checks";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const ITERATIONS: &str = "iterations";

/// Values are stored in the histogram as thousandths (microseconds for ms trends).
const VALUE_SCALE: f64 = 1000.0;
/// One hour in microseconds; longer timings saturate.
const HISTOGRAM_HIGHEST: u64 = 60 * 60 * 1000 * 1000;
/// Two significant digits: at most 1% relative error on any percentile.
const HISTOGRAM_SIGFIG: u8 = 2;
/// Distinct error messages kept per shard before folding into `other`.
pub const MAX_ERROR_KEYS: usize = 64;
const OVERFLOW_ERROR_KEY: &str = "other";

fn timing_histogram() -> Histogram<u64> {
    Histogram::<u64>::new_with_bounds(1, HISTOGRAM_HIGHEST, HISTOGRAM_SIGFIG)
        .expect("histogram bounds are constant and valid")
}

/// Custom metrics have no natural unit, so their range grows with the data.
fn growing_histogram() -> Histogram<u64> {
    let mut histogram =
        Histogram::<u64>::new(HISTOGRAM_SIGFIG).expect("histogram precision is constant and valid");
    histogram.auto(true);
    histogram
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Protocol status code (HTTP status for the bundled client)
    Code(u16),
    /// The operation never produced a status
    Error(String),
}

/// Result of one checkpoint inside one iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestOutcome {
    pub name: String,
    pub status: OutcomeStatus,
    pub success: bool,
    pub duration: Duration,
    pub timestamp: SystemTime,
}

impl RequestOutcome {
    pub fn new(name: impl Into<String>, status: OutcomeStatus, success: bool, duration: Duration) -> Self {
        Self {
            name: name.into(),
            status,
            success,
            duration,
            timestamp: SystemTime::now(),
        }
    }

    pub fn failed(name: impl Into<String>, error: impl Into<String>, duration: Duration) -> Self {
        Self::new(name, OutcomeStatus::Error(error.into()), false, duration)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Metric {
    Request(RequestOutcome),
    Iteration { duration: Duration, success: bool },
    // Custom Metrics
    Rate { name: String, success: bool },
    Trend { name: String, value: f64 },
    Counter { name: String, value: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Trend,
    Rate,
    Counter,
}

/// Bounded-memory accumulator behind one named metric.
///
/// `passes` counts samples whose flag was true: successful requests for
/// trends, observed-true values for rates.
#[derive(Clone)]
pub struct MetricSeries {
    kind: MetricKind,
    count: u64,
    passes: u64,
    sum: f64,
    min: f64,
    max: f64,
    histogram: Histogram<u64>,
}

impl MetricSeries {
    fn with_histogram(kind: MetricKind, histogram: Histogram<u64>) -> Self {
        Self {
            kind,
            count: 0,
            passes: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            histogram,
        }
    }

    /// Series for a user-defined metric; accepts any magnitude.
    pub fn new(kind: MetricKind) -> Self {
        Self::with_histogram(kind, growing_histogram())
    }

    /// Millisecond timing series with a fixed one-hour histogram range.
    pub fn timing() -> Self {
        Self::with_histogram(MetricKind::Trend, timing_histogram())
    }

    /// Same kind and histogram range, no samples.
    fn empty_like(&self) -> Self {
        let mut histogram = self.histogram.clone();
        histogram.reset();
        Self::with_histogram(self.kind, histogram)
    }

    pub fn record(&mut self, value: f64, pass: bool) {
        let value = if value.is_finite() { value } else { 0.0 };
        self.count += 1;
        if pass {
            self.passes += 1;
        }
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);

        // The histogram only holds non-negative values; percentiles are
        // clamped back into [min, max] when read.
        let scaled = (value.max(0.0) * VALUE_SCALE).round() as u64;
        if self.histogram.record(scaled).is_err() {
            self.histogram.saturating_record(scaled);
        }
    }

    pub fn record_flag(&mut self, flag: bool) {
        self.record(if flag { 1.0 } else { 0.0 }, flag);
    }

    pub fn merge(&mut self, other: &MetricSeries) {
        if other.count == 0 {
            return;
        }
        self.count += other.count;
        self.passes += other.passes;
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        if self.histogram.add(&other.histogram).is_err() {
            for bucket in other.histogram.iter_recorded() {
                self.histogram
                    .saturating_record_n(bucket.value_iterated_to(), bucket.count_at_value());
            }
        }
    }

    pub fn snapshot(&self) -> SeriesSnapshot {
        SeriesSnapshot(self.clone())
    }
}

/// Read-only copy of a metric series at query time.
#[derive(Clone)]
pub struct SeriesSnapshot(MetricSeries);

impl SeriesSnapshot {
    pub fn empty(kind: MetricKind) -> Self {
        Self(match kind {
            MetricKind::Trend => MetricSeries::timing(),
            kind => MetricSeries::new(kind),
        })
    }

    pub fn kind(&self) -> MetricKind {
        self.0.kind
    }

    pub fn count(&self) -> u64 {
        self.0.count
    }

    pub fn passes(&self) -> u64 {
        self.0.passes
    }

    pub fn failures(&self) -> u64 {
        self.0.count - self.0.passes
    }

    /// Fraction of samples whose flag was true.
    pub fn rate(&self) -> f64 {
        if self.0.count == 0 {
            0.0
        } else {
            self.0.passes as f64 / self.0.count as f64
        }
    }

    pub fn sum(&self) -> f64 {
        self.0.sum
    }

    pub fn avg(&self) -> f64 {
        if self.0.count == 0 {
            0.0
        } else {
            self.0.sum / self.0.count as f64
        }
    }

    pub fn min(&self) -> f64 {
        if self.0.count == 0 { 0.0 } else { self.0.min }
    }

    pub fn max(&self) -> f64 {
        if self.0.count == 0 { 0.0 } else { self.0.max }
    }

    /// Nearest-rank percentile, `p` in 0..=100.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.0.count == 0 {
            return 0.0;
        }
        let q = (p / 100.0).clamp(0.0, 1.0);
        let raw = self.0.histogram.value_at_quantile(q) as f64 / VALUE_SCALE;
        raw.clamp(self.min(), self.max())
    }

    pub fn median(&self) -> f64 {
        self.percentile(50.0)
    }

    pub fn summary(&self) -> MetricSummary {
        MetricSummary {
            kind: self.kind(),
            count: self.count(),
            rate: self.rate(),
            sum: self.sum(),
            avg: self.avg(),
            min: self.min(),
            max: self.max(),
            med: self.median(),
            p90: self.percentile(90.0),
            p95: self.percentile(95.0),
            p99: self.percentile(99.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub kind: MetricKind,
    pub count: u64,
    pub rate: f64,
    pub sum: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub med: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Anything thresholds can be evaluated against.
pub trait MetricSource {
    fn query(&self, name: &str) -> Option<SeriesSnapshot>;
}

/// Single-lock aggregator; one of these lives behind each shard.
#[derive(Default)]
pub struct StatsAggregator {
    series: HashMap<String, MetricSeries>,
    checkpoints: HashMap<String, MetricSeries>,
    status_codes: HashMap<u16, u64>,
    errors: HashMap<String, u64>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn series_mut(&mut self, name: &str, kind: MetricKind) -> &mut MetricSeries {
        self.series
            .entry(name.to_string())
            .or_insert_with(|| MetricSeries::new(kind))
    }

    fn timing_mut(&mut self, name: &str) -> &mut MetricSeries {
        self.series
            .entry(name.to_string())
            .or_insert_with(MetricSeries::timing)
    }

    pub fn add(&mut self, metric: Metric) {
        match metric {
            Metric::Request(outcome) => {
                let ms = duration_ms(outcome.duration);
                self.timing_mut(HTTP_REQ_DURATION).record(ms, outcome.success);
                self.series_mut(HTTP_REQ_FAILED, MetricKind::Rate)
                    .record_flag(!outcome.success);
                self.series_mut(CHECKS, MetricKind::Rate)
                    .record_flag(outcome.success);
                self.checkpoints
                    .entry(outcome.name)
                    .or_insert_with(MetricSeries::timing)
                    .record(ms, outcome.success);

                match outcome.status {
                    OutcomeStatus::Code(code) => {
                        *self.status_codes.entry(code).or_insert(0) += 1;
                    }
                    OutcomeStatus::Error(err) => self.count_error(err),
                }
            }
            Metric::Iteration { duration, success } => {
                self.timing_mut(ITERATION_DURATION)
                    .record(duration_ms(duration), success);
                self.series_mut(ITERATIONS, MetricKind::Counter)
                    .record(1.0, true);
            }
            Metric::Rate { name, success } => {
                self.series_mut(&name, MetricKind::Rate).record_flag(success);
            }
            Metric::Trend { name, value } => {
                self.series_mut(&name, MetricKind::Trend).record(value, true);
            }
            Metric::Counter { name, value } => {
                self.series_mut(&name, MetricKind::Counter).record(value, true);
            }
        }
    }

    fn count_error(&mut self, err: String) {
        let key = if self.errors.contains_key(&err) || self.errors.len() < MAX_ERROR_KEYS {
            err
        } else {
            OVERFLOW_ERROR_KEY.to_string()
        };
        *self.errors.entry(key).or_insert(0) += 1;
    }

    fn merge_into(&self, merged: &mut AggregateSnapshot) {
        for (name, series) in &self.series {
            merged
                .series
                .entry(name.clone())
                .or_insert_with(|| series.empty_like())
                .merge(series);
        }
        for (name, series) in &self.checkpoints {
            merged
                .checkpoints
                .entry(name.clone())
                .or_insert_with(|| series.empty_like())
                .merge(series);
        }
        for (code, count) in &self.status_codes {
            *merged.status_codes.entry(*code).or_insert(0) += count;
        }
        for (err, count) in &self.errors {
            *merged.errors.entry(err.clone()).or_insert(0) += count;
        }
    }
}

impl MetricSource for StatsAggregator {
    fn query(&self, name: &str) -> Option<SeriesSnapshot> {
        self.series.get(name).map(MetricSeries::snapshot)
    }
}

/// Everything the aggregator held at one instant, merged across shards.
#[derive(Clone, Default)]
pub struct AggregateSnapshot {
    series: BTreeMap<String, MetricSeries>,
    checkpoints: BTreeMap<String, MetricSeries>,
    pub status_codes: BTreeMap<u16, u64>,
    pub errors: BTreeMap<String, u64>,
}

impl AggregateSnapshot {
    pub fn series(&self) -> impl Iterator<Item = (&str, SeriesSnapshot)> + '_ {
        self.series.iter().map(|(k, v)| (k.as_str(), v.snapshot()))
    }

    pub fn checkpoints(&self) -> impl Iterator<Item = (&str, SeriesSnapshot)> + '_ {
        self.checkpoints.iter().map(|(k, v)| (k.as_str(), v.snapshot()))
    }
}

impl MetricSource for AggregateSnapshot {
    fn query(&self, name: &str) -> Option<SeriesSnapshot> {
        self.series.get(name).map(MetricSeries::snapshot)
    }
}

/// Sharded aggregator for reduced lock contention at high concurrency.
///
/// Writers pick a shard by `shard_hint % num_shards` (the VU id), so one VU's
/// samples land in one shard in order. Readers lock each shard only long
/// enough to copy or merge a fixed-size series. Once sealed, every further
/// write is dropped.
pub struct ShardedAggregator {
    shards: Vec<Mutex<StatsAggregator>>,
    sealed: RwLock<bool>,
}

impl ShardedAggregator {
    pub fn new(num_shards: usize) -> Self {
        let shards = (0..num_shards.max(1))
            .map(|_| Mutex::new(StatsAggregator::new()))
            .collect();
        Self {
            shards,
            sealed: RwLock::new(false),
        }
    }

    /// Shard count for a run peaking at `max_vus`: roughly 100 VUs per shard.
    pub fn for_vus(max_vus: usize) -> Self {
        Self::new((max_vus / 100).clamp(16, 256))
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn append(&self, shard_hint: u64, outcome: RequestOutcome) -> bool {
        self.add(shard_hint, Metric::Request(outcome))
    }

    pub fn add(&self, shard_hint: u64, metric: Metric) -> bool {
        self.add_batch(shard_hint, std::iter::once(metric))
    }

    /// Append a batch atomically with respect to `seal`: either every metric
    /// lands, in order, or none does. Returns false when sealed.
    pub fn add_batch<I>(&self, shard_hint: u64, metrics: I) -> bool
    where
        I: IntoIterator<Item = Metric>,
    {
        let sealed = self.sealed.read();
        if *sealed {
            return false;
        }
        let idx = (shard_hint % self.shards.len() as u64) as usize;
        let mut shard = self.shards[idx].lock();
        for metric in metrics {
            shard.add(metric);
        }
        true
    }

    /// Stop accepting writes. Waits for in-progress batches to finish.
    pub fn seal(&self) {
        *self.sealed.write() = true;
    }

    pub fn is_sealed(&self) -> bool {
        *self.sealed.read()
    }

    /// Merge all shards into a single snapshot for reporting.
    pub fn snapshot(&self) -> AggregateSnapshot {
        let mut merged = AggregateSnapshot::default();
        for shard in &self.shards {
            shard.lock().merge_into(&mut merged);
        }
        merged
    }
}

impl MetricSource for ShardedAggregator {
    fn query(&self, name: &str) -> Option<SeriesSnapshot> {
        let mut merged: Option<MetricSeries> = None;
        for shard in &self.shards {
            let part = shard.lock().series.get(name).cloned();
            if let Some(part) = part {
                match merged.as_mut() {
                    Some(m) => m.merge(&part),
                    None => merged = Some(part),
                }
            }
        }
        merged.map(SeriesSnapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn outcome(name: &str, ms: u64, success: bool) -> RequestOutcome {
        let status = if success {
            OutcomeStatus::Code(200)
        } else {
            OutcomeStatus::Code(500)
        };
        RequestOutcome::new(name, status, success, Duration::from_millis(ms))
    }

    /// Exact nearest-rank percentile over a sorted copy.
    fn nearest_rank(samples: &[f64], p: f64) -> f64 {
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let rank = ((p / 100.0) * sorted.len() as f64).ceil().max(1.0) as usize;
        sorted[rank - 1]
    }

    #[test]
    fn test_aggregator_math() {
        let mut agg = StatsAggregator::new();
        agg.add(Metric::Request(outcome("test", 100, true)));
        agg.add(Metric::Request(outcome("test", 200, true)));

        let durations = agg.query(HTTP_REQ_DURATION).unwrap();
        assert_eq!(durations.count(), 2);
        assert_eq!(durations.sum(), 300.0);
        assert_eq!(durations.min(), 100.0);
        assert_eq!(durations.max(), 200.0);
        assert_eq!(durations.avg(), 150.0);
        assert_eq!(agg.status_codes[&200], 2);
    }

    #[test]
    fn test_failed_outcomes_feed_rates() {
        let mut agg = StatsAggregator::new();
        for i in 0..100 {
            agg.add(Metric::Request(outcome("api", 10, i % 25 != 0)));
        }
        let failed = agg.query(HTTP_REQ_FAILED).unwrap();
        assert_eq!(failed.count(), 100);
        assert!((failed.rate() - 0.04).abs() < 1e-12);
        let checks = agg.query(CHECKS).unwrap();
        assert!((checks.rate() - 0.96).abs() < 1e-12);
    }

    #[test]
    fn test_errors_are_counted_and_capped() {
        let mut agg = StatsAggregator::new();
        agg.add(Metric::Request(RequestOutcome::failed(
            "login",
            "Timeout",
            Duration::from_millis(10),
        )));
        assert_eq!(agg.errors["Timeout"], 1);

        for i in 0..(MAX_ERROR_KEYS + 10) {
            agg.add(Metric::Request(RequestOutcome::failed(
                "login",
                format!("error {}", i),
                Duration::from_millis(1),
            )));
        }
        assert_eq!(agg.errors.len(), MAX_ERROR_KEYS + 1);
        assert_eq!(agg.errors[OVERFLOW_ERROR_KEY], 11);
    }

    #[test]
    fn test_percentiles_match_nearest_rank() {
        let mut agg = StatsAggregator::new();
        let samples: Vec<f64> = (1..=1000).map(|i| (i * 7 % 1000 + 1) as f64).collect();
        for v in &samples {
            agg.add(Metric::Trend {
                name: "latency".to_string(),
                value: *v,
            });
        }
        let snap = agg.query("latency").unwrap();
        for p in [50.0, 90.0, 95.0, 99.0, 100.0] {
            let expected = nearest_rank(&samples, p);
            let actual = snap.percentile(p);
            let rel = (actual - expected).abs() / expected;
            assert!(rel <= 0.01, "p{} was {} expected {}", p, actual, expected);
        }
        assert_eq!(snap.percentile(100.0), 1000.0);
    }

    #[test]
    fn test_small_sample_percentiles() {
        let mut agg = StatsAggregator::new();
        for v in [5.0, 1.0, 3.0] {
            agg.add(Metric::Trend {
                name: "t".to_string(),
                value: v,
            });
        }
        let snap = agg.query("t").unwrap();
        assert_eq!(snap.percentile(0.0), 1.0);
        assert!((snap.median() - 3.0).abs() <= 0.03, "median was {}", snap.median());
        assert_eq!(snap.percentile(95.0), 5.0);
    }

    #[test]
    fn test_memory_is_bounded() {
        let mut series = MetricSeries::timing();
        let before = series.histogram.distinct_values();
        for i in 0..200_000u64 {
            series.record((i % 5000) as f64, true);
        }
        assert_eq!(series.count, 200_000);
        assert_eq!(series.histogram.distinct_values(), before);
    }

    #[test]
    fn test_custom_trend_above_an_hour_keeps_percentiles() {
        let agg = ShardedAggregator::new(3);
        let samples: Vec<f64> = (1..=100).map(|i| (i * 100_000) as f64).collect();
        for (i, v) in samples.iter().enumerate() {
            agg.add(
                i as u64,
                Metric::Trend {
                    name: "bytes_sent".to_string(),
                    value: *v,
                },
            );
        }
        let snap = agg.query("bytes_sent").unwrap();
        for p in [50.0, 95.0, 99.0] {
            let expected = nearest_rank(&samples, p);
            let actual = snap.percentile(p);
            let rel = (actual - expected).abs() / expected;
            assert!(rel <= 0.01, "p{} was {} expected {}", p, actual, expected);
        }
        assert_eq!(snap.max(), 10_000_000.0);

        let merged = agg.snapshot();
        let (_, series) = merged.series().find(|(name, _)| *name == "bytes_sent").unwrap();
        assert!((series.median() - 5_000_000.0).abs() / 5_000_000.0 <= 0.01);
    }

    #[test]
    fn test_timings_past_an_hour_saturate() {
        let mut agg = StatsAggregator::new();
        agg.add(Metric::Iteration {
            duration: Duration::from_secs(2 * 60 * 60),
            success: true,
        });
        let snap = agg.query(ITERATION_DURATION).unwrap();
        assert_eq!(snap.max(), 7_200_000.0);
        assert!(snap.percentile(50.0) <= 7_200_000.0);
        assert!(snap.percentile(50.0) >= 3_500_000.0);
    }

    #[test]
    fn test_negative_trend_values_keep_exact_aggregates() {
        let mut agg = StatsAggregator::new();
        for v in [-5.0, 5.0] {
            agg.add(Metric::Trend {
                name: "clock_skew".to_string(),
                value: v,
            });
        }
        agg.add(Metric::Counter {
            name: "balance".to_string(),
            value: -3.0,
        });

        let skew = agg.query("clock_skew").unwrap();
        assert_eq!(skew.min(), -5.0);
        assert_eq!(skew.max(), 5.0);
        assert_eq!(skew.sum(), 0.0);
        assert_eq!(skew.avg(), 0.0);
        assert_eq!(skew.percentile(100.0), 5.0);
        assert_eq!(agg.query("balance").unwrap().sum(), -3.0);
    }

    #[test]
    fn test_iterations_and_custom_metrics() {
        let mut agg = StatsAggregator::new();
        agg.add(Metric::Iteration {
            duration: Duration::from_millis(40),
            success: true,
        });
        agg.add(Metric::Iteration {
            duration: Duration::from_millis(60),
            success: false,
        });
        agg.add(Metric::Counter {
            name: "items_sold".to_string(),
            value: 5.0,
        });
        agg.add(Metric::Counter {
            name: "items_sold".to_string(),
            value: 3.0,
        });
        for success in [true, true, false, true] {
            agg.add(Metric::Rate {
                name: "errors".to_string(),
                success,
            });
        }

        assert_eq!(agg.query(ITERATIONS).unwrap().count(), 2);
        assert_eq!(agg.query(ITERATION_DURATION).unwrap().avg(), 50.0);
        assert_eq!(agg.query("items_sold").unwrap().sum(), 8.0);
        assert_eq!(agg.query("errors").unwrap().rate(), 0.75);
        assert_eq!(agg.query("errors").unwrap().kind(), MetricKind::Rate);
    }

    #[test]
    fn test_concurrent_append_loses_nothing() {
        let agg = Arc::new(ShardedAggregator::new(4));
        let writers = 16;
        let per_writer = 2_000;

        let handles: Vec<_> = (0..writers)
            .map(|w| {
                let agg = agg.clone();
                std::thread::spawn(move || {
                    for i in 0..per_writer {
                        assert!(agg.append(w, outcome("api", (i % 50) as u64, true)));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let total = (writers * per_writer) as u64;
        assert_eq!(agg.query(HTTP_REQ_DURATION).unwrap().count(), total);
        let snapshot = agg.snapshot();
        assert_eq!(snapshot.status_codes[&200], total);
        let (name, api) = snapshot.checkpoints().next().unwrap();
        assert_eq!(name, "api");
        assert_eq!(api.count(), total);
    }

    #[test]
    fn test_sharded_query_merges_shards() {
        let agg = ShardedAggregator::new(3);
        for vu in 0..6u64 {
            agg.append(vu, outcome("api", 10 * (vu + 1), vu != 0));
        }
        let snap = agg.query(HTTP_REQ_DURATION).unwrap();
        assert_eq!(snap.count(), 6);
        assert_eq!(snap.min(), 10.0);
        assert_eq!(snap.max(), 60.0);
        assert_eq!(agg.query(HTTP_REQ_FAILED).unwrap().passes(), 1);
        assert!(agg.query("missing").is_none());
    }

    #[test]
    fn test_sealed_aggregator_drops_writes() {
        let agg = ShardedAggregator::new(2);
        assert!(agg.append(1, outcome("api", 5, true)));
        agg.seal();
        assert!(agg.is_sealed());
        assert!(!agg.add_batch(1, vec![Metric::Request(outcome("api", 5, true))]));
        assert_eq!(agg.query(HTTP_REQ_DURATION).unwrap().count(), 1);
    }

    #[test]
    fn test_shard_count_scales_with_vus() {
        assert_eq!(ShardedAggregator::for_vus(10).num_shards(), 16);
        assert_eq!(ShardedAggregator::for_vus(5_000).num_shards(), 50);
        assert_eq!(ShardedAggregator::for_vus(1_000_000).num_shards(), 256);
    }

    #[test]
    fn test_empty_snapshot_reports_zeros() {
        let snap = SeriesSnapshot::empty(MetricKind::Trend);
        assert_eq!(snap.count(), 0);
        assert_eq!(snap.rate(), 0.0);
        assert_eq!(snap.percentile(95.0), 0.0);
        assert_eq!(snap.min(), 0.0);
        assert_eq!(snap.max(), 0.0);
    }
}
