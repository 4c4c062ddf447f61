//! Virtual users: one OS thread per VU running the scenario in a loop.
//!
//! A VU buffers everything it records during an iteration and hands the batch
//! to the aggregator only once the iteration is over, so a stop request or a
//! drain timeout never produces a half-recorded iteration.

use crate::engine::control::ControlState;
use crate::error::CheckpointFailure;
use crate::stats::{Metric, OutcomeStatus, RequestOutcome, ShardedAggregator};
use crossbeam_channel::Sender;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Outcome name used when the scenario itself fails outside any checkpoint.
pub const ITERATION_CHECKPOINT: &str = "iteration";

const PAUSE_POLL: Duration = Duration::from_millis(100);

/// User-supplied scenario: one call is one iteration of one virtual user.
pub trait Scenario: Send + Sync + 'static {
    fn iteration(&self, vu: &mut VuContext) -> anyhow::Result<()>;
}

impl<F> Scenario for F
where
    F: Fn(&mut VuContext) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn iteration(&self, vu: &mut VuContext) -> anyhow::Result<()> {
        self(vu)
    }
}

/// Anything a checkpoint can produce that carries a status code.
pub trait Exchange {
    fn status_code(&self) -> u16;
}

impl Exchange for reqwest::blocking::Response {
    fn status_code(&self) -> u16 {
        self.status().as_u16()
    }
}

impl Exchange for u16 {
    fn status_code(&self) -> u16 {
        *self
    }
}

/// Per-VU handle passed to the scenario on every iteration.
pub struct VuContext {
    vu_id: u64,
    iteration: u64,
    client: Client,
    pending: Vec<Metric>,
}

impl VuContext {
    pub fn new(vu_id: u64, client: Client) -> Self {
        Self {
            vu_id,
            iteration: 0,
            client,
            pending: Vec::new(),
        }
    }

    pub fn vu_id(&self) -> u64 {
        self.vu_id
    }

    /// Zero-based index of the current iteration of this VU.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Run one named checkpoint: time `op`, judge its response with `pass`, and
    /// record exactly one outcome. Errors and panics in either closure are
    /// recorded as a failed outcome rather than propagated.
    pub fn check<R, E, F, P>(&mut self, name: &str, op: F, pass: P) -> Result<R, CheckpointFailure>
    where
        R: Exchange,
        E: fmt::Display,
        F: FnOnce(&Client) -> Result<R, E>,
        P: FnOnce(&R) -> bool,
    {
        let client = &self.client;
        let start = Instant::now();
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
            op(client).map(|response| {
                let ok = pass(&response);
                (response, ok)
            })
        }));
        let elapsed = start.elapsed();

        let (outcome, result) = match attempt {
            Ok(Ok((response, true))) => (
                RequestOutcome::new(name, OutcomeStatus::Code(response.status_code()), true, elapsed),
                Ok(response),
            ),
            Ok(Ok((response, false))) => {
                let status = response.status_code();
                (
                    RequestOutcome::new(name, OutcomeStatus::Code(status), false, elapsed),
                    Err(CheckpointFailure::Rejected { status }),
                )
            }
            Ok(Err(err)) => {
                let message = err.to_string();
                (
                    RequestOutcome::failed(name, message.clone(), elapsed),
                    Err(CheckpointFailure::Errored(message)),
                )
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                (
                    RequestOutcome::failed(name, format!("panic: {}", message), elapsed),
                    Err(CheckpointFailure::Panicked(message)),
                )
            }
        };
        self.pending.push(Metric::Request(outcome));
        result
    }

    /// Checkpoint that passes when the response status equals `expected`.
    pub fn check_status<R, E, F>(&mut self, name: &str, expected: u16, op: F) -> Result<R, CheckpointFailure>
    where
        R: Exchange,
        E: fmt::Display,
        F: FnOnce(&Client) -> Result<R, E>,
    {
        self.check(name, op, |r| r.status_code() == expected)
    }

    /// Record one observation of a custom rate metric.
    pub fn rate(&mut self, name: &str, success: bool) {
        self.pending.push(Metric::Rate {
            name: name.to_string(),
            success,
        });
    }

    /// Record a value on a custom trend metric.
    pub fn trend(&mut self, name: &str, value: f64) {
        self.pending.push(Metric::Trend {
            name: name.to_string(),
            value,
        });
    }

    /// Add to a custom counter metric.
    pub fn count(&mut self, name: &str, value: f64) {
        self.pending.push(Metric::Counter {
            name: name.to_string(),
            value,
        });
    }

    fn take_pending(&mut self) -> Vec<Metric> {
        std::mem::take(&mut self.pending)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// How long a VU waits between iterations.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pacing {
    /// Pause after every iteration
    pub iteration_sleep: Duration,
    /// Minimum start-to-start time per iteration
    pub min_iteration_duration: Option<Duration>,
}

impl Pacing {
    pub fn wait_after(&self, iteration_took: Duration) -> Duration {
        let pad = self
            .min_iteration_duration
            .map(|min| min.saturating_sub(iteration_took))
            .unwrap_or_default();
        pad.max(self.iteration_sleep)
    }
}

/// Everything every VU of one run shares.
#[derive(Clone)]
pub(crate) struct VuShared {
    pub scenario: Arc<dyn Scenario>,
    pub aggregator: Arc<ShardedAggregator>,
    pub control: Arc<ControlState>,
    pub pacing: Pacing,
    pub client: Client,
    pub exits: Sender<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VuState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Orchestrator-side handle to one VU thread.
pub struct VirtualUser {
    id: u64,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl VirtualUser {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn start(&mut self, shared: &VuShared) -> std::io::Result<()> {
        let runner = VuRunner {
            id: self.id,
            stop: self.stop.clone(),
            shared: shared.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("vu-{}", self.id))
            .spawn(move || runner.run())?;
        self.handle = Some(handle);
        Ok(())
    }

    pub fn state(&self) -> VuState {
        match &self.handle {
            None => VuState::Idle,
            Some(h) if h.is_finished() => VuState::Stopped,
            Some(_) if self.stop.load(Ordering::Acquire) => VuState::Stopping,
            Some(_) => VuState::Running,
        }
    }

    /// Ask the VU to exit at its next iteration boundary, cutting any
    /// inter-iteration sleep short.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(h) = &self.handle {
            h.thread().unpark();
        }
    }

    /// Wait for the thread to exit. Only call once its exit notice arrived.
    pub fn join(mut self) {
        if let Some(h) = self.handle.take() {
            if h.join().is_err() {
                warn!(vu = self.id, "VU thread panicked");
            }
        }
    }
}

/// Sends the VU id on drop so the orchestrator learns about every exit.
struct ExitNotice {
    id: u64,
    exits: Sender<u64>,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        let _ = self.exits.send(self.id);
    }
}

struct VuRunner {
    id: u64,
    stop: Arc<AtomicBool>,
    shared: VuShared,
}

impl VuRunner {
    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire) || self.shared.control.is_stopped()
    }

    fn run(self) {
        let _notice = ExitNotice {
            id: self.id,
            exits: self.shared.exits.clone(),
        };
        let mut ctx = VuContext::new(self.id, self.shared.client.clone());
        debug!(vu = self.id, "VU started");

        while !self.stop_requested() {
            if self.shared.control.is_paused() {
                self.nap(PAUSE_POLL);
                continue;
            }

            let start = Instant::now();
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                self.shared.scenario.iteration(&mut ctx)
            }));
            let elapsed = start.elapsed();

            // A CheckpointFailure propagated with `?` already has its outcome
            // buffered; only errors raised outside any checkpoint get one here.
            let (success, failure) = match result {
                Ok(Ok(())) => (true, None),
                Ok(Err(err)) if err.downcast_ref::<CheckpointFailure>().is_some() => {
                    debug!(vu = self.id, iteration = ctx.iteration, error = %err, "iteration ended by failed checkpoint");
                    (false, None)
                }
                Ok(Err(err)) => (false, Some(format!("{:#}", err))),
                Err(payload) => (false, Some(format!("panic: {}", panic_message(payload.as_ref())))),
            };
            let mut batch = ctx.take_pending();
            if let Some(message) = failure {
                debug!(vu = self.id, iteration = ctx.iteration, error = %message, "iteration failed");
                batch.push(Metric::Request(RequestOutcome::failed(
                    ITERATION_CHECKPOINT,
                    message,
                    elapsed,
                )));
            }
            batch.push(Metric::Iteration {
                duration: elapsed,
                success,
            });

            if !self.shared.aggregator.add_batch(self.id, batch) {
                // Sealed: the run is over and this iteration no longer counts.
                break;
            }
            ctx.iteration += 1;

            self.nap(self.shared.pacing.wait_after(elapsed));
        }
        debug!(vu = self.id, iterations = ctx.iteration, "VU stopped");
    }

    /// Sleep up to `total`, returning early once a stop is requested. A `total`
    /// too large to represent as a deadline sleeps until stopped.
    fn nap(&self, total: Duration) {
        let deadline = Instant::now().checked_add(total);
        loop {
            if self.stop_requested() {
                return;
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return;
                    }
                    thread::park_timeout(deadline - now);
                }
                None => thread::park_timeout(PAUSE_POLL),
            }
        }
    }
}
