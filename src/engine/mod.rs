//! Run orchestration: follow the ramp schedule, keep the VU pool at its target,
//! watch thresholds, then drain and assemble the final [`RunResult`].

pub mod control;
pub mod schedule;
pub mod vu;

use crate::config::{RunConfig, RunPlan};
use crate::error::AbortReason;
use crate::stats::report::{RunMeta, RunResult};
use crate::stats::threshold::{evaluate, first_breach};
use crate::stats::{AggregateSnapshot, ShardedAggregator};
use control::ControlState;
use crossbeam_channel::Receiver;
use parking_lot::{Mutex, RwLock};
use reqwest::blocking::Client;
use schedule::Phase;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};
use vu::{Scenario, VirtualUser, VuShared};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Pending,
    RampingUp,
    SteadyState,
    RampingDown,
    Draining,
    Completed,
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Aborted)
    }
}

impl From<Phase> for RunState {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::RampingUp => RunState::RampingUp,
            Phase::Steady => RunState::SteadyState,
            Phase::RampingDown => RunState::RampingDown,
        }
    }
}

#[derive(Default)]
struct RunStatus {
    state: RwLock<RunState>,
    history: Mutex<Vec<RunState>>,
    active_vus: AtomicUsize,
    target_vus: AtomicUsize,
}

/// Read-only view of a run that can be watched from another thread while
/// [`Orchestrator::run`] blocks.
#[derive(Clone)]
pub struct RunMonitor(Arc<RunStatus>);

impl RunMonitor {
    pub fn state(&self) -> RunState {
        *self.0.state.read()
    }

    /// Every state entered so far, in order, starting with `Pending`.
    pub fn history(&self) -> Vec<RunState> {
        self.0.history.lock().clone()
    }

    /// VUs currently scheduled (started and not yet asked to stop).
    pub fn active_vus(&self) -> usize {
        self.0.active_vus.load(Ordering::Acquire)
    }

    /// Target computed on the last control tick.
    pub fn target_vus(&self) -> usize {
        self.0.target_vus.load(Ordering::Acquire)
    }
}

pub struct Orchestrator {
    config: RunConfig,
    scenario: Arc<dyn Scenario>,
    client: Option<Client>,
    control: Arc<ControlState>,
    status: Arc<RunStatus>,
    finished: Option<RunResult>,
}

impl Orchestrator {
    pub fn new(config: RunConfig, scenario: impl Scenario) -> Self {
        let status = Arc::new(RunStatus::default());
        status.history.lock().push(RunState::Pending);
        Self {
            config,
            scenario: Arc::new(scenario),
            client: None,
            control: Arc::new(ControlState::new()),
            status,
            finished: None,
        }
    }

    /// Use a preconfigured HTTP client instead of one built from `userAgent`
    /// and `requestTimeout`.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Pause/resume/stop handle, usable from any thread.
    pub fn control(&self) -> Arc<ControlState> {
        self.control.clone()
    }

    pub fn monitor(&self) -> RunMonitor {
        RunMonitor(self.status.clone())
    }

    pub fn state(&self) -> RunState {
        *self.status.state.read()
    }

    pub fn history(&self) -> Vec<RunState> {
        self.status.history.lock().clone()
    }

    /// Result of the finished run; `None` until [`run`](Self::run) returned.
    pub fn result(&self) -> Option<RunResult> {
        self.finished.clone()
    }

    fn transition(&self, next: RunState) {
        let mut state = self.status.state.write();
        if *state == next {
            return;
        }
        info!(from = ?*state, to = ?next, "run state changed");
        *state = next;
        self.status.history.lock().push(next);
    }

    /// Execute the run to completion on the calling thread. A second call
    /// returns the stored result without running again.
    pub fn run(&mut self) -> RunResult {
        if let Some(done) = &self.finished {
            return done.clone();
        }
        let started_at = SystemTime::now();
        let clock = Instant::now();

        let plan = match self.config.plan() {
            Ok(plan) => plan,
            Err(err) => {
                warn!(error = %err, "invalid run configuration");
                return self.reject(started_at, clock, err.to_string());
            }
        };
        let client = match self.client.clone() {
            Some(client) => client,
            None => match build_client(&plan) {
                Ok(client) => client,
                Err(err) => {
                    warn!(error = %err, "failed to build HTTP client");
                    return self.reject(started_at, clock, format!("http client: {}", err));
                }
            },
        };

        let aggregator = Arc::new(match plan.shards {
            Some(n) => ShardedAggregator::new(n),
            None => ShardedAggregator::for_vus(plan.schedule.max_target()),
        });
        let (exits_tx, exits_rx) = crossbeam_channel::unbounded();
        let mut pool = VuPool::new(
            VuShared {
                scenario: self.scenario.clone(),
                aggregator: aggregator.clone(),
                control: self.control.clone(),
                pacing: plan.pacing,
                client,
                exits: exits_tx,
            },
            exits_rx,
            self.status.clone(),
        );

        info!(
            stages = plan.schedule.stages().len(),
            duration_s = plan.schedule.total_duration().as_secs_f64(),
            max_vus = plan.schedule.max_target(),
            shards = aggregator.num_shards(),
            thresholds = plan.thresholds.len(),
            "starting run"
        );

        let abort_reason = self.control_loop(&plan, &aggregator, &mut pool, clock);

        self.transition(RunState::Draining);
        let drain_timed_out_vus = pool.drain(plan.drain_timeout);
        let snapshot = aggregator.snapshot();
        let outcomes = evaluate(&plan.thresholds, &snapshot);
        let state = if abort_reason.is_some() {
            RunState::Aborted
        } else {
            RunState::Completed
        };
        self.transition(state);

        let result = RunResult::assemble(
            RunMeta {
                state,
                abort_reason,
                started_at,
                duration: clock.elapsed(),
                vus_max: pool.vus_max,
                vus_spawned: pool.spawned,
                drain_timed_out_vus,
            },
            &snapshot,
            outcomes,
        );
        info!(
            state = ?result.state,
            iterations = result.iterations,
            vus_max = result.vus_max,
            passed = result.passed(),
            "run finished"
        );
        self.finished = Some(result.clone());
        result
    }

    /// One tick per `control_interval` until the schedule runs out or the run
    /// is aborted. Returns the abort reason, if any.
    fn control_loop(
        &self,
        plan: &RunPlan,
        aggregator: &ShardedAggregator,
        pool: &mut VuPool,
        clock: Instant,
    ) -> Option<AbortReason> {
        let total = plan.schedule.total_duration();
        // Pauses taken before the run started do not shift the schedule.
        let paused_before = self.control.total_paused();

        loop {
            if self.control.is_stopped() {
                info!("run cancelled");
                return Some(AbortReason::Cancelled);
            }

            let paused = self.control.total_paused().saturating_sub(paused_before);
            let elapsed = clock.elapsed().saturating_sub(paused);
            if elapsed >= total {
                return None;
            }

            // Checked before scaling so a breaching tick never spawns.
            if plan.abort_on_fail {
                if let Some(breach) = first_breach(&plan.thresholds, aggregator, plan.abort_grace_samples) {
                    warn!(
                        metric = %breach.metric,
                        expression = %breach.expression,
                        observed = breach.observed,
                        samples = breach.samples,
                        "threshold breached, aborting run"
                    );
                    return Some(AbortReason::ThresholdBreach {
                        metric: breach.metric,
                        expression: breach.expression,
                        observed: breach.observed,
                    });
                }
            }

            self.transition(RunState::from(plan.schedule.phase_at(elapsed)));
            pool.reap();
            pool.scale_to(plan.schedule.target_at(elapsed));

            thread::sleep(plan.control_interval.min(total - elapsed));
        }
    }

    fn reject(&mut self, started_at: SystemTime, clock: Instant, message: String) -> RunResult {
        self.transition(RunState::Aborted);
        let result = RunResult::assemble(
            RunMeta {
                state: RunState::Aborted,
                abort_reason: Some(AbortReason::Configuration { message }),
                started_at,
                duration: clock.elapsed(),
                vus_max: 0,
                vus_spawned: 0,
                drain_timed_out_vus: 0,
            },
            &AggregateSnapshot::default(),
            Vec::new(),
        );
        self.finished = Some(result.clone());
        result
    }
}

fn build_client(plan: &RunPlan) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(plan.user_agent.clone())
        .timeout(plan.request_timeout)
        .build()
}

/// The live VU threads of one run.
///
/// `active` holds scheduled VUs in start order; retiring pops from the front.
/// `vus` holds every thread that has not reported its exit yet, including
/// retiring ones still finishing their iteration.
struct VuPool {
    shared: VuShared,
    exits: Receiver<u64>,
    status: Arc<RunStatus>,
    next_id: u64,
    active: VecDeque<u64>,
    vus: BTreeMap<u64, VirtualUser>,
    vus_max: usize,
    spawned: u64,
}

impl VuPool {
    fn new(shared: VuShared, exits: Receiver<u64>, status: Arc<RunStatus>) -> Self {
        Self {
            shared,
            exits,
            status,
            next_id: 1,
            active: VecDeque::new(),
            vus: BTreeMap::new(),
            vus_max: 0,
            spawned: 0,
        }
    }

    fn scale_to(&mut self, target: usize) {
        self.status.target_vus.store(target, Ordering::Release);

        while self.active.len() < target {
            let mut vu = VirtualUser::new(self.next_id);
            if let Err(err) = vu.start(&self.shared) {
                warn!(vu = vu.id(), error = %err, "failed to spawn VU thread");
                break;
            }
            debug!(vu = vu.id(), "VU spawned");
            self.next_id += 1;
            self.spawned += 1;
            self.active.push_back(vu.id());
            self.vus.insert(vu.id(), vu);
        }

        while self.active.len() > target {
            if let Some(id) = self.active.pop_front() {
                if let Some(vu) = self.vus.get(&id) {
                    vu.request_stop();
                    debug!(vu = id, "VU retiring");
                }
            }
        }

        self.vus_max = self.vus_max.max(self.active.len());
        self.status.active_vus.store(self.active.len(), Ordering::Release);
    }

    /// Join every VU whose exit notice has arrived.
    fn reap(&mut self) {
        while let Ok(id) = self.exits.try_recv() {
            self.release(id);
        }
    }

    fn release(&mut self, id: u64) {
        if let Some(vu) = self.vus.remove(&id) {
            vu.join();
        }
        if let Some(pos) = self.active.iter().position(|&a| a == id) {
            self.active.remove(pos);
            self.status.active_vus.store(self.active.len(), Ordering::Release);
        }
    }

    /// Stop every VU and wait up to `timeout` for them to exit, then seal the
    /// aggregator. Returns how many VUs were still running at the deadline;
    /// their threads are detached and whatever they record later is dropped.
    fn drain(&mut self, timeout: Duration) -> usize {
        for vu in self.vus.values() {
            vu.request_stop();
        }
        self.active.clear();
        self.status.active_vus.store(0, Ordering::Release);

        // A timeout too large to land on the clock means wait without a deadline.
        let deadline = Instant::now().checked_add(timeout);
        while !self.vus.is_empty() {
            let notice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    self.exits.recv_timeout(deadline - now).ok()
                }
                None => self.exits.recv().ok(),
            };
            match notice {
                Some(id) => self.release(id),
                None => break,
            }
        }

        let stragglers = self.vus.len();
        self.shared.aggregator.seal();
        if stragglers > 0 {
            warn!(
                vus = stragglers,
                timeout_s = timeout.as_secs_f64(),
                "drain timed out, abandoning in-flight iterations"
            );
            self.vus.clear();
        }
        stragglers
    }
}
