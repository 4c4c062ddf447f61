use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Shared state between an external controller, the orchestrator and VUs.
///
/// Cancellation is cooperative: the orchestrator notices `stop` on its next
/// control tick and begins draining. Paused time is excluded from the
/// schedule clock so a paused ramp resumes where it left off.
pub struct ControlState {
    /// When true, VUs idle at their next iteration boundary
    paused: AtomicBool,
    /// External cancellation request
    stopped: AtomicBool,
    /// Accumulated paused duration in milliseconds
    total_paused_ms: AtomicU64,
    /// Offset from `reference_instant` when the current pause began, 0 if not paused
    pause_started_ms: AtomicU64,
    reference_instant: Instant,
}

impl ControlState {
    pub fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            total_paused_ms: AtomicU64::new(0),
            pause_started_ms: AtomicU64::new(0),
            reference_instant: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        // +1 keeps a pause started in the very first millisecond distinguishable from "not paused"
        self.reference_instant.elapsed().as_millis() as u64 + 1
    }

    pub fn pause(&self) {
        if self.paused.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pause_started_ms.store(self.now_ms(), Ordering::SeqCst);
    }

    pub fn resume(&self) {
        if !self.paused.swap(false, Ordering::SeqCst) {
            return;
        }
        let started = self.pause_started_ms.swap(0, Ordering::SeqCst);
        if started > 0 {
            let paused_for = self.now_ms().saturating_sub(started);
            self.total_paused_ms.fetch_add(paused_for, Ordering::SeqCst);
        }
    }

    /// Total time spent paused, including a pause still in progress.
    pub fn total_paused(&self) -> Duration {
        let mut total = self.total_paused_ms.load(Ordering::SeqCst);
        if self.is_paused() {
            let started = self.pause_started_ms.load(Ordering::SeqCst);
            if started > 0 {
                total += self.now_ms().saturating_sub(started);
            }
        }
        Duration::from_millis(total)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Request cancellation of the run.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}
