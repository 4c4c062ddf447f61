use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use volley::{AbortReason, Orchestrator, RunConfig, RunState, VuContext};

fn config(yaml: &str) -> RunConfig {
    RunConfig::from_yaml_str(yaml).unwrap()
}

fn quick(vu: &mut VuContext) -> anyhow::Result<()> {
    vu.check_status("op", 200, |_| {
        thread::sleep(Duration::from_millis(5));
        Ok::<u16, String>(200)
    })?;
    Ok(())
}

#[test]
fn ramp_walks_through_every_state() {
    let cfg = config(
        r#"
stages:
  - { duration: 300ms, target: 4 }
  - { duration: 300ms, target: 4 }
  - { duration: 300ms, target: 0 }
controlInterval: 20ms
"#,
    );
    let mut orchestrator = Orchestrator::new(cfg, quick);
    let monitor = orchestrator.monitor();

    let done = Arc::new(AtomicBool::new(false));
    let peak = Arc::new(AtomicUsize::new(0));
    let watcher = {
        let done = done.clone();
        let peak = peak.clone();
        thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                peak.fetch_max(monitor.active_vus(), Ordering::Relaxed);
                thread::sleep(Duration::from_millis(5));
            }
        })
    };

    let result = orchestrator.run();
    done.store(true, Ordering::Release);
    watcher.join().unwrap();

    assert_eq!(result.state, RunState::Completed);
    assert_eq!(
        orchestrator.history(),
        vec![
            RunState::Pending,
            RunState::RampingUp,
            RunState::SteadyState,
            RunState::RampingDown,
            RunState::Draining,
            RunState::Completed,
        ]
    );
    assert_eq!(result.vus_max, 4);
    assert!(peak.load(Ordering::Relaxed) <= 4);
    assert!(result.vus_spawned >= 4);
    assert!(result.checkpoints["op"].count > 0);
    assert_eq!(result.checkpoints["op"].fails, 0);
    assert_eq!(result.drain_timed_out_vus, 0);
}

#[test]
fn abort_on_fail_stops_spawning() {
    let cfg = config(
        r#"
stages:
  - { duration: 10s, target: 50 }
thresholds:
  http_req_failed: ["rate<0.05"]
abortOnFail: true
abortGraceSamples: 1
controlInterval: 50ms
"#,
    );
    let mut orchestrator = Orchestrator::new(cfg, |vu: &mut VuContext| -> anyhow::Result<()> {
        vu.check("login", |_| Err::<u16, _>("connection refused"), |_| true)?;
        Ok(())
    });
    let monitor = orchestrator.monitor();
    let started = Instant::now();
    let result = orchestrator.run();

    assert_eq!(result.state, RunState::Aborted);
    match &result.abort_reason {
        Some(AbortReason::ThresholdBreach { metric, observed, .. }) => {
            assert_eq!(metric, "http_req_failed");
            assert_eq!(*observed, 1.0);
        }
        other => panic!("unexpected abort reason {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(result.vus_spawned < 50);
    assert_eq!(result.vus_spawned as usize, result.vus_max);
    assert_eq!(monitor.active_vus(), 0);
    assert!(!result.thresholds[0].passed);
    // The failed checkpoint is the only outcome each iteration records.
    assert_eq!(result.errors["connection refused"], result.checkpoints["login"].count);
    assert!(!result.checkpoints.contains_key("iteration"));
    assert_eq!(result.metrics["http_req_failed"].count, result.checkpoints["login"].count);
}

#[test]
fn external_stop_cancels_the_run() {
    let cfg = config("vus: 2\nduration: 30s\ncontrolInterval: 20ms\n");
    let mut orchestrator = Orchestrator::new(cfg, quick);
    let control = orchestrator.control();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        control.stop();
    });

    let started = Instant::now();
    let result = orchestrator.run();
    stopper.join().unwrap();

    assert_eq!(result.state, RunState::Aborted);
    assert_eq!(result.abort_reason, Some(AbortReason::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(result.iterations > 0);
}

#[test]
fn drain_timeout_discards_in_flight_iterations() {
    let cfg = config("vus: 1\nduration: 200ms\ndrainTimeout: 100ms\ncontrolInterval: 20ms\n");
    let mut orchestrator = Orchestrator::new(cfg, |vu: &mut VuContext| -> anyhow::Result<()> {
        vu.check_status("slow", 200, |_| {
            thread::sleep(Duration::from_secs(1));
            Ok::<u16, String>(200)
        })?;
        Ok(())
    });
    let result = orchestrator.run();

    assert_eq!(result.state, RunState::Completed);
    assert_eq!(result.drain_timed_out_vus, 1);
    assert_eq!(result.iterations, 0);
    assert!(!result.checkpoints.contains_key("slow"));

    // The abandoned VU finishing later must not change the stored result.
    thread::sleep(Duration::from_millis(1100));
    assert_eq!(orchestrator.result(), Some(result));
}

#[test]
fn invalid_config_never_starts_a_vu() {
    let called = Arc::new(AtomicBool::new(false));
    let flag = called.clone();
    let cfg = config(
        r#"
vus: 5
duration: 1s
thresholds:
  http_req_duration: ["p(95) is under 500"]
"#,
    );
    let mut orchestrator = Orchestrator::new(cfg, move |_: &mut VuContext| -> anyhow::Result<()> {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    });
    let result = orchestrator.run();

    assert_eq!(result.state, RunState::Aborted);
    assert!(matches!(result.abort_reason, Some(AbortReason::Configuration { .. })));
    assert_eq!(result.vus_spawned, 0);
    assert!(!called.load(Ordering::SeqCst));
}

#[test]
fn result_is_stable_across_calls() {
    let cfg = config("vus: 1\nduration: 150ms\ncontrolInterval: 20ms\n");
    let mut orchestrator = Orchestrator::new(cfg, quick);
    let first = orchestrator.run();

    assert_eq!(orchestrator.result(), Some(first.clone()));
    assert_eq!(orchestrator.result(), orchestrator.result());
    assert_eq!(orchestrator.run(), first);
    assert_eq!(
        first.to_json().unwrap(),
        orchestrator.result().unwrap().to_json().unwrap()
    );
}

#[test]
fn failing_thresholds_complete_but_do_not_pass() {
    let cfg = config(
        r#"
vus: 2
duration: 300ms
controlInterval: 20ms
thresholds:
  errors: ["rate<0.1"]
  iteration_duration: ["max<5s"]
"#,
    );
    let mut orchestrator = Orchestrator::new(cfg, |vu: &mut VuContext| -> anyhow::Result<()> {
        let failed = vu.iteration() % 2 == 0;
        vu.rate("errors", failed);
        thread::sleep(Duration::from_millis(5));
        Ok(())
    });
    let result = orchestrator.run();

    assert_eq!(result.state, RunState::Completed);
    assert!(!result.passed());
    let by_metric = |m: &str| result.thresholds.iter().find(|t| t.metric == m).unwrap();
    assert!(!by_metric("errors").passed);
    assert!(by_metric("errors").observed >= 0.5);
    assert!(by_metric("iteration_duration").passed);
}

#[test]
fn pause_holds_the_schedule_clock() {
    let cfg = config("vus: 1\nduration: 400ms\ncontrolInterval: 10ms\n");
    let mut orchestrator = Orchestrator::new(cfg, quick);
    let control = orchestrator.control();
    let pauser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        control.pause();
        thread::sleep(Duration::from_millis(300));
        control.resume();
    });

    let started = Instant::now();
    let result = orchestrator.run();
    pauser.join().unwrap();

    assert_eq!(result.state, RunState::Completed);
    assert!(started.elapsed() >= Duration::from_millis(650));
}
