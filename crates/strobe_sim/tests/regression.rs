//! Full regressions against the embedded simulator backend.
//!
//! Each test function is its own isolated simulation universe: the
//! scheduler, runner, and GPI backend are all per-thread, and the test
//! harness runs every test on a fresh thread.

use std::cell::Cell;
use std::rc::Rc;

use rand::Rng;
use strobe_core::error::{check, Failure};
use strobe_core::gpi;
use strobe_core::handle::SimHandle;
use strobe_core::runner::{self, RegressionSummary, TestFn};
use strobe_core::scheduler;
use strobe_core::stimulus::clock_gen;
use strobe_core::task::start_soon;
use strobe_core::time::{self, TimeUnit};
use strobe_core::trigger::{ReadOnly, RisingEdge, Timer};
use strobe_sim::{SimBuilder, SimReport, Simulator};

fn run_regression(
    configure: impl FnOnce(&mut SimBuilder),
    tests: &[(&str, TestFn)],
) -> (RegressionSummary, SimReport) {
    let mut builder = SimBuilder::new("top");
    configure(&mut builder);
    let sim: Rc<Simulator> = builder.build();
    gpi::set_backend(sim.clone());
    for (name, body) in tests {
        runner::register_test(name, *body);
    }
    runner::bind_to_simulation();
    let report = sim.run().expect("simulation error");
    let summary = runner::take_summary().expect("regression did not complete");
    gpi::clear_backend();
    (summary, report)
}

fn dff_design(builder: &mut SimBuilder) {
    let clk = builder.add_signal("clk", 0).unwrap();
    let d = builder.add_signal("d", 0).unwrap();
    let q = builder.add_signal("q", 0).unwrap();
    builder.add_model(strobe_sim::Dff::new(clk, d, q));
}

async fn dff_sampling(dut: SimHandle) -> Result<(), Failure> {
    let clk = dut.child("clk");
    let d = dut.child("d");
    let q = dut.child("q");

    d.value().set(0);
    let _clock = start_soon(clock_gen(clk.clone(), 10, TimeUnit::Us));
    RisingEdge::new(&clk).await;

    let mut rng = rand::thread_rng();
    let mut previous_d: u32 = 0;
    for _ in 0..10 {
        let next: u32 = rng.gen_range(0..2);
        d.value().set(i64::from(next));
        RisingEdge::new(&clk).await;
        check(q.value().as_u32() == previous_d, "q did not hold the previously latched d")?;
        previous_d = next;
    }
    Ok(())
}

#[test]
fn dff_sampling_passes() {
    let (summary, report) = run_regression(dff_design, &[("dff_sampling", |dut| {
        Box::pin(dff_sampling(dut))
    })]);
    assert_eq!(summary.failed(), 0);
    assert_eq!(summary.passed(), 1);
    assert_eq!(summary.exit_code(), 0);
    // Eleven rising edges of a 10 us clock at ns precision.
    assert!(
        (100_000..=120_000).contains(&report.final_time),
        "unexpected final time {}",
        report.final_time
    );
}

async fn pass_before_failure(_dut: SimHandle) -> Result<(), Failure> {
    Timer::new(10, TimeUnit::Us).await;
    Ok(())
}

async fn failure(_dut: SimHandle) -> Result<(), Failure> {
    check(false, "expected failure")
}

async fn pass_after_failure(_dut: SimHandle) -> Result<(), Failure> {
    Timer::new(10, TimeUnit::Us).await;
    Ok(())
}

#[test]
fn failure_propagation_keeps_regression_running() {
    let (summary, _report) = run_regression(
        |b| {
            b.add_signal("clk", 0).unwrap();
        },
        &[
            ("pass_before_failure", |dut| Box::pin(pass_before_failure(dut))),
            ("failure", |dut| Box::pin(failure(dut))),
            ("pass_after_failure", |dut| Box::pin(pass_after_failure(dut))),
        ],
    );
    assert_eq!(summary.tests.len(), 3);
    assert!(summary.tests[0].passed);
    assert!(!summary.tests[1].passed);
    assert_eq!(
        summary.tests[1].error.as_deref(),
        Some("Assertion failed: expected failure")
    );
    assert!(summary.tests[2].passed);
    assert_eq!(summary.exit_code(), 1);
}

thread_local! {
    static CLEANUP_ACTIVE_AFTER: Cell<Option<usize>> = const { Cell::new(None) };
}

async fn leaves_a_detached_clock(dut: SimHandle) -> Result<(), Failure> {
    let clk = dut.child("clk");
    let clock = start_soon(clock_gen(clk.clone(), 10, TimeUnit::Us));
    // Never joined and deliberately leaked: end-of-test cleanup owns it.
    std::mem::forget(clock);
    for _ in 0..3 {
        RisingEdge::new(&clk).await;
    }
    Ok(())
}

async fn observes_clean_scheduler(_dut: SimHandle) -> Result<(), Failure> {
    CLEANUP_ACTIVE_AFTER.set(Some(scheduler::active_task_count()));
    Timer::new(10, TimeUnit::Us).await;
    Ok(())
}

#[test]
fn detached_clock_is_cancelled_at_test_end() {
    let (summary, _report) = run_regression(
        |b| {
            b.add_signal("clk", 0).unwrap();
        },
        &[
            ("leaves_a_detached_clock", |dut| {
                Box::pin(leaves_a_detached_clock(dut))
            }),
            ("observes_clean_scheduler", |dut| {
                Box::pin(observes_clean_scheduler(dut))
            }),
        ],
    );
    assert_eq!(summary.failed(), 0);
    // The second test runs with only itself alive: the clock generator
    // did not survive the first test's cleanup.
    assert_eq!(CLEANUP_ACTIVE_AFTER.get(), Some(1));
    assert_eq!(scheduler::active_task_count(), 0);
}

async fn join_waits_for_child(_dut: SimHandle) -> Result<(), Failure> {
    let started = time::sim_time(TimeUnit::Step);
    let child = start_soon(async {
        Timer::new(100, TimeUnit::Step).await;
        Timer::new(100, TimeUnit::Step).await;
        Ok(())
    });
    child.await?;
    let elapsed = time::sim_time(TimeUnit::Step) - started;
    check(elapsed == 200, "joiner resumed before the child's 200 ticks elapsed")
}

async fn join_propagates_child_failure(_dut: SimHandle) -> Result<(), Failure> {
    let child = start_soon(async {
        Timer::new(100, TimeUnit::Step).await;
        Timer::new(100, TimeUnit::Step).await;
        Err(Failure::msg("child blew up"))
    });
    match child.await {
        Err(Failure::Message(m)) if m == "child blew up" => Ok(()),
        Err(other) => Err(Failure::msg(format!("wrong failure: {other}"))),
        Ok(()) => Err(Failure::assertion("child failure did not propagate")),
    }
}

#[test]
fn join_semantics() {
    let (summary, _report) = run_regression(
        |b| {
            b.add_signal("clk", 0).unwrap();
        },
        &[
            ("join_waits_for_child", |dut| Box::pin(join_waits_for_child(dut))),
            ("join_propagates_child_failure", |dut| {
                Box::pin(join_propagates_child_failure(dut))
            }),
        ],
    );
    assert_eq!(summary.failed(), 0, "{:?}", summary.tests);
}

async fn join_observes_child_writes(dut: SimHandle) -> Result<(), Failure> {
    let flag = dut.child("flag");
    let writer = flag.clone();
    let child = start_soon(async move {
        Timer::new(10, TimeUnit::Step).await;
        writer.value().set(1);
        Ok(())
    });
    child.await?;
    // The completion-to-joiner handoff inserts one delta cycle, so the
    // simulator has observed the child's write by now.
    check(flag.value().as_u32() == 1, "joiner saw a stale value")
}

#[test]
fn write_ordering_across_join() {
    let (summary, _report) = run_regression(
        |b| {
            b.add_signal("flag", 0).unwrap();
        },
        &[("join_observes_child_writes", |dut| {
            Box::pin(join_observes_child_writes(dut))
        })],
    );
    assert_eq!(summary.failed(), 0, "{:?}", summary.tests);
}

async fn zero_delay_timer_completes_at_time_zero(_dut: SimHandle) -> Result<(), Failure> {
    Timer::new(0, TimeUnit::Us).await;
    check(time::sim_time(TimeUnit::Step) == 0, "zero-delay timer advanced time")
}

async fn synchronous_child_still_fires_joiner(_dut: SimHandle) -> Result<(), Failure> {
    let child = start_soon(async { Ok(()) });
    child.await
}

thread_local! {
    static CANCELLED_BODY_RAN: Cell<bool> = const { Cell::new(false) };
}

async fn cancel_before_first_resume(_dut: SimHandle) -> Result<(), Failure> {
    let doomed = start_soon(async {
        CANCELLED_BODY_RAN.set(true);
        Ok(())
    });
    drop(doomed);
    Timer::new(10, TimeUnit::Step).await;
    check(!CANCELLED_BODY_RAN.get(), "cancelled task body executed")
}

async fn readonly_writes_deferred(dut: SimHandle) -> Result<(), Failure> {
    let flag = dut.child("flag");
    ReadOnly::new().await;
    flag.value().set(1);
    Timer::new(10, TimeUnit::Step).await;
    Timer::new(10, TimeUnit::Step).await;
    check(flag.value().as_u32() == 1, "readonly-deferred write never landed")
}

#[test]
fn boundary_behaviors() {
    let (summary, _report) = run_regression(
        |b| {
            b.add_signal("flag", 0).unwrap();
        },
        &[
            ("zero_delay_timer_completes_at_time_zero", |dut| {
                Box::pin(zero_delay_timer_completes_at_time_zero(dut))
            }),
            ("synchronous_child_still_fires_joiner", |dut| {
                Box::pin(synchronous_child_still_fires_joiner(dut))
            }),
            ("cancel_before_first_resume", |dut| {
                Box::pin(cancel_before_first_resume(dut))
            }),
            ("readonly_writes_deferred", |dut| {
                Box::pin(readonly_writes_deferred(dut))
            }),
        ],
    );
    assert_eq!(summary.failed(), 0, "{:?}", summary.tests);
}

async fn panicking_body(_dut: SimHandle) -> Result<(), Failure> {
    Timer::new(5, TimeUnit::Step).await;
    panic!("unexpected state");
}

#[test]
fn panic_in_test_body_fails_the_test_only() {
    let (summary, _report) = run_regression(
        |b| {
            b.add_signal("clk", 0).unwrap();
        },
        &[
            ("panicking_body", |dut| Box::pin(panicking_body(dut))),
            ("pass_after_failure", |dut| Box::pin(pass_after_failure(dut))),
        ],
    );
    assert_eq!(summary.tests.len(), 2);
    assert!(!summary.tests[0].passed);
    assert!(summary.tests[0]
        .error
        .as_deref()
        .unwrap()
        .contains("unexpected state"));
    assert!(summary.tests[1].passed);
}

#[test]
fn missing_root_handle_runs_no_tests() {
    // No backend: every root lookup fails, so the start-of-simulation
    // handler must log and bail without starting the regression.
    gpi::clear_backend();
    runner::register_test("never_runs", |dut| Box::pin(pass_before_failure(dut)));
    runner::start_of_simulation();
    assert!(runner::take_summary().is_none());
}
