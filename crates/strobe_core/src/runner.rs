//! The regression runner: ordered test registry, serial execution, result
//! collection, and the end-of-run summary banner.
//!
//! Tests run one at a time. The runner spawns the test body as a detached
//! top-level task and drains the scheduler; when that task completes the
//! scheduler hands control back here, where the stored failure is
//! inspected, leftover child tasks are cancelled, and the next test
//! starts. The per-thread singleton mirrors the scheduler's: each OS
//! thread is an isolated regression.

use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::gpi;
use crate::handle::SimHandle;
use crate::scheduler::{self, Scheduler, TaskId};
use crate::task::TaskBody;

/// A test body: takes the design root and returns the boxed task future.
pub type TestFn = fn(SimHandle) -> TaskBody;

/// Outcome of a single test.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestResult {
    /// Registered test name.
    pub name: String,
    /// True if the body returned without a stored failure.
    pub passed: bool,
    /// Wall-clock execution time in seconds.
    pub wall_seconds: f64,
    /// The failure message for failed tests.
    pub error: Option<String>,
}

/// Results of a whole regression.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RegressionSummary {
    /// Per-test outcomes, in registration order.
    pub tests: Vec<TestResult>,
}

impl RegressionSummary {
    /// Number of passing tests.
    pub fn passed(&self) -> usize {
        self.tests.iter().filter(|t| t.passed).count()
    }

    /// Number of failing tests.
    pub fn failed(&self) -> usize {
        self.tests.iter().filter(|t| !t.passed).count()
    }

    /// The process exit code: zero iff every test passed.
    pub fn exit_code(&self) -> i32 {
        if self.failed() == 0 {
            0
        } else {
            1
        }
    }
}

struct TestSpec {
    name: String,
    body: TestFn,
}

struct CurrentTest {
    id: TaskId,
    name: String,
    started: Instant,
}

#[derive(Default)]
struct TestRunner {
    tests: Vec<TestSpec>,
    results: Vec<TestResult>,
    dut: Option<SimHandle>,
    current: Option<CurrentTest>,
    next_index: usize,
    summary: Option<RegressionSummary>,
}

thread_local! {
    static RUNNER: RefCell<TestRunner> = RefCell::new(TestRunner::default());
}

/// Appends a test to the registry. Tests run in registration order.
pub fn register_test(name: &str, body: TestFn) {
    RUNNER.with(|r| {
        r.borrow_mut().tests.push(TestSpec {
            name: name.to_string(),
            body,
        });
    });
}

/// Registers the start/end-of-simulation handlers with the GPI.
///
/// Call once after the backend is in place; the runner then starts the
/// regression when the simulator reports start of simulation.
pub fn bind_to_simulation() {
    if gpi::register_start_of_sim_callback(Box::new(start_of_simulation)).is_none() {
        error!(target: "strobe.regression", "failed to register start-of-simulation callback");
        return;
    }
    gpi::register_end_of_sim_callback(Box::new(|| {
        info!(target: "strobe.regression", "end of simulation");
    }));
}

/// Start-of-simulation handler: resolves the design root and runs all
/// registered tests.
///
/// The unqualified root lookup is preferred; if it fails, the `TOPLEVEL`
/// environment variable names the top module. Without a root the runner
/// logs an error and never starts.
pub fn start_of_simulation() {
    info!(target: "strobe.regression", "start of simulation");
    let root = gpi::root_handle(None).or_else(|| {
        std::env::var("TOPLEVEL")
            .ok()
            .and_then(|top| gpi::root_handle(Some(&top)))
    });
    let Some(root) = root else {
        error!(target: "strobe.regression", "failed to get root handle; no tests will run");
        return;
    };
    start_all_tests(SimHandle::from_raw(root));
}

/// Begins the regression against the given design root.
pub fn start_all_tests(dut: SimHandle) {
    let count = RUNNER.with(|r| {
        let mut r = r.borrow_mut();
        r.dut = Some(dut);
        r.results.clear();
        r.summary = None;
        r.next_index = 0;
        r.tests.len()
    });
    info!(target: "strobe.regression", "running {count} test(s)");
    run_next_test();
}

fn run_next_test() {
    let next = RUNNER.with(|r| {
        let mut r = r.borrow_mut();
        if r.next_index >= r.tests.len() {
            return None;
        }
        let index = r.next_index;
        r.next_index += 1;
        let spec = &r.tests[index];
        let dut = r.dut.clone();
        Some((index, spec.name.clone(), spec.body, dut))
    });

    let Some((index, name, body, dut)) = next else {
        report_results();
        gpi::finish();
        return;
    };
    let Some(dut) = dut else {
        return;
    };

    let total = RUNNER.with(|r| r.borrow().tests.len());
    info!(
        target: "strobe.regression",
        "running {name} ({}/{total})",
        index + 1
    );
    let started = Instant::now();

    match catch_unwind(AssertUnwindSafe(|| body(dut))) {
        Ok(future) => {
            let id = Scheduler::with(|s| {
                let id = s.spawn_suspended(future);
                s.set_detached(id);
                id
            });
            RUNNER.with(|r| {
                r.borrow_mut().current = Some(CurrentTest {
                    id,
                    name,
                    started,
                });
            });
            scheduler::schedule(id);
            scheduler::run_ready(true);
        }
        Err(payload) => {
            // The body panicked before producing a task; the test never
            // suspends, so record it failed and move on.
            let failure = crate::error::Failure::from_panic(payload);
            record_result(TestResult {
                name,
                passed: false,
                wall_seconds: started.elapsed().as_secs_f64(),
                error: Some(failure.to_string()),
            });
            run_next_test();
        }
    }
}

/// Returns true if `id` is the currently running top-level test task.
pub(crate) fn is_current_test(id: TaskId) -> bool {
    RUNNER.with(|r| {
        r.borrow()
            .current
            .as_ref()
            .is_some_and(|cur| cur.id == id)
    })
}

/// Completion path for the top-level test task, called by the scheduler's
/// drain. Idempotent: a second call with no test in flight is a no-op.
pub(crate) fn on_test_complete() {
    let Some(current) = RUNNER.with(|r| r.borrow_mut().current.take()) else {
        return;
    };
    let wall_seconds = current.started.elapsed().as_secs_f64();
    let failure = Scheduler::with(|s| s.stored_failure(current.id));

    // Cancel leftover children and drain once so already-finished ones are
    // destroyed; tasks still parked on simulator callbacks die when their
    // callbacks fire.
    scheduler::cancel_all_except(Some(current.id));
    scheduler::run_ready(true);
    scheduler::destroy_task(current.id);

    let result = TestResult {
        name: current.name,
        passed: failure.is_none(),
        wall_seconds,
        error: failure.map(|f| f.to_string()),
    };
    if result.passed {
        info!(
            target: "strobe.regression",
            "{} passed  execution time: {:.3} s", result.name, result.wall_seconds
        );
    } else {
        info!(
            target: "strobe.regression",
            "{} failed  execution time: {:.3} s", result.name, result.wall_seconds
        );
        if let Some(message) = &result.error {
            error!(target: "strobe.regression", "  {message}");
        }
    }
    record_result(result);
    run_next_test();
}

fn record_result(result: TestResult) {
    RUNNER.with(|r| r.borrow_mut().results.push(result));
}

fn report_results() {
    let summary = RUNNER.with(|r| {
        let mut r = r.borrow_mut();
        let summary = RegressionSummary {
            tests: std::mem::take(&mut r.results),
        };
        r.summary = Some(summary.clone());
        summary
    });

    let separator = "*".repeat(60);
    info!(target: "strobe.regression", "{separator}");
    info!(
        target: "strobe.regression",
        "** {:<30} {:<8} {:>13} **", "TEST", "STATUS", "REAL TIME (s)"
    );
    info!(target: "strobe.regression", "{separator}");
    for test in &summary.tests {
        let status = if test.passed { "PASS" } else { "FAIL" };
        info!(
            target: "strobe.regression",
            "** {:<30} {:<8} {:>13.3} **", test.name, status, test.wall_seconds
        );
        if let Some(message) = &test.error {
            error!(target: "strobe.regression", "**   {message}");
        }
    }
    info!(target: "strobe.regression", "{separator}");
    info!(
        target: "strobe.regression",
        "** TESTS={} PASS={} FAIL={}",
        summary.tests.len(),
        summary.passed(),
        summary.failed()
    );
    info!(target: "strobe.regression", "{separator}");

    if let Ok(path) = std::env::var("STROBE_RESULTS") {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    error!(target: "strobe.regression", "failed to write {path}: {e}");
                }
            }
            Err(e) => {
                error!(target: "strobe.regression", "failed to serialize results: {e}");
            }
        }
    }
}

/// Takes the summary produced by the last completed regression, if any.
pub fn take_summary() -> Option<RegressionSummary> {
    RUNNER.with(|r| r.borrow_mut().summary.take())
}

/// The exit code of the last completed regression, if one has finished.
pub fn exit_code() -> Option<i32> {
    RUNNER.with(|r| r.borrow().summary.as_ref().map(|s| s.exit_code()))
}
