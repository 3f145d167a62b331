//! The `STROBE_RESULTS` environment variable makes the runner write the
//! regression summary as JSON.
//!
//! Kept in its own integration binary because environment variables are
//! process-global.

use std::rc::Rc;

use strobe_core::error::{check, Failure};
use strobe_core::gpi;
use strobe_core::handle::SimHandle;
use strobe_core::runner::{self, RegressionSummary};
use strobe_core::time::TimeUnit;
use strobe_core::trigger::Timer;
use strobe_sim::{SimBuilder, Simulator};

async fn passes(_dut: SimHandle) -> Result<(), Failure> {
    Timer::new(1, TimeUnit::Us).await;
    Ok(())
}

async fn fails(_dut: SimHandle) -> Result<(), Failure> {
    check(false, "recorded in the report")
}

#[test]
fn results_file_is_written() {
    let path = std::env::temp_dir().join("strobe_results_test.json");
    std::env::set_var("STROBE_RESULTS", &path);

    let mut builder = SimBuilder::new("top");
    builder.add_signal("clk", 0).unwrap();
    let sim: Rc<Simulator> = builder.build();

    gpi::set_backend(sim.clone());
    runner::register_test("passes", |dut| Box::pin(passes(dut)));
    runner::register_test("fails", |dut| Box::pin(fails(dut)));
    runner::bind_to_simulation();
    sim.run().expect("simulation error");
    gpi::clear_backend();

    let json = std::fs::read_to_string(&path).expect("results file missing");
    let summary: RegressionSummary = serde_json::from_str(&json).expect("invalid results JSON");
    assert_eq!(summary.tests.len(), 2);
    assert_eq!(summary.passed(), 1);
    assert_eq!(summary.failed(), 1);
    assert_eq!(
        summary.tests[1].error.as_deref(),
        Some("Assertion failed: recorded in the report")
    );
    std::fs::remove_file(&path).ok();
}
