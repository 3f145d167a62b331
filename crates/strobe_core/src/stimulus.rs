//! Reusable stimulus routines.

use crate::error::Failure;
use crate::handle::SimHandle;
use crate::time::TimeUnit;
use crate::trigger::Timer;

/// Drives a free-running clock on `clk`: low for half the period, then
/// high for the other half, forever.
///
/// Start it detached and let end-of-test cleanup cancel it:
///
/// ```ignore
/// let _clk = start_soon(clock_gen(dut.child("clk"), 10, TimeUnit::Us));
/// ```
pub async fn clock_gen(clk: SimHandle, period: u64, unit: TimeUnit) -> Result<(), Failure> {
    let half = period / 2;
    let value = clk.value();
    loop {
        value.set(0);
        Timer::new(half, unit).await;
        value.set(1);
        Timer::new(half, unit).await;
    }
}
