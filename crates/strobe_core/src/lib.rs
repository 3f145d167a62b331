//! Cooperative coroutine scheduler for hardware-simulation testbenches.
//!
//! Stimulus, checking, and bus-functional models are written as `async`
//! task bodies that synchronize with a digital logic simulator through
//! the Generic Programmer Interface (GPI): a narrow callback surface for
//! handle lookup, signal I/O, time query, and phase callbacks. The
//! scheduler delivers timer expirations, signal edges, and task
//! completions to waiting tasks, defers signal writes to the simulator's
//! writable phase, and runs a regression over the registered tests.
//!
//! # Writing a test
//!
//! ```ignore
//! use strobe_core::{check, RisingEdge, SimHandle, Failure, Timer, TimeUnit};
//!
//! async fn dff_follows_d(dut: SimHandle) -> Result<(), Failure> {
//!     let _clk = strobe_core::start_soon(strobe_core::clock_gen(
//!         dut.child("clk"), 10, TimeUnit::Us));
//!     dut.child("d").value().set(1);
//!     RisingEdge::new(&dut.child("clk")).await;
//!     RisingEdge::new(&dut.child("clk")).await;
//!     check(dut.child("q").value().as_u32() == 1, "q did not follow d")
//! }
//!
//! strobe_core::register_test("dff_follows_d", |dut| Box::pin(dff_follows_d(dut)));
//! ```
//!
//! # Modules
//!
//! - `error` — task failure types
//! - `time` — time units and precision conversion
//! - `gpi` — the simulator surface and per-thread backend registry
//! - `logging` — simulation-time-stamped console logging
//! - `handle` — design handles and the typed value accessor
//! - `task` — spawning, joining, cancellation
//! - `trigger` — awaitables: timers, edges, phase barriers
//! - `scheduler` — ready drain, deferred writes, phase state machine
//! - `runner` — test registry, serial execution, summary banner
//! - `stimulus` — reusable stimulus routines (clock generator)
//! - `ffi` — C-ABI adapter and loader entry point (feature `c-gpi`)

#![warn(missing_docs)]

pub mod error;
#[cfg(feature = "c-gpi")]
pub mod ffi;
pub mod gpi;
pub mod handle;
pub mod logging;
pub mod runner;
pub mod scheduler;
pub mod stimulus;
pub mod task;
pub mod time;
pub mod trigger;

pub use error::{check, Failure, TbResult};
pub use handle::{SimHandle, Value};
pub use runner::{register_test, RegressionSummary, TestResult};
pub use scheduler::TaskId;
pub use stimulus::clock_gen;
pub use task::{spawn, start_soon, Join, JoinHandle, Task};
pub use time::{sim_time, TimeUnit};
pub use trigger::{FallingEdge, ReadOnly, ReadWrite, RisingEdge, Timer, ValueChange};
