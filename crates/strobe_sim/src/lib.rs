//! In-process event-driven simulator backend for strobe testbenches.
//!
//! Implements the GPI surface over a flat signal store with delta-cycle
//! settling, edge detection, behavioral models, and the phase-callback
//! machinery the scheduler expects (timed, value-change, readwrite,
//! readonly, next-time-step, start/end of simulation). Regressions run
//! against it exactly as they would against an external simulator, which
//! is what the integration test suites do.
//!
//! # Modules
//!
//! - `error` — builder and run errors
//! - `kernel` — signal store, event queue, delta-cycle loop, GPI impl
//! - `model` — behavioral models (D flip-flop, AXI-Lite register file)

#![warn(missing_docs)]

pub mod error;
pub mod kernel;
pub mod model;

pub use error::SimError;
pub use kernel::{SimBuilder, SimReport, SignalId, Simulator};
pub use model::{AxiLitePorts, AxiLiteRegFile, Dff, Model, SignalView};
