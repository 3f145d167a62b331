//! The embedded simulation kernel: flat signal store, timed-event queue,
//! and the delta-cycle loop with phase callbacks.
//!
//! [`Simulator`] implements the GPI surface in-process so a whole
//! regression can run without an external simulator. Each time step is
//! processed in phases: next-time-step callbacks, delta-cycle settling
//! (deposits applied, edges detected, models evaluated), timed callbacks
//! due at the current time, readwrite batches, then the readonly batch.
//! Signal writes deposited during any callback are applied in the next
//! delta, never synchronously, which is what gives the testbench its
//! read-old-value-at-the-edge semantics.
//!
//! State lives in a `RefCell` borrowed only in short, non-reentrant
//! chunks; every callback is invoked with no borrow held, so callbacks
//! are free to call back into the GPI surface.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::rc::Rc;

use log::warn;

use strobe_core::gpi::{Callback, CbHandle, EdgeKind, Gpi, RawHandle, SetAction};
use strobe_core::time::TimeUnit;

use crate::error::SimError;
use crate::model::{Model, SignalView};

/// Opaque ID of a signal in the flat store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SignalId(u32);

impl SignalId {
    /// Creates a `SignalId` from a raw index.
    pub fn from_raw(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw index.
    pub fn as_raw(self) -> u32 {
        self.0
    }
}

/// Raw-handle encoding: 1 is the design root, signal `i` maps to `i + 2`.
const ROOT_HANDLE: RawHandle = RawHandle(1);

fn signal_handle(id: SignalId) -> RawHandle {
    RawHandle(u64::from(id.0) + 2)
}

fn handle_signal(handle: RawHandle) -> Option<SignalId> {
    handle.0.checked_sub(2).map(|i| SignalId(i as u32))
}

pub(crate) struct SignalState {
    pub(crate) name: String,
    pub(crate) value: i64,
    pub(crate) prev: i64,
}

struct TimedEvent {
    time: u64,
    seq: u64,
    cb: Callback,
}

impl PartialEq for TimedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for TimedEvent {}

impl PartialOrd for TimedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimedEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.time.cmp(&other.time).then(self.seq.cmp(&other.seq))
    }
}

struct EdgeCallback {
    signal: SignalId,
    edge: EdgeKind,
    cb: Callback,
}

struct SimState {
    top: String,
    named_root_only: bool,
    precision: i32,
    now: u64,
    seq: u64,
    finished: bool,
    time_limit: Option<u64>,
    max_delta_per_step: u32,
    signals: Vec<SignalState>,
    models: Vec<Box<dyn Model>>,
    timed: BinaryHeap<Reverse<TimedEvent>>,
    deposits: Vec<(SignalId, i64)>,
    updates: Vec<(SignalId, i64)>,
    edge_cbs: Vec<EdgeCallback>,
    rw_cbs: Vec<Callback>,
    ro_cbs: Vec<Callback>,
    nexttime_cbs: Vec<Callback>,
    start_cbs: Vec<Callback>,
    end_cbs: Vec<Callback>,
}

/// Result of a completed simulation run.
#[derive(Clone, Copy, Debug)]
pub struct SimReport {
    /// Final simulation time in precision ticks.
    pub final_time: u64,
    /// True if the run ended via [`Gpi::finish`] rather than event-queue
    /// exhaustion or the time limit.
    pub finished_by_user: bool,
    /// Total delta cycles executed.
    pub total_deltas: u64,
}

/// Builder for an embedded simulation.
pub struct SimBuilder {
    top: String,
    named_root_only: bool,
    precision: i32,
    time_limit: Option<u64>,
    max_delta_per_step: u32,
    signals: Vec<SignalState>,
    models: Vec<Box<dyn Model>>,
}

impl SimBuilder {
    /// Starts a design named `top` with nanosecond precision.
    pub fn new(top: &str) -> Self {
        SimBuilder {
            top: top.to_string(),
            named_root_only: false,
            precision: TimeUnit::Ns.exponent(),
            time_limit: None,
            max_delta_per_step: 10_000,
            signals: Vec::new(),
            models: Vec::new(),
        }
    }

    /// Sets the simulator precision.
    pub fn set_precision(&mut self, unit: TimeUnit) -> &mut Self {
        self.precision = unit.exponent();
        self
    }

    /// Makes unqualified root lookups fail, as some simulators do; the
    /// root must then be requested by its top-level name.
    pub fn require_named_root(&mut self) -> &mut Self {
        self.named_root_only = true;
        self
    }

    /// Bounds the run to `ticks` of simulated time.
    pub fn set_time_limit(&mut self, ticks: u64) -> &mut Self {
        self.time_limit = Some(ticks);
        self
    }

    /// Declares a scalar signal with an initial value.
    pub fn add_signal(&mut self, name: &str, init: i64) -> Result<SignalId, SimError> {
        if self.signals.iter().any(|s| s.name == name) {
            return Err(SimError::DuplicateSignal(name.to_string()));
        }
        let id = SignalId(self.signals.len() as u32);
        self.signals.push(SignalState {
            name: name.to_string(),
            value: init,
            prev: init,
        });
        Ok(id)
    }

    /// Attaches a behavioral model.
    pub fn add_model(&mut self, model: impl Model + 'static) -> &mut Self {
        self.models.push(Box::new(model));
        self
    }

    /// Finishes construction.
    pub fn build(self) -> Rc<Simulator> {
        Rc::new(Simulator {
            state: RefCell::new(SimState {
                top: self.top,
                named_root_only: self.named_root_only,
                precision: self.precision,
                now: 0,
                seq: 0,
                finished: false,
                time_limit: self.time_limit,
                max_delta_per_step: self.max_delta_per_step,
                signals: self.signals,
                models: self.models,
                timed: BinaryHeap::new(),
                deposits: Vec::new(),
                updates: Vec::new(),
                edge_cbs: Vec::new(),
                rw_cbs: Vec::new(),
                ro_cbs: Vec::new(),
                nexttime_cbs: Vec::new(),
                start_cbs: Vec::new(),
                end_cbs: Vec::new(),
            }),
        })
    }
}

/// The in-process simulator.
///
/// Register it as the GPI backend, then call [`Simulator::run`]:
///
/// ```ignore
/// let sim = builder.build();
/// strobe_core::gpi::set_backend(sim.clone());
/// strobe_core::runner::bind_to_simulation();
/// let report = sim.run()?;
/// ```
pub struct Simulator {
    state: RefCell<SimState>,
}

impl Simulator {
    /// Current simulation time in precision ticks.
    pub fn now(&self) -> u64 {
        self.state.borrow().now
    }

    /// Reads a signal directly, bypassing the GPI (test convenience).
    pub fn peek(&self, id: SignalId) -> i64 {
        self.state.borrow().signals[id.0 as usize].value
    }

    /// Runs the simulation: fires start-of-simulation callbacks, loops
    /// until the event queue drains, the time limit is reached, or
    /// [`Gpi::finish`] is called, then fires end-of-simulation callbacks.
    pub fn run(&self) -> Result<SimReport, SimError> {
        let mut total_deltas: u64 = 0;
        let mut deltas_this_step: u32 = 0;

        for cb in self.take_start_cbs() {
            cb();
        }

        let finished_by_user = loop {
            if self.state.borrow().finished {
                break true;
            }
            if self.settle_one_delta()? {
                total_deltas += 1;
                deltas_this_step += 1;
                let (max, now) = {
                    let s = self.state.borrow();
                    (s.max_delta_per_step, s.now)
                };
                if deltas_this_step > max {
                    return Err(SimError::DeltaCycleLimit {
                        time: now,
                        max_deltas: max,
                    });
                }
                continue;
            }
            if self.fire_due_timers() {
                continue;
            }
            if self.fire_batch(|s| std::mem::take(&mut s.rw_cbs)) {
                continue;
            }
            if self.fire_batch(|s| std::mem::take(&mut s.ro_cbs)) {
                continue;
            }
            deltas_this_step = 0;
            if !self.advance_time() {
                break false;
            }
        };

        for cb in self.take_end_cbs() {
            cb();
        }

        let state = self.state.borrow();
        Ok(SimReport {
            final_time: state.now,
            finished_by_user,
            total_deltas,
        })
    }

    fn take_start_cbs(&self) -> Vec<Callback> {
        std::mem::take(&mut self.state.borrow_mut().start_cbs)
    }

    fn take_end_cbs(&self) -> Vec<Callback> {
        std::mem::take(&mut self.state.borrow_mut().end_cbs)
    }

    /// Applies one delta cycle of pending deposits and model updates.
    /// Returns true if anything was applied.
    fn settle_one_delta(&self) -> Result<bool, SimError> {
        let fired = {
            let mut s = self.state.borrow_mut();
            if s.deposits.is_empty() && s.updates.is_empty() {
                return Ok(false);
            }

            // Apply the batch, recording which signals actually changed.
            let mut changed: HashSet<SignalId> = HashSet::new();
            let deposits = std::mem::take(&mut s.deposits);
            let updates = std::mem::take(&mut s.updates);
            for (id, value) in deposits.into_iter().chain(updates) {
                let sig = &mut s.signals[id.0 as usize];
                if sig.value != value {
                    sig.prev = sig.value;
                    sig.value = value;
                    changed.insert(id);
                }
            }
            if changed.is_empty() {
                return Ok(true);
            }

            // Evaluate models sensitive to the changed signals; their
            // outputs land in the next delta.
            let mut models = std::mem::take(&mut s.models);
            for model in &mut models {
                if model.sensitivity().iter().any(|id| changed.contains(id)) {
                    let new_updates = {
                        let view = SignalView::new(&s.signals, &changed);
                        model.eval(&view)
                    };
                    s.updates.extend(new_updates);
                }
            }
            s.models = models;

            // Collect matching one-shot edge callbacks.
            let mut fired = Vec::new();
            let mut kept = Vec::new();
            for entry in std::mem::take(&mut s.edge_cbs) {
                if changed.contains(&entry.signal) && edge_matches(&s.signals, &entry) {
                    fired.push(entry.cb);
                } else {
                    kept.push(entry);
                }
            }
            s.edge_cbs = kept;
            fired
        };

        for cb in fired {
            cb();
        }
        Ok(true)
    }

    /// Fires all timed callbacks due at the current time. Returns true if
    /// any fired.
    fn fire_due_timers(&self) -> bool {
        let due = {
            let mut s = self.state.borrow_mut();
            let now = s.now;
            let mut due = Vec::new();
            while let Some(Reverse(event)) = s.timed.peek() {
                if event.time > now {
                    break;
                }
                let Some(Reverse(event)) = s.timed.pop() else {
                    break;
                };
                due.push(event.cb);
            }
            due
        };
        if due.is_empty() {
            return false;
        }
        for cb in due {
            cb();
        }
        true
    }

    fn fire_batch(&self, take: impl FnOnce(&mut SimState) -> Vec<Callback>) -> bool {
        let batch = take(&mut self.state.borrow_mut());
        if batch.is_empty() {
            return false;
        }
        for cb in batch {
            cb();
        }
        true
    }

    /// Advances to the next scheduled time, firing next-time-step
    /// callbacks. Returns false when nothing remains or the time limit is
    /// exceeded.
    ///
    /// Logging happens after the state borrow is released; the logger
    /// reads simulation time back through the GPI.
    fn advance_time(&self) -> bool {
        enum Step {
            Exhausted,
            LimitReached(u64),
            Advanced(Vec<Callback>),
        }
        let step = {
            let mut s = self.state.borrow_mut();
            match s.timed.peek() {
                None => Step::Exhausted,
                Some(Reverse(event)) => {
                    let next = event.time;
                    if s.time_limit.is_some_and(|limit| next > limit) {
                        Step::LimitReached(s.now)
                    } else {
                        debug_assert!(next > s.now, "time must advance monotonically");
                        s.now = next;
                        Step::Advanced(std::mem::take(&mut s.nexttime_cbs))
                    }
                }
            }
        };
        match step {
            Step::Exhausted => false,
            Step::LimitReached(now) => {
                warn!(target: "strobe.sim", "time limit reached at {now} ticks");
                false
            }
            Step::Advanced(nexttime) => {
                for cb in nexttime {
                    cb();
                }
                true
            }
        }
    }
}

fn edge_matches(signals: &[SignalState], entry: &EdgeCallback) -> bool {
    let sig = &signals[entry.signal.0 as usize];
    match entry.edge {
        EdgeKind::Rising => sig.prev == 0 && sig.value != 0,
        EdgeKind::Falling => sig.prev != 0 && sig.value == 0,
        EdgeKind::Any => true,
    }
}

impl Gpi for Simulator {
    fn root_handle(&self, name: Option<&str>) -> Option<RawHandle> {
        let s = self.state.borrow();
        match name {
            None if s.named_root_only => None,
            None => Some(ROOT_HANDLE),
            Some(requested) if requested == s.top => Some(ROOT_HANDLE),
            Some(_) => None,
        }
    }

    fn handle_by_name(&self, parent: RawHandle, name: &str) -> Option<RawHandle> {
        if parent != ROOT_HANDLE {
            return None;
        }
        let s = self.state.borrow();
        s.signals
            .iter()
            .position(|sig| sig.name == name)
            .map(|i| signal_handle(SignalId(i as u32)))
    }

    fn signal_value_i64(&self, handle: RawHandle) -> i64 {
        let s = self.state.borrow();
        handle_signal(handle)
            .and_then(|id| s.signals.get(id.0 as usize))
            .map(|sig| sig.value)
            .unwrap_or(0)
    }

    fn signal_value_f64(&self, handle: RawHandle) -> f64 {
        self.signal_value_i64(handle) as f64
    }

    fn set_signal_value(&self, handle: RawHandle, value: i64, action: SetAction) {
        if action == SetAction::Release {
            return;
        }
        let accepted = {
            let mut s = self.state.borrow_mut();
            match handle_signal(handle).filter(|id| (id.0 as usize) < s.signals.len()) {
                Some(id) => {
                    s.deposits.push((id, value));
                    true
                }
                None => false,
            }
        };
        if !accepted {
            warn!(target: "strobe.sim", "deposit on unknown handle {handle:?}");
        }
    }

    fn sim_time(&self) -> u64 {
        self.state.borrow().now
    }

    fn sim_precision(&self) -> i32 {
        self.state.borrow().precision
    }

    fn register_timed_callback(&self, delay_ticks: u64, cb: Callback) -> Option<CbHandle> {
        let mut s = self.state.borrow_mut();
        s.seq += 1;
        let seq = s.seq;
        let time = s.now.saturating_add(delay_ticks);
        s.timed.push(Reverse(TimedEvent { time, seq, cb }));
        Some(CbHandle(seq))
    }

    fn register_value_change_callback(
        &self,
        signal: RawHandle,
        edge: EdgeKind,
        cb: Callback,
    ) -> Option<CbHandle> {
        let mut s = self.state.borrow_mut();
        let id = handle_signal(signal).filter(|id| (id.0 as usize) < s.signals.len())?;
        s.seq += 1;
        let seq = s.seq;
        s.edge_cbs.push(EdgeCallback {
            signal: id,
            edge,
            cb,
        });
        Some(CbHandle(seq))
    }

    fn register_readwrite_callback(&self, cb: Callback) -> Option<CbHandle> {
        let mut s = self.state.borrow_mut();
        s.seq += 1;
        s.rw_cbs.push(cb);
        Some(CbHandle(s.seq))
    }

    fn register_readonly_callback(&self, cb: Callback) -> Option<CbHandle> {
        let mut s = self.state.borrow_mut();
        s.seq += 1;
        s.ro_cbs.push(cb);
        Some(CbHandle(s.seq))
    }

    fn register_nexttime_callback(&self, cb: Callback) -> Option<CbHandle> {
        let mut s = self.state.borrow_mut();
        s.seq += 1;
        s.nexttime_cbs.push(cb);
        Some(CbHandle(s.seq))
    }

    fn register_start_of_sim_callback(&self, cb: Callback) -> Option<CbHandle> {
        let mut s = self.state.borrow_mut();
        s.seq += 1;
        s.start_cbs.push(cb);
        Some(CbHandle(s.seq))
    }

    fn register_end_of_sim_callback(&self, cb: Callback) -> Option<CbHandle> {
        let mut s = self.state.borrow_mut();
        s.seq += 1;
        s.end_cbs.push(cb);
        Some(CbHandle(s.seq))
    }

    fn finish(&self) {
        self.state.borrow_mut().finished = true;
    }
}
