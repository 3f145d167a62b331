//! The Generic Programmer Interface: the narrow surface between the
//! testbench and the simulator.
//!
//! [`Gpi`] is the contract a simulator backend implements: handle lookup,
//! signal read/write, time query, and phase-callback registration. One
//! backend is registered per thread ([`set_backend`]); the free functions in
//! this module dispatch to it, mirroring the C-ABI function set one to one.
//! Raw GPI is not exposed outside the handle accessor and the scheduler's
//! callback plumbing.
//!
//! Everything here is single-threaded by design: the simulator is the only
//! event source and callbacks run on its thread, so the registry is a
//! thread-local and backends use interior mutability instead of locks.

use std::cell::RefCell;
use std::rc::Rc;

/// An opaque simulator object handle.
///
/// The null handle (`RawHandle::NULL`) marks a failed lookup; reads on it
/// return zero and writes are dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RawHandle(pub u64);

impl RawHandle {
    /// The invalid handle.
    pub const NULL: RawHandle = RawHandle(0);

    /// Returns true unless this is the null handle.
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// An opaque callback registration handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CbHandle(pub u64);

/// Which signal transitions fire a value-change callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Low-to-high transitions.
    Rising,
    /// High-to-low transitions.
    Falling,
    /// Any value change.
    Any,
}

/// How a signal write is applied by the simulator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SetAction {
    /// Deposit: behaves as if the design had driven the value.
    Deposit,
    /// Force the value, overriding design drivers.
    Force,
    /// Release a previous force.
    Release,
}

/// A one-shot callback carried into the simulator.
pub type Callback = Box<dyn FnOnce()>;

/// The simulator surface consumed by the testbench core.
///
/// Methods take `&self`; implementations use interior mutability. Callback
/// registrations return `None` when the simulator rejects the registration
/// (the C-ABI null callback handle).
pub trait Gpi {
    /// Looks up the root design handle, optionally by top-level name.
    fn root_handle(&self, name: Option<&str>) -> Option<RawHandle>;

    /// Looks up a named child of `parent`.
    fn handle_by_name(&self, parent: RawHandle, name: &str) -> Option<RawHandle>;

    /// Reads a signal as an integer.
    fn signal_value_i64(&self, handle: RawHandle) -> i64;

    /// Reads a signal as a real.
    fn signal_value_f64(&self, handle: RawHandle) -> f64;

    /// Writes a signal value. Must only be called from the simulator's
    /// writable phase; the scheduler guarantees this.
    fn set_signal_value(&self, handle: RawHandle, value: i64, action: SetAction);

    /// Returns the current simulation time in precision ticks.
    fn sim_time(&self) -> u64;

    /// Returns the simulator precision as a signed power-of-ten exponent.
    fn sim_precision(&self) -> i32;

    /// Registers a callback to fire after `delay_ticks` precision ticks.
    fn register_timed_callback(&self, delay_ticks: u64, cb: Callback) -> Option<CbHandle>;

    /// Registers a one-shot callback on a signal transition.
    fn register_value_change_callback(
        &self,
        signal: RawHandle,
        edge: EdgeKind,
        cb: Callback,
    ) -> Option<CbHandle>;

    /// Registers a callback for the next writable phase.
    fn register_readwrite_callback(&self, cb: Callback) -> Option<CbHandle>;

    /// Registers a callback for the next read-only phase.
    fn register_readonly_callback(&self, cb: Callback) -> Option<CbHandle>;

    /// Registers a callback for the beginning of the next time step.
    fn register_nexttime_callback(&self, cb: Callback) -> Option<CbHandle>;

    /// Registers a callback for the start of simulation.
    fn register_start_of_sim_callback(&self, cb: Callback) -> Option<CbHandle>;

    /// Registers a callback for the end of simulation.
    fn register_end_of_sim_callback(&self, cb: Callback) -> Option<CbHandle>;

    /// Requests simulator shutdown.
    fn finish(&self);
}

thread_local! {
    static BACKEND: RefCell<Option<Rc<dyn Gpi>>> = const { RefCell::new(None) };
}

/// Registers the simulator backend for the current thread.
pub fn set_backend(backend: Rc<dyn Gpi>) {
    BACKEND.with(|b| *b.borrow_mut() = Some(backend));
}

/// Removes the current thread's backend, if any.
pub fn clear_backend() {
    BACKEND.with(|b| *b.borrow_mut() = None);
}

/// Returns true if a backend is registered on this thread.
pub fn has_backend() -> bool {
    BACKEND.with(|b| b.borrow().is_some())
}

fn with_backend<R>(default: R, f: impl FnOnce(&dyn Gpi) -> R) -> R {
    let backend = BACKEND.with(|b| b.borrow().clone());
    match backend {
        Some(gpi) => f(gpi.as_ref()),
        None => default,
    }
}

/// See [`Gpi::root_handle`].
pub fn root_handle(name: Option<&str>) -> Option<RawHandle> {
    with_backend(None, |g| g.root_handle(name))
}

/// See [`Gpi::handle_by_name`].
pub fn handle_by_name(parent: RawHandle, name: &str) -> Option<RawHandle> {
    with_backend(None, |g| g.handle_by_name(parent, name))
}

/// See [`Gpi::signal_value_i64`].
pub fn signal_value_i64(handle: RawHandle) -> i64 {
    with_backend(0, |g| g.signal_value_i64(handle))
}

/// See [`Gpi::signal_value_f64`].
pub fn signal_value_f64(handle: RawHandle) -> f64 {
    with_backend(0.0, |g| g.signal_value_f64(handle))
}

/// See [`Gpi::set_signal_value`].
pub fn set_signal_value(handle: RawHandle, value: i64, action: SetAction) {
    with_backend((), |g| g.set_signal_value(handle, value, action));
}

/// See [`Gpi::sim_time`].
pub fn sim_time() -> u64 {
    with_backend(0, |g| g.sim_time())
}

/// See [`Gpi::sim_precision`].
pub fn sim_precision() -> i32 {
    with_backend(0, |g| g.sim_precision())
}

/// See [`Gpi::register_timed_callback`].
pub fn register_timed_callback(delay_ticks: u64, cb: Callback) -> Option<CbHandle> {
    with_backend(None, |g| g.register_timed_callback(delay_ticks, cb))
}

/// See [`Gpi::register_value_change_callback`].
pub fn register_value_change_callback(
    signal: RawHandle,
    edge: EdgeKind,
    cb: Callback,
) -> Option<CbHandle> {
    with_backend(None, |g| g.register_value_change_callback(signal, edge, cb))
}

/// See [`Gpi::register_readwrite_callback`].
pub fn register_readwrite_callback(cb: Callback) -> Option<CbHandle> {
    with_backend(None, |g| g.register_readwrite_callback(cb))
}

/// See [`Gpi::register_readonly_callback`].
pub fn register_readonly_callback(cb: Callback) -> Option<CbHandle> {
    with_backend(None, |g| g.register_readonly_callback(cb))
}

/// See [`Gpi::register_nexttime_callback`].
pub fn register_nexttime_callback(cb: Callback) -> Option<CbHandle> {
    with_backend(None, |g| g.register_nexttime_callback(cb))
}

/// See [`Gpi::register_start_of_sim_callback`].
pub fn register_start_of_sim_callback(cb: Callback) -> Option<CbHandle> {
    with_backend(None, |g| g.register_start_of_sim_callback(cb))
}

/// See [`Gpi::register_end_of_sim_callback`].
pub fn register_end_of_sim_callback(cb: Callback) -> Option<CbHandle> {
    with_backend(None, |g| g.register_end_of_sim_callback(cb))
}

/// See [`Gpi::finish`].
pub fn finish() {
    with_backend((), |g| g.finish());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Stub {
        time: Cell<u64>,
        finished: Cell<bool>,
    }

    impl Gpi for Stub {
        fn root_handle(&self, name: Option<&str>) -> Option<RawHandle> {
            match name {
                None | Some("top") => Some(RawHandle(1)),
                Some(_) => None,
            }
        }
        fn handle_by_name(&self, _parent: RawHandle, name: &str) -> Option<RawHandle> {
            (name == "clk").then_some(RawHandle(2))
        }
        fn signal_value_i64(&self, handle: RawHandle) -> i64 {
            handle.0 as i64
        }
        fn signal_value_f64(&self, handle: RawHandle) -> f64 {
            handle.0 as f64
        }
        fn set_signal_value(&self, _handle: RawHandle, _value: i64, _action: SetAction) {}
        fn sim_time(&self) -> u64 {
            self.time.get()
        }
        fn sim_precision(&self) -> i32 {
            -9
        }
        fn register_timed_callback(&self, _delay: u64, _cb: Callback) -> Option<CbHandle> {
            Some(CbHandle(1))
        }
        fn register_value_change_callback(
            &self,
            _signal: RawHandle,
            _edge: EdgeKind,
            _cb: Callback,
        ) -> Option<CbHandle> {
            None
        }
        fn register_readwrite_callback(&self, _cb: Callback) -> Option<CbHandle> {
            Some(CbHandle(2))
        }
        fn register_readonly_callback(&self, _cb: Callback) -> Option<CbHandle> {
            Some(CbHandle(3))
        }
        fn register_nexttime_callback(&self, _cb: Callback) -> Option<CbHandle> {
            Some(CbHandle(4))
        }
        fn register_start_of_sim_callback(&self, _cb: Callback) -> Option<CbHandle> {
            Some(CbHandle(5))
        }
        fn register_end_of_sim_callback(&self, _cb: Callback) -> Option<CbHandle> {
            Some(CbHandle(6))
        }
        fn finish(&self) {
            self.finished.set(true);
        }
    }

    #[test]
    fn no_backend_defaults() {
        clear_backend();
        assert!(!has_backend());
        assert_eq!(sim_time(), 0);
        assert_eq!(signal_value_i64(RawHandle(7)), 0);
        assert!(root_handle(None).is_none());
        assert!(register_timed_callback(1, Box::new(|| {})).is_none());
    }

    #[test]
    fn dispatch_to_registered_backend() {
        let stub = Rc::new(Stub {
            time: Cell::new(125),
            finished: Cell::new(false),
        });
        set_backend(stub.clone());
        assert!(has_backend());
        assert_eq!(sim_time(), 125);
        assert_eq!(sim_precision(), -9);
        assert_eq!(root_handle(None), Some(RawHandle(1)));
        assert_eq!(root_handle(Some("other")), None);
        assert_eq!(handle_by_name(RawHandle(1), "clk"), Some(RawHandle(2)));
        assert!(register_value_change_callback(RawHandle(2), EdgeKind::Rising, Box::new(|| {}))
            .is_none());
        finish();
        assert!(stub.finished.get());
        clear_backend();
    }

    #[test]
    fn null_handle_is_invalid() {
        assert!(!RawHandle::NULL.is_valid());
        assert!(RawHandle(3).is_valid());
    }
}
