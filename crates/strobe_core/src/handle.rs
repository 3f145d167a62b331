//! Design handles and the typed value accessor.
//!
//! A [`SimHandle`] wraps an opaque simulator handle plus a child-name
//! lookup cache; both successful and failed lookups are memoized so the
//! GPI is asked about each name at most once. Reads go straight to the
//! simulator; writes are queued through the scheduler and reach the
//! simulator only in the next writable phase.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use log::error;

use crate::gpi::{self, RawHandle};
use crate::scheduler;

#[derive(Debug)]
struct HandleInner {
    raw: RawHandle,
    children: RefCell<HashMap<String, Option<SimHandle>>>,
    warned_read: Cell<bool>,
    warned_write: Cell<bool>,
}

/// A handle to a design object (module, signal, or other named child).
///
/// Cheap to clone; clones share the child cache.
#[derive(Clone, Debug)]
pub struct SimHandle {
    inner: Rc<HandleInner>,
}

impl SimHandle {
    /// Wraps a raw simulator handle.
    pub fn from_raw(raw: RawHandle) -> Self {
        SimHandle {
            inner: Rc::new(HandleInner {
                raw,
                children: RefCell::new(HashMap::new()),
                warned_read: Cell::new(false),
                warned_write: Cell::new(false),
            }),
        }
    }

    /// The invalid handle: lookups fail, reads return zero, writes drop.
    pub fn invalid() -> Self {
        SimHandle::from_raw(RawHandle::NULL)
    }

    /// Returns true unless this wraps the null handle.
    pub fn valid(&self) -> bool {
        self.inner.raw.is_valid()
    }

    /// The underlying raw handle.
    pub fn raw(&self) -> RawHandle {
        self.inner.raw
    }

    /// Looks up a named child, memoizing both hits and misses.
    ///
    /// A failed lookup returns the invalid handle (and logs once); reads
    /// and writes on it degrade per the value accessor's rules.
    pub fn child(&self, name: &str) -> SimHandle {
        if !self.valid() {
            error!(target: "strobe.gpi", "indexed an invalid handle with '{name}'");
            return SimHandle::invalid();
        }
        if let Some(cached) = self.inner.children.borrow().get(name) {
            return cached.clone().unwrap_or_else(SimHandle::invalid);
        }
        let resolved = gpi::handle_by_name(self.inner.raw, name).map(SimHandle::from_raw);
        if resolved.is_none() {
            error!(target: "strobe.gpi", "failed to find child '{name}'");
        }
        self.inner
            .children
            .borrow_mut()
            .insert(name.to_string(), resolved.clone());
        resolved.unwrap_or_else(SimHandle::invalid)
    }

    /// Resolves a dotted hierarchical path against this handle.
    ///
    /// An empty path returns the handle itself. If the full path does not
    /// resolve, the leading component is assumed to name this handle and
    /// is stripped for one retry.
    pub fn resolve_path(&self, path: &str) -> SimHandle {
        if path.is_empty() {
            return self.clone();
        }
        if let Some(found) = gpi::handle_by_name(self.inner.raw, path).map(SimHandle::from_raw) {
            return found;
        }
        if let Some((_, relative)) = path.split_once('.') {
            if let Some(found) =
                gpi::handle_by_name(self.inner.raw, relative).map(SimHandle::from_raw)
            {
                return found;
            }
        }
        error!(target: "strobe.gpi", "failed to resolve path '{path}'");
        SimHandle::invalid()
    }

    /// The typed value view of this handle.
    pub fn value(&self) -> Value {
        Value {
            inner: self.inner.clone(),
        }
    }
}

/// Typed read/write view of a signal.
///
/// Assignment queues a deferred write through the scheduler; reads query
/// the simulator directly, so a body never observes its own pending
/// writes within one execution slice.
#[derive(Clone, Debug)]
pub struct Value {
    inner: Rc<HandleInner>,
}

impl Value {
    /// Queues a write of `value` for the next writable phase.
    pub fn set(&self, value: impl Into<i64>) {
        if !self.inner.raw.is_valid() {
            if !self.inner.warned_write.replace(true) {
                error!(target: "strobe.gpi", "attempted to drive an invalid handle");
            }
            return;
        }
        scheduler::queue_write(self.inner.raw, value.into());
    }

    /// Reads the signal as an integer.
    pub fn as_i64(&self) -> i64 {
        if !self.inner.raw.is_valid() {
            if !self.inner.warned_read.replace(true) {
                error!(target: "strobe.gpi", "attempted to read an invalid handle");
            }
            return 0;
        }
        gpi::signal_value_i64(self.inner.raw)
    }

    /// Reads the signal as an unsigned 32-bit integer.
    pub fn as_u32(&self) -> u32 {
        self.as_i64() as u32
    }

    /// Reads the signal as a boolean (nonzero real is true).
    pub fn as_bool(&self) -> bool {
        if !self.inner.raw.is_valid() {
            if !self.inner.warned_read.replace(true) {
                error!(target: "strobe.gpi", "attempted to read an invalid handle");
            }
            return false;
        }
        gpi::signal_value_f64(self.inner.raw) != 0.0
    }
}
