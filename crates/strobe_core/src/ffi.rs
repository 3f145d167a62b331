//! C-ABI adapter over a simulator-provided GPI implementation.
//!
//! Forwards the [`Gpi`] trait to the `gpi_*` functions a simulator loader
//! links in, and exports the entry point the loader invokes. Each callback
//! registration moves a boxed closure through the C `userdata` pointer;
//! the trampoline reclaims the box before returning, so a fired callback
//! frees its own record. Callbacks outstanding at shutdown may still
//! fire; they find an empty ready queue and return harmlessly.
//!
//! The entry point runs during library initialization, before the
//! simulator is ready: it must only register callbacks, never touch
//! simulation objects.

use std::ffi::{c_char, c_int, c_void, CString};
use std::rc::Rc;

use log::error;

use crate::gpi::{self, Callback, CbHandle, EdgeKind, Gpi, RawHandle, SetAction};
use crate::runner;

type GpiSimHdl = *mut c_void;
type GpiCbHdl = *mut c_void;

const GPI_AUTO: c_int = 0;
const GPI_DEPOSIT: c_int = 0;
const GPI_FORCE: c_int = 1;
const GPI_RELEASE: c_int = 2;
const GPI_RISING: c_int = 1;
const GPI_FALLING: c_int = 2;
const GPI_VALUE_CHANGE: c_int = 3;

extern "C" {
    fn gpi_has_registered_impl() -> c_int;
    fn gpi_get_root_handle(name: *const c_char) -> GpiSimHdl;
    fn gpi_get_handle_by_name(parent: GpiSimHdl, name: *const c_char, kind: c_int) -> GpiSimHdl;
    fn gpi_get_signal_value_long(handle: GpiSimHdl) -> i64;
    fn gpi_get_signal_value_real(handle: GpiSimHdl) -> f64;
    fn gpi_set_signal_value_int(handle: GpiSimHdl, value: i64, action: c_int);
    fn gpi_get_sim_time(high: *mut u32, low: *mut u32);
    fn gpi_get_sim_precision(precision: *mut i32);
    fn gpi_register_timed_callback(
        cb: extern "C" fn(*mut c_void) -> c_int,
        userdata: *mut c_void,
        delay_ticks: u64,
    ) -> GpiCbHdl;
    fn gpi_register_value_change_callback(
        cb: extern "C" fn(*mut c_void) -> c_int,
        userdata: *mut c_void,
        signal: GpiSimHdl,
        edge: c_int,
    ) -> GpiCbHdl;
    fn gpi_register_readwrite_callback(
        cb: extern "C" fn(*mut c_void) -> c_int,
        userdata: *mut c_void,
    ) -> GpiCbHdl;
    fn gpi_register_readonly_callback(
        cb: extern "C" fn(*mut c_void) -> c_int,
        userdata: *mut c_void,
    ) -> GpiCbHdl;
    fn gpi_register_nexttime_callback(
        cb: extern "C" fn(*mut c_void) -> c_int,
        userdata: *mut c_void,
    ) -> GpiCbHdl;
    fn gpi_register_start_of_sim_time_callback(
        cb: extern "C" fn(*mut c_void, c_int, *const *const c_char) -> c_int,
        userdata: *mut c_void,
    ) -> c_int;
    fn gpi_register_end_of_sim_time_callback(
        cb: extern "C" fn(*mut c_void),
        userdata: *mut c_void,
    ) -> c_int;
    fn gpi_finish();
}

fn to_raw(handle: GpiSimHdl) -> Option<RawHandle> {
    if handle.is_null() {
        None
    } else {
        Some(RawHandle(handle as usize as u64))
    }
}

fn from_raw(handle: RawHandle) -> GpiSimHdl {
    handle.0 as usize as GpiSimHdl
}

extern "C" fn callback_trampoline(userdata: *mut c_void) -> c_int {
    let cb = unsafe { Box::from_raw(userdata as *mut Callback) };
    (*cb)();
    0
}

extern "C" fn start_trampoline(
    userdata: *mut c_void,
    _argc: c_int,
    _argv: *const *const c_char,
) -> c_int {
    let cb = unsafe { Box::from_raw(userdata as *mut Callback) };
    (*cb)();
    0
}

extern "C" fn end_trampoline(userdata: *mut c_void) {
    let cb = unsafe { Box::from_raw(userdata as *mut Callback) };
    (*cb)();
}

fn register(
    cb: Callback,
    f: impl FnOnce(extern "C" fn(*mut c_void) -> c_int, *mut c_void) -> GpiCbHdl,
) -> Option<CbHandle> {
    let userdata = Box::into_raw(Box::new(cb)) as *mut c_void;
    let handle = f(callback_trampoline, userdata);
    if handle.is_null() {
        // Registration rejected: the trampoline will never run, so the
        // record is reclaimed here.
        drop(unsafe { Box::from_raw(userdata as *mut Callback) });
        None
    } else {
        Some(CbHandle(handle as usize as u64))
    }
}

/// GPI backend forwarding to the linked simulator.
pub struct CGpi;

impl Gpi for CGpi {
    fn root_handle(&self, name: Option<&str>) -> Option<RawHandle> {
        match name {
            None => to_raw(unsafe { gpi_get_root_handle(std::ptr::null()) }),
            Some(name) => {
                let cname = CString::new(name).ok()?;
                to_raw(unsafe { gpi_get_root_handle(cname.as_ptr()) })
            }
        }
    }

    fn handle_by_name(&self, parent: RawHandle, name: &str) -> Option<RawHandle> {
        let cname = CString::new(name).ok()?;
        to_raw(unsafe { gpi_get_handle_by_name(from_raw(parent), cname.as_ptr(), GPI_AUTO) })
    }

    fn signal_value_i64(&self, handle: RawHandle) -> i64 {
        unsafe { gpi_get_signal_value_long(from_raw(handle)) }
    }

    fn signal_value_f64(&self, handle: RawHandle) -> f64 {
        unsafe { gpi_get_signal_value_real(from_raw(handle)) }
    }

    fn set_signal_value(&self, handle: RawHandle, value: i64, action: SetAction) {
        let action = match action {
            SetAction::Deposit => GPI_DEPOSIT,
            SetAction::Force => GPI_FORCE,
            SetAction::Release => GPI_RELEASE,
        };
        unsafe { gpi_set_signal_value_int(from_raw(handle), value, action) }
    }

    fn sim_time(&self) -> u64 {
        let mut high: u32 = 0;
        let mut low: u32 = 0;
        unsafe { gpi_get_sim_time(&mut high, &mut low) };
        (u64::from(high) << 32) | u64::from(low)
    }

    fn sim_precision(&self) -> i32 {
        let mut precision: i32 = 0;
        unsafe { gpi_get_sim_precision(&mut precision) };
        precision
    }

    fn register_timed_callback(&self, delay_ticks: u64, cb: Callback) -> Option<CbHandle> {
        register(cb, |trampoline, userdata| unsafe {
            gpi_register_timed_callback(trampoline, userdata, delay_ticks)
        })
    }

    fn register_value_change_callback(
        &self,
        signal: RawHandle,
        edge: EdgeKind,
        cb: Callback,
    ) -> Option<CbHandle> {
        let edge = match edge {
            EdgeKind::Rising => GPI_RISING,
            EdgeKind::Falling => GPI_FALLING,
            EdgeKind::Any => GPI_VALUE_CHANGE,
        };
        register(cb, |trampoline, userdata| unsafe {
            gpi_register_value_change_callback(trampoline, userdata, from_raw(signal), edge)
        })
    }

    fn register_readwrite_callback(&self, cb: Callback) -> Option<CbHandle> {
        register(cb, |trampoline, userdata| unsafe {
            gpi_register_readwrite_callback(trampoline, userdata)
        })
    }

    fn register_readonly_callback(&self, cb: Callback) -> Option<CbHandle> {
        register(cb, |trampoline, userdata| unsafe {
            gpi_register_readonly_callback(trampoline, userdata)
        })
    }

    fn register_nexttime_callback(&self, cb: Callback) -> Option<CbHandle> {
        register(cb, |trampoline, userdata| unsafe {
            gpi_register_nexttime_callback(trampoline, userdata)
        })
    }

    fn register_start_of_sim_callback(&self, cb: Callback) -> Option<CbHandle> {
        let userdata = Box::into_raw(Box::new(cb)) as *mut c_void;
        let rc = unsafe { gpi_register_start_of_sim_time_callback(start_trampoline, userdata) };
        if rc != 0 {
            drop(unsafe { Box::from_raw(userdata as *mut Callback) });
            None
        } else {
            Some(CbHandle(userdata as usize as u64))
        }
    }

    fn register_end_of_sim_callback(&self, cb: Callback) -> Option<CbHandle> {
        let userdata = Box::into_raw(Box::new(cb)) as *mut c_void;
        let rc = unsafe { gpi_register_end_of_sim_time_callback(end_trampoline, userdata) };
        if rc != 0 {
            drop(unsafe { Box::from_raw(userdata as *mut Callback) });
            None
        } else {
            Some(CbHandle(userdata as usize as u64))
        }
    }

    fn finish(&self) {
        unsafe { gpi_finish() }
    }
}

/// Loader entry point: name this symbol in the simulator's user-library
/// configuration.
///
/// Only registers callbacks; the regression starts when the simulator
/// reports start of simulation. The process exits non-zero at end of
/// simulation iff any test failed.
#[no_mangle]
pub extern "C" fn strobe_entry_point() {
    if unsafe { gpi_has_registered_impl() } == 0 {
        eprintln!("strobe: no GPI implementation registered");
        return;
    }
    crate::logging::init();
    gpi::set_backend(Rc::new(CGpi));
    runner::bind_to_simulation();
    if gpi::register_end_of_sim_callback(Box::new(|| {
        if let Some(code) = runner::exit_code() {
            if code != 0 {
                std::process::exit(code);
            }
        }
    }))
    .is_none()
    {
        error!(target: "strobe.regression", "failed to register exit-code handler");
    }
}
