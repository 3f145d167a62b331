//! Simulation time units and precision conversion.
//!
//! The simulator reports its precision as a signed power-of-ten exponent.
//! User-supplied durations carry a [`TimeUnit`] and are converted to
//! precision ticks before callback registration; [`TimeUnit::Step`] means
//! "already in precision ticks, no conversion".

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::gpi;

/// A time unit for user-supplied durations.
///
/// Each unit maps to the exponent the simulator uses when reporting its
/// precision. `Step` is the simulator's native tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeUnit {
    /// Femtoseconds (exponent -15).
    Fs,
    /// Picoseconds (exponent -12).
    Ps,
    /// Nanoseconds (exponent -9).
    Ns,
    /// Microseconds (exponent -6).
    Us,
    /// Milliseconds (exponent -3).
    Ms,
    /// Seconds (exponent 1).
    Sec,
    /// The simulator's native precision tick (exponent 0, no conversion).
    Step,
}

impl TimeUnit {
    /// Returns the signed power-of-ten exponent for this unit.
    pub fn exponent(self) -> i32 {
        match self {
            TimeUnit::Fs => -15,
            TimeUnit::Ps => -12,
            TimeUnit::Ns => -9,
            TimeUnit::Us => -6,
            TimeUnit::Ms => -3,
            TimeUnit::Sec => 1,
            TimeUnit::Step => 0,
        }
    }

    /// Maps a precision exponent reported by the simulator back to a unit.
    pub fn from_exponent(exponent: i32) -> Option<TimeUnit> {
        match exponent {
            -15 => Some(TimeUnit::Fs),
            -12 => Some(TimeUnit::Ps),
            -9 => Some(TimeUnit::Ns),
            -6 => Some(TimeUnit::Us),
            -3 => Some(TimeUnit::Ms),
            1 => Some(TimeUnit::Sec),
            0 => Some(TimeUnit::Step),
            _ => None,
        }
    }

    /// Converts `delay` in this unit to simulator precision ticks.
    ///
    /// `precision` is the exponent from [`gpi::sim_precision`]. The factor
    /// is `10^(unit_exponent - precision_exponent)`, rounded to the nearest
    /// tick; `Step` bypasses conversion entirely.
    pub fn to_ticks(self, delay: u64, precision: i32) -> u64 {
        if self == TimeUnit::Step {
            return delay;
        }
        let factor = 10f64.powi(self.exponent() - precision);
        (delay as f64 * factor).round() as u64
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeUnit::Fs => "fs",
            TimeUnit::Ps => "ps",
            TimeUnit::Ns => "ns",
            TimeUnit::Us => "us",
            TimeUnit::Ms => "ms",
            TimeUnit::Sec => "sec",
            TimeUnit::Step => "step",
        };
        f.write_str(s)
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fs" => Ok(TimeUnit::Fs),
            "ps" => Ok(TimeUnit::Ps),
            "ns" => Ok(TimeUnit::Ns),
            "us" => Ok(TimeUnit::Us),
            "ms" => Ok(TimeUnit::Ms),
            "sec" => Ok(TimeUnit::Sec),
            "step" => Ok(TimeUnit::Step),
            other => Err(format!("unknown time unit '{other}'")),
        }
    }
}

/// Returns the simulator's precision as a [`TimeUnit`], defaulting to
/// `Step` if the reported exponent is not one of the known units.
pub fn precision_unit() -> TimeUnit {
    TimeUnit::from_exponent(gpi::sim_precision()).unwrap_or(TimeUnit::Step)
}

/// Returns the current simulation time converted to `unit`.
///
/// `Step` returns raw precision ticks. Other units divide out the
/// precision, truncating toward zero.
pub fn sim_time(unit: TimeUnit) -> u64 {
    let ticks = gpi::sim_time();
    if unit == TimeUnit::Step {
        return ticks;
    }
    let factor = 10f64.powi(unit.exponent() - gpi::sim_precision());
    (ticks as f64 / factor) as u64
}
