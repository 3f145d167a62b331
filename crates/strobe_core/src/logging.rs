//! Simulation-time console logging.
//!
//! [`SimLogger`] implements the `log` facade and prefixes every record with
//! the *simulated* time (queried through the GPI) rather than wall-clock
//! time, in the precision unit the simulator reports:
//!
//! ```text
//!     5000ns  INFO   strobe.regression         running dff_sampling (1/3)
//! ```
//!
//! When no backend is registered on the logging thread the time column
//! renders as `------`. Errors go to stderr, everything else to stdout;
//! the stdout/stderr locks serialize interleaved writes.

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::gpi;
use crate::time;

/// A `log::Log` implementation stamped with simulation time.
pub struct SimLogger;

static LOGGER: SimLogger = SimLogger;

/// Installs [`SimLogger`] as the global logger.
///
/// The maximum level defaults to `Info` and can be overridden with the
/// `STROBE_LOG` environment variable (`error`, `warn`, `info`, `debug`,
/// `trace`). Safe to call more than once; only the first call wins.
pub fn init() {
    let level = std::env::var("STROBE_LOG")
        .ok()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

fn timestamp() -> String {
    if gpi::has_backend() {
        format!("{}{}", gpi::sim_time(), time::precision_unit())
    } else {
        "------".to_string()
    }
}

impl Log for SimLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "{:>10}  {:<5}  {:<24}  {}",
            timestamp(),
            record.level(),
            record.target(),
            record.args()
        );
        if record.level() == Level::Error {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_without_backend() {
        gpi::clear_backend();
        assert_eq!(timestamp(), "------");
    }

    #[test]
    fn init_is_idempotent() {
        init();
        init();
        log::info!(target: "strobe.test", "logger installed");
    }
}
