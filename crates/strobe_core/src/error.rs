//! Failure types carried by testbench tasks.
//!
//! A task body returns `Result<(), Failure>`. An `Err` (or a panic caught at
//! the scheduler's poll boundary) is stored on the task: the test runner
//! reports it if the task is the top-level test, and a joiner receives it
//! from the join awaitable otherwise.

use std::any::Any;

/// A failure raised by a testbench task.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Failure {
    /// A checked condition did not hold.
    #[error("Assertion failed: {message}")]
    Assertion {
        /// The message supplied at the check site.
        message: String,
    },

    /// The task body panicked; the payload was caught at the scheduler's
    /// poll boundary so it never crosses the simulator callback boundary.
    #[error("panic: {message}")]
    Panic {
        /// The panic payload, rendered as text.
        message: String,
    },

    /// A free-form failure raised by user code.
    #[error("{0}")]
    Message(String),
}

impl Failure {
    /// Builds an assertion failure with the given message.
    pub fn assertion(message: impl Into<String>) -> Self {
        Failure::Assertion {
            message: message.into(),
        }
    }

    /// Builds a free-form failure.
    pub fn msg(message: impl Into<String>) -> Self {
        Failure::Message(message.into())
    }

    /// Converts a caught panic payload into a failure.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Failure::Panic { message }
    }
}

/// Result type returned by testbench task bodies.
pub type TbResult = Result<(), Failure>;

/// Fails the task with an assertion failure unless `condition` holds.
///
/// Use with `?` at check sites:
///
/// ```ignore
/// check(q == d, "q did not follow d")?;
/// ```
pub fn check(condition: bool, message: &str) -> TbResult {
    if condition {
        Ok(())
    } else {
        Err(Failure::assertion(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assertion_display() {
        let f = Failure::assertion("expected failure");
        assert_eq!(f.to_string(), "Assertion failed: expected failure");
    }

    #[test]
    fn message_display() {
        let f = Failure::msg("bus timeout");
        assert_eq!(f.to_string(), "bus timeout");
    }

    #[test]
    fn check_passes() {
        assert!(check(true, "unused").is_ok());
    }

    #[test]
    fn check_fails_with_message() {
        let err = check(false, "q mismatch").unwrap_err();
        assert_eq!(err.to_string(), "Assertion failed: q mismatch");
    }

    #[test]
    fn panic_payload_str() {
        let f = Failure::from_panic(Box::new("boom"));
        assert_eq!(f.to_string(), "panic: boom");
    }

    #[test]
    fn panic_payload_string() {
        let f = Failure::from_panic(Box::new("boom".to_string()));
        assert_eq!(f.to_string(), "panic: boom");
    }

    #[test]
    fn panic_payload_other() {
        let f = Failure::from_panic(Box::new(42_u32));
        assert!(f.to_string().contains("non-string"));
    }
}
