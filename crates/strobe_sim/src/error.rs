//! Error types for the embedded simulator backend.

/// Errors from building or running the embedded simulator.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// Two signals were declared with the same name.
    #[error("duplicate signal name '{0}'")]
    DuplicateSignal(String),

    /// Too many delta cycles at a single time step, indicating a
    /// combinational loop between models and testbench writes.
    #[error("delta cycle limit exceeded at {time} ticks (max {max_deltas} deltas)")]
    DeltaCycleLimit {
        /// The time in precision ticks where the limit was hit.
        time: u64,
        /// The maximum number of delta cycles allowed per step.
        max_deltas: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_signal_display() {
        let e = SimError::DuplicateSignal("clk".into());
        assert_eq!(e.to_string(), "duplicate signal name 'clk'");
    }

    #[test]
    fn delta_limit_display() {
        let e = SimError::DeltaCycleLimit {
            time: 500,
            max_deltas: 1000,
        };
        assert_eq!(
            e.to_string(),
            "delta cycle limit exceeded at 500 ticks (max 1000 deltas)"
        );
    }
}
