use crate::time::Mu;
use thiserror::Error;

/// Harness error types covering timing faults, queue faults, and configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RtioError {
    /// The live counter passed the cursor before an event was emitted.
    #[error("RTIO underflow on channel {channel}: timestamp {timestamp} mu, counter {counter} mu")]
    Underflow {
        /// Channel index of the failed emission.
        channel: u32,
        /// Cursor value at the emission.
        timestamp: Mu,
        /// Live counter value observed at the emission.
        counter: Mu,
    },

    /// An event was emitted earlier than the previous event on the same channel.
    #[error("RTIO sequence error on channel {channel}: timestamp {timestamp} mu precedes {last} mu")]
    Sequence {
        /// Channel index.
        channel: u32,
        /// Rejected timestamp.
        timestamp: Mu,
        /// Last accepted timestamp on the channel.
        last: Mu,
    },

    /// The event queue is full and the controller does not stall.
    #[error("RTIO overflow: event queue full ({capacity} events)")]
    Overflow {
        /// Queue capacity in events.
        capacity: usize,
    },

    /// The pacing wait did not observe the counter condition in time.
    #[error("pacing wait timed out after {waited_ms}ms")]
    PacingTimeout {
        /// Wall-clock time spent waiting.
        waited_ms: u64,
    },

    /// The abort flag was raised during a cancellable wait.
    #[error("aborted by operator")]
    Aborted,

    /// Input operation requested on an output-only channel.
    #[error("channel {channel} is output-only")]
    Direction {
        /// Channel index.
        channel: u32,
    },

    /// Configuration or caller precondition error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl RtioError {
    /// Returns true for faults that mean a real-time deadline was missed.
    #[must_use]
    pub fn is_timing_fault(&self) -> bool {
        matches!(self, Self::Underflow { .. } | Self::Sequence { .. })
    }
}

/// Convenience type alias for harness operations.
pub type RtioResult<T> = Result<T, RtioError>;
