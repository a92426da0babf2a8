//! Controller abstraction for the physical RTIO core.
//!
//! The controller owns the live counter and the bounded event queue. The
//! harness only appends events, reads the counter, and reads back input
//! edge counts; it never inspects the queue contents.

use rtio_common::{Mu, RtioResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a timed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Output driven high.
    Rising,
    /// Output driven low.
    Falling,
    /// Input starts counting rising edges.
    GateOpen,
    /// Input stops counting.
    GateClose,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rising => write!(f, "RISING"),
            Self::Falling => write!(f, "FALLING"),
            Self::GateOpen => write!(f, "GATE_OPEN"),
            Self::GateClose => write!(f, "GATE_CLOSE"),
        }
    }
}

/// An event appended to the controller queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Channel index.
    pub channel: u32,
    /// Absolute timestamp in mu.
    pub timestamp: Mu,
    /// What happens at `timestamp`.
    pub kind: EventKind,
}

/// Physical controller interface.
///
/// Implementations consume events asynchronously against their own
/// free-running counter. A single producer drives the trait, so no
/// locking is implied.
pub trait RtioController {
    /// Read the free-running counter.
    fn counter_mu(&mut self) -> Mu;

    /// Append an event to the queue.
    ///
    /// May block (in controller time) while the queue is full.
    fn submit(&mut self, event: Event) -> RtioResult<()>;

    /// Number of rising edges seen by the most recent gate on `channel`.
    ///
    /// Blocks until the counter has passed `gate_end`.
    fn count_rising(&mut self, channel: u32, gate_end: Mu) -> RtioResult<u32>;

    /// Queue capacity in events, if known.
    fn queue_capacity(&self) -> Option<usize> {
        None
    }

    /// Events currently buffered ahead of the counter.
    fn queue_depth(&self) -> usize {
        0
    }
}

impl<T: RtioController + ?Sized> RtioController for Box<T> {
    fn counter_mu(&mut self) -> Mu {
        (**self).counter_mu()
    }

    fn submit(&mut self, event: Event) -> RtioResult<()> {
        (**self).submit(event)
    }

    fn count_rising(&mut self, channel: u32, gate_end: Mu) -> RtioResult<u32> {
        (**self).count_rising(channel, gate_end)
    }

    fn queue_capacity(&self) -> Option<usize> {
        (**self).queue_capacity()
    }

    fn queue_depth(&self) -> usize {
        (**self).queue_depth()
    }
}
