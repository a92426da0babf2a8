//! Deterministic simulated controller.
//!
//! Models the parts of an RTIO core the scheduling protocol depends on:
//!
//! - A live counter that advances only through simulated CPU cost:
//!   `emit_cost` per submitted event, `poll_cost` per counter read, and a
//!   jump to the gate end on a count read-back.
//! - A bounded queue of events not yet reached by the counter. A full queue
//!   either stalls the producer (the counter jumps to the oldest pending
//!   event) or rejects the event with [`RtioError::Overflow`].
//! - An event the counter has already passed, after the submission cost or
//!   a stall, is rejected with [`RtioError::Underflow`].
//! - Loopback wires from outputs to inputs. An input gate window
//!   `[open, close)` counts the rising edges of every output wired to it.
//!
//! Nothing here depends on wall-clock time, so every run is reproducible.

use crate::controller::{Event, EventKind, RtioController};
use rtio_common::config::HarnessConfig;
use rtio_common::error::{RtioError, RtioResult};
use rtio_common::time::Mu;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use tracing::{debug, trace};

/// Rising edges kept per wired output while no gate needs them.
const EDGE_HISTORY: usize = 1 << 16;

/// An input gate window.
#[derive(Debug, Clone, Copy)]
struct GateWindow {
    open: Mu,
    close: Option<Mu>,
}

impl GateWindow {
    fn contains(&self, timestamp: Mu) -> bool {
        timestamp >= self.open && self.close.map_or(true, |close| timestamp < close)
    }
}

/// Simulated RTIO controller.
#[derive(Debug)]
pub struct SimulatedController {
    counter: Mu,
    frozen: bool,
    emit_cost: Mu,
    poll_cost: Mu,
    count_latency: Mu,
    capacity: usize,
    stall_on_full: bool,
    /// Timestamps not yet reached by the counter (min-heap).
    pending: BinaryHeap<Reverse<Mu>>,
    stalls: u64,
    submitted: u64,
    /// (output, input) pairs.
    wires: Vec<(u32, u32)>,
    /// Output levels of wired outputs.
    levels: HashMap<u32, bool>,
    /// Rising edges of wired outputs, in timestamp order.
    edges: HashMap<u32, VecDeque<Mu>>,
    /// Open or closed, not yet counted gates per input.
    gates: HashMap<u32, GateWindow>,
    log: Option<Vec<Event>>,
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::ideal()
    }
}

impl SimulatedController {
    /// A controller with zero CPU cost and a practically unbounded queue.
    #[must_use]
    pub fn ideal() -> Self {
        Self {
            counter: 0,
            frozen: false,
            emit_cost: 0,
            poll_cost: 0,
            count_latency: 0,
            capacity: usize::MAX,
            stall_on_full: true,
            pending: BinaryHeap::new(),
            stalls: 0,
            submitted: 0,
            wires: Vec::new(),
            levels: HashMap::new(),
            edges: HashMap::new(),
            gates: HashMap::new(),
            log: None,
        }
    }

    /// Build a controller from configuration, resolving loopback names.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid time base or a loopback
    /// wire naming an unknown channel.
    pub fn from_config(config: &HarnessConfig) -> RtioResult<Self> {
        let tb = config.time_base()?;
        let mut sim = Self::ideal();
        sim.emit_cost = tb.duration_to_mu(config.simulator.emit_cost);
        sim.poll_cost = tb.duration_to_mu(config.simulator.poll_cost);
        sim.count_latency = tb.duration_to_mu(config.simulator.count_latency);
        sim.capacity = config.queue.capacity.max(1);
        sim.stall_on_full = config.queue.stall_on_full;

        for wire in &config.simulator.loopback {
            let output = config.channel(&wire.output).ok_or_else(|| {
                RtioError::Config(format!("loopback output {} not defined", wire.output))
            })?;
            let input = config.channel(&wire.input).ok_or_else(|| {
                RtioError::Config(format!("loopback input {} not defined", wire.input))
            })?;
            sim.wire(output.index, input.index);
        }
        Ok(sim)
    }

    /// Set the per-event counter cost.
    pub fn set_emit_cost(&mut self, cost: Mu) {
        self.emit_cost = cost;
    }

    /// Set the per-read counter cost.
    pub fn set_poll_cost(&mut self, cost: Mu) {
        self.poll_cost = cost;
    }

    /// Set the count read-back latency after a gate closes.
    pub fn set_count_latency(&mut self, latency: Mu) {
        self.count_latency = latency;
    }

    /// Bound the queue.
    pub fn set_capacity(&mut self, capacity: usize, stall_on_full: bool) {
        self.capacity = capacity.max(1);
        self.stall_on_full = stall_on_full;
    }

    /// Connect `output` to `input`.
    pub fn wire(&mut self, output: u32, input: u32) {
        if !self.wires.contains(&(output, input)) {
            self.wires.push((output, input));
        }
    }

    /// Force the live counter, draining everything it has passed.
    pub fn set_counter(&mut self, counter: Mu) {
        self.counter = counter;
        self.drain();
    }

    /// Freeze or release the counter. A frozen counter ignores CPU cost.
    pub fn stall_counter(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    /// Record every submitted event.
    pub fn enable_event_log(&mut self) {
        self.log.get_or_insert_with(Vec::new);
    }

    /// Events recorded since the log was enabled.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        self.log.as_deref().unwrap_or(&[])
    }

    /// Times the producer stalled on a full queue.
    #[must_use]
    pub fn stalls(&self) -> u64 {
        self.stalls
    }

    /// Events accepted.
    #[must_use]
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    /// Current counter without cost.
    #[must_use]
    pub fn peek_counter(&self) -> Mu {
        self.counter
    }

    fn spend(&mut self, cost: Mu) {
        if !self.frozen {
            self.counter = self.counter.saturating_add(cost);
            self.drain();
        }
    }

    fn drain(&mut self) {
        while let Some(&Reverse(ts)) = self.pending.peek() {
            if ts > self.counter {
                break;
            }
            self.pending.pop();
        }
    }

    /// Underflow if the counter has already passed `event`.
    fn check_deadline(&self, event: &Event) -> RtioResult<()> {
        if event.timestamp < self.counter {
            return Err(RtioError::Underflow {
                channel: event.channel,
                timestamp: event.timestamp,
                counter: self.counter,
            });
        }
        Ok(())
    }

    fn enqueue(&mut self, event: &Event) -> RtioResult<()> {
        self.check_deadline(event)?;
        if event.timestamp == self.counter {
            // Consumed on arrival
            return Ok(());
        }
        if self.pending.len() >= self.capacity {
            if !self.stall_on_full {
                return Err(RtioError::Overflow {
                    capacity: self.capacity,
                });
            }
            if let Some(Reverse(oldest)) = self.pending.pop() {
                self.counter = self.counter.max(oldest);
                self.stalls += 1;
                self.drain();
            }
            // The stall may have carried the counter past this event
            self.check_deadline(event)?;
            if event.timestamp == self.counter {
                return Ok(());
            }
        }
        self.pending.push(Reverse(event.timestamp));
        Ok(())
    }

    fn is_wired_output(&self, channel: u32) -> bool {
        self.wires.iter().any(|&(out, _)| out == channel)
    }

    fn observe(&mut self, event: &Event) {
        match event.kind {
            EventKind::Rising | EventKind::Falling if self.is_wired_output(event.channel) => {
                let high = event.kind == EventKind::Rising;
                let was_high = self.levels.insert(event.channel, high).unwrap_or(false);
                if high && !was_high {
                    let edges = self.edges.entry(event.channel).or_default();
                    edges.push_back(event.timestamp);
                    if edges.len() > EDGE_HISTORY {
                        edges.pop_front();
                    }
                }
            }
            EventKind::GateOpen => {
                self.gates.insert(
                    event.channel,
                    GateWindow {
                        open: event.timestamp,
                        close: None,
                    },
                );
            }
            EventKind::GateClose => {
                if let Some(gate) = self.gates.get_mut(&event.channel) {
                    gate.close = Some(event.timestamp);
                }
            }
            EventKind::Rising | EventKind::Falling => {}
        }
    }

    /// Drop edges no pending gate on `output` can still count.
    fn prune_edges(&mut self, output: u32, before: Mu) {
        let cutoff = self
            .wires
            .iter()
            .filter(|&&(out, _)| out == output)
            .filter_map(|&(_, input)| self.gates.get(&input))
            .map(|gate| gate.open)
            .fold(before, Mu::min);
        if let Some(edges) = self.edges.get_mut(&output) {
            while edges.front().is_some_and(|&ts| ts < cutoff) {
                edges.pop_front();
            }
        }
    }
}

impl RtioController for SimulatedController {
    fn counter_mu(&mut self) -> Mu {
        self.spend(self.poll_cost);
        self.counter
    }

    fn submit(&mut self, event: Event) -> RtioResult<()> {
        self.spend(self.emit_cost);
        self.enqueue(&event)?;
        self.observe(&event);
        if let Some(log) = self.log.as_mut() {
            log.push(event);
        }
        self.submitted += 1;
        trace!(
            channel = event.channel,
            timestamp = event.timestamp,
            depth = self.pending.len(),
            "Simulated submit"
        );
        Ok(())
    }

    fn count_rising(&mut self, channel: u32, gate_end: Mu) -> RtioResult<u32> {
        let gate = self.gates.remove(&channel).ok_or_else(|| {
            RtioError::Config(format!("no gate opened on channel {channel}"))
        })?;
        let close = gate.close.unwrap_or(gate_end);

        // The read-back completes only once the gate has closed.
        self.counter = self.counter.max(close.saturating_add(self.count_latency));
        self.drain();

        let outputs: Vec<u32> = self
            .wires
            .iter()
            .filter(|&&(_, input)| input == channel)
            .map(|&(out, _)| out)
            .collect();

        let mut count = 0usize;
        for &output in &outputs {
            if let Some(edges) = self.edges.get(&output) {
                count += edges.iter().filter(|&&ts| gate.contains(ts)).count();
            }
            self.prune_edges(output, close);
        }

        debug!(channel, open = gate.open, close, count, "Simulated gate count");
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    fn queue_capacity(&self) -> Option<usize> {
        Some(self.capacity)
    }

    fn queue_depth(&self) -> usize {
        self.pending.len()
    }
}
