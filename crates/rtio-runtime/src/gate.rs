//! Gate/count loopback protocol.
//!
//! In one parallel block, an input gate stays open for `window` while the
//! companion output, after `settle`, emits `pulses` pulses. The read-back
//! count must equal `pulses` exactly.

use crate::channel::{GateHandle, TtlInOut, TtlOut};
use crate::compose::Block;
use crate::controller::RtioController;
use crate::session::Session;
use rtio_common::config::GateCountConfig;
use rtio_common::error::{RtioError, RtioResult};
use rtio_common::time::{Mu, TimeBase};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Gate/count test parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateCountTest {
    /// Input gate window.
    pub window: Duration,
    /// Delay before the first pulse.
    pub settle: Duration,
    /// Pulses emitted and expected.
    pub pulses: u32,
    /// High time of each pulse.
    pub pulse_width: Duration,
    /// Low time after each pulse.
    pub pulse_spacing: Duration,
}

impl Default for GateCountTest {
    fn default() -> Self {
        Self::from(&GateCountConfig::default())
    }
}

impl From<&GateCountConfig> for GateCountTest {
    fn from(config: &GateCountConfig) -> Self {
        Self {
            window: config.window,
            settle: config.settle,
            pulses: config.pulses,
            pulse_width: config.pulse_width,
            pulse_spacing: config.pulse_spacing,
        }
    }
}

impl GateCountTest {
    /// Length of the pulse branch: settle plus every pulse period.
    #[must_use]
    pub fn branch_duration(&self, time_base: &TimeBase) -> Mu {
        let period = time_base.duration_to_mu(self.pulse_width)
            + time_base.duration_to_mu(self.pulse_spacing);
        time_base
            .duration_to_mu(self.settle)
            .saturating_add(period.saturating_mul(Mu::from(self.pulses)))
    }

    /// Reject a window shorter than the pulse branch.
    ///
    /// Not called by [`GateCountTest::run`]: a short window is a valid way to
    /// provoke a lower count.
    ///
    /// # Errors
    ///
    /// A configuration error naming both durations.
    pub fn check_window(&self, time_base: &TimeBase) -> RtioResult<()> {
        let window = time_base.duration_to_mu(self.window);
        let branch = self.branch_duration(time_base);
        if window < branch {
            return Err(RtioError::Config(format!(
                "gate window {window} mu shorter than pulse branch {branch} mu"
            )));
        }
        Ok(())
    }

    /// The protocol as a block tree.
    #[must_use]
    pub fn block(&self, time_base: &TimeBase, output: &TtlOut, input: &TtlInOut) -> Block {
        let width = time_base.duration_to_mu(self.pulse_width);
        let spacing = time_base.duration_to_mu(self.pulse_spacing);

        let mut pulses = Vec::with_capacity(self.pulses as usize * 2 + 1);
        pulses.push(Block::delay(time_base.duration_to_mu(self.settle)));
        for _ in 0..self.pulses {
            pulses.push(Block::pulse(output.clone(), width));
            pulses.push(Block::delay(spacing));
        }

        Block::Parallel(vec![
            Block::gate(input.clone(), time_base.duration_to_mu(self.window)),
            Block::Sequential(pulses),
        ])
    }

    /// Emit the protocol at the cursor without reading back.
    ///
    /// # Errors
    ///
    /// Propagates emission errors.
    pub fn schedule<C: RtioController>(
        &self,
        session: &mut Session<C>,
        output: &TtlOut,
        input: &TtlInOut,
    ) -> RtioResult<GateHandle> {
        session.parallel(|p| {
            let gate = p.branch(|s| input.gate_rising(s, self.window))?;
            p.branch(|s| {
                s.delay(self.settle);
                for _ in 0..self.pulses {
                    output.pulse(s, self.pulse_width)?;
                    s.delay(self.pulse_spacing);
                }
                Ok(())
            })?;
            Ok(gate)
        })
    }

    /// Break realtime, widen slack if the queue is near full, run the
    /// protocol and read back the count.
    ///
    /// # Errors
    ///
    /// Timing faults and read-back errors. A wrong count is an outcome,
    /// not an error.
    pub fn run<C: RtioController>(
        &self,
        session: &mut Session<C>,
        output: &TtlOut,
        input: &TtlInOut,
    ) -> RtioResult<GateCountOutcome> {
        session.break_realtime();
        session.guard_queue();
        let gate = self.schedule(session, output, input)?;
        let observed = input.count(session, gate)?;

        let outcome = GateCountOutcome {
            output: output.name().to_owned(),
            input: input.name().to_owned(),
            expected: self.pulses,
            observed,
        };
        if outcome.passed() {
            debug!(
                output = %outcome.output,
                input = %outcome.input,
                observed,
                "Gate count matched"
            );
        } else {
            warn!(
                output = %outcome.output,
                input = %outcome.input,
                expected = self.pulses,
                observed,
                "Gate count mismatch"
            );
        }
        Ok(outcome)
    }
}

/// Result of one gate/count run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateCountOutcome {
    /// Output device name.
    pub output: String,
    /// Input device name.
    pub input: String,
    /// Pulses emitted.
    pub expected: u32,
    /// Rising edges counted.
    pub observed: u32,
}

impl GateCountOutcome {
    /// True only on an exact match.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.observed == self.expected
    }
}
