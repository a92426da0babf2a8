//! Operator test routines.
//!
//! Open-ended routines repeat an outer iteration until their
//! [`StopCondition`] says otherwise. The condition is checked only at the
//! top of an iteration; once started, an iteration's events are emitted in
//! full or the iteration fails.

use crate::abort::StopCondition;
use crate::channel::{TtlInOut, TtlOut};
use crate::controller::RtioController;
use crate::gate::{GateCountOutcome, GateCountTest};
use crate::session::Session;
use rtio_common::config::{LedTestConfig, PulseTrainConfig};
use rtio_common::error::{RtioError, RtioResult};
use rtio_common::metrics::SlackSnapshot;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Summary of one routine run.
#[derive(Debug, Clone, Serialize)]
pub struct RoutineReport {
    /// Routine name.
    pub routine: &'static str,
    /// Channels driven.
    pub channels: Vec<String>,
    /// Outer iterations completed.
    pub iterations: u64,
    /// Events emitted.
    pub events: u64,
    /// True if a pacing wait was cut short by the abort flag.
    pub aborted: bool,
    /// Slack observed during the run.
    pub slack: SlackSnapshot,
}

struct ReportBuilder {
    routine: &'static str,
    channels: Vec<String>,
    events_at_start: u64,
    iterations: u64,
    aborted: bool,
}

impl ReportBuilder {
    fn start<C: RtioController>(
        session: &mut Session<C>,
        routine: &'static str,
        channels: Vec<String>,
    ) -> Self {
        session.metrics_mut().reset();
        info!(routine, channels = ?channels, "Routine started");
        Self {
            routine,
            channels,
            events_at_start: session.events_emitted(),
            iterations: 0,
            aborted: false,
        }
    }

    fn finish<C: RtioController>(self, session: &Session<C>) -> RoutineReport {
        let report = RoutineReport {
            routine: self.routine,
            channels: self.channels,
            iterations: self.iterations,
            events: session.events_emitted() - self.events_at_start,
            aborted: self.aborted,
            slack: session.metrics().snapshot(),
        };
        info!(
            routine = report.routine,
            iterations = report.iterations,
            events = report.events,
            min_slack = ?report.slack.min,
            max_slack = ?report.slack.max,
            "Routine finished"
        );
        report
    }
}

/// Blink an LED until told to stop.
///
/// Each iteration breaks realtime, widens slack if the queue is near full,
/// waits until the queue has drained to about
/// `target_fill`, then emits `blinks` on/off cycles. The wait keeps the
/// routine responsive to the stop condition.
///
/// # Errors
///
/// Timing faults and pacing timeouts.
pub fn blink_led<C: RtioController>(
    session: &mut Session<C>,
    led: &TtlOut,
    config: &LedTestConfig,
    stop: &mut impl StopCondition,
) -> RtioResult<RoutineReport> {
    let mut report = ReportBuilder::start(session, "blink_led", vec![led.name().to_owned()]);

    while !stop.should_stop() {
        session.break_realtime();
        session.guard_queue();
        match session.wait_for_fill() {
            Ok(_) => {}
            Err(RtioError::Aborted) => {
                report.aborted = true;
                break;
            }
            Err(e) => return Err(e),
        }
        for _ in 0..config.blinks {
            led.pulse(session, config.on)?;
            session.delay(config.off);
        }
        report.iterations += 1;
    }

    Ok(report.finish(session))
}

/// Drive a group of outputs with identifying pulse counts.
///
/// In every burst the i-th output of the group (from 1) emits i pulses,
/// followed by `group_gap`, so each line can be told apart on a scope.
/// A full queue blocks the producer instead of pacing explicitly, and a
/// queue left near full by the previous iteration widens slack first.
///
/// # Errors
///
/// Timing faults and queue errors.
pub fn pulse_train<C: RtioController>(
    session: &mut Session<C>,
    group: &[TtlOut],
    config: &PulseTrainConfig,
    stop: &mut impl StopCondition,
) -> RtioResult<RoutineReport> {
    let names = group.iter().map(|t| t.name().to_owned()).collect();
    let mut report = ReportBuilder::start(session, "pulse_train", names);

    while !stop.should_stop() {
        session.break_realtime();
        session.guard_queue();
        for _ in 0..config.bursts {
            for (i, ttl) in group.iter().enumerate() {
                for _ in 0..=i {
                    ttl.pulse(session, config.pulse)?;
                    session.delay(config.gap);
                }
                session.delay(config.group_gap);
            }
        }
        report.iterations += 1;
        debug!(
            iteration = report.iterations,
            cursor = session.now_mu(),
            "Pulse train iteration done"
        );
    }

    Ok(report.finish(session))
}

/// Gate/count result for one input.
#[derive(Debug, Clone)]
pub struct LoopbackResult {
    /// Input device name.
    pub input: String,
    /// Count outcome, or the fault that ended the run.
    pub outcome: RtioResult<GateCountOutcome>,
}

impl LoopbackResult {
    /// True only if the run completed with an exact count.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcome.as_ref().is_ok_and(GateCountOutcome::passed)
    }
}

/// Run the gate/count protocol from `output` to every input.
///
/// A fault on one input is recorded and the next input still runs.
pub fn loopback_check<C: RtioController>(
    session: &mut Session<C>,
    output: &TtlOut,
    inputs: &[TtlInOut],
    test: &GateCountTest,
) -> Vec<LoopbackResult> {
    info!(output = output.name(), inputs = inputs.len(), "Loopback check started");
    inputs
        .iter()
        .map(|input| {
            let outcome = test.run(session, output, input);
            if let Err(e) = &outcome {
                warn!(
                    output = output.name(),
                    input = input.name(),
                    error = %e,
                    "Loopback run failed"
                );
            }
            LoopbackResult {
                input: input.name().to_owned(),
                outcome,
            }
        })
        .collect()
}
