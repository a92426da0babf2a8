//! Time cursor and slack controller.
//!
//! A [`Session`] is the explicit context every scheduling call goes through.
//! It owns the cursor (the timestamp the next event is issued at) and the
//! controller, and enforces the slack discipline:
//!
//! - Every emission checks the live counter first. If the counter has passed
//!   the cursor, the emission fails with [`RtioError::Underflow`].
//! - Events on one channel are non-decreasing in time, otherwise
//!   [`RtioError::Sequence`].
//! - [`Session::break_realtime`] moves the cursor ahead of the counter, and
//!   [`Session::wait_for_fill`] throttles the producer so the queue stays
//!   about `target_fill` ahead of the counter.
//!
//! The cursor lives for the whole session and persists across tests.

use crate::abort::AbortFlag;
use crate::controller::{Event, EventKind, RtioController};
use rtio_common::config::HarnessConfig;
use rtio_common::error::{RtioError, RtioResult};
use rtio_common::metrics::SlackMetrics;
use rtio_common::time::{Mu, TimeBase};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// Slack samples kept for percentile queries.
const SLACK_HISTOGRAM_SIZE: usize = 4096;

/// Slack policy in machine units.
#[derive(Debug, Clone, Copy)]
pub struct SlackPolicy {
    /// Lead time given to the cursor by a realtime break.
    pub break_margin: Mu,
    /// Queue lead the pacing wait throttles to.
    pub target_fill: Mu,
    /// Wall-clock bound on one pacing wait.
    pub pacing_timeout: Option<Duration>,
    /// Counter polls between abort/timeout checks.
    pub abort_check_every: u32,
    /// Free queue slots at or below which [`Session::guard_queue`] widens.
    pub queue_headroom: usize,
    /// Slack [`Session::guard_queue`] widens to.
    pub widen_slack: Mu,
}

impl SlackPolicy {
    /// Derive the policy from configuration.
    #[must_use]
    pub fn from_config(config: &HarnessConfig, time_base: &TimeBase) -> Self {
        Self {
            break_margin: time_base.duration_to_mu(config.slack.break_margin),
            target_fill: time_base.duration_to_mu(config.slack.target_fill),
            pacing_timeout: config.slack.pacing_timeout,
            abort_check_every: config.slack.abort_check_every,
            queue_headroom: config.queue.headroom,
            widen_slack: time_base.duration_to_mu(config.queue.widen_slack),
        }
    }
}

impl Default for SlackPolicy {
    fn default() -> Self {
        Self::from_config(&HarnessConfig::default(), &TimeBase::default())
    }
}

/// Scheduling context bound to one controller.
pub struct Session<C: RtioController> {
    /// Physical controller.
    controller: C,
    /// Machine-unit conversion.
    time_base: TimeBase,
    /// Current scheduling position.
    pub(crate) cursor: Mu,
    /// Slack policy.
    policy: SlackPolicy,
    /// Last emitted timestamp per channel.
    last_event: HashMap<u32, Mu>,
    /// Slack observed at emissions.
    metrics: SlackMetrics,
    /// Operator abort, polled by the pacing wait.
    abort: AbortFlag,
    /// Events successfully emitted.
    events_emitted: u64,
}

impl<C: RtioController> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("cursor", &self.cursor)
            .field("policy", &self.policy)
            .field("events_emitted", &self.events_emitted)
            .finish_non_exhaustive()
    }
}

impl<C: RtioController> Session<C> {
    /// Create a session from configuration.
    ///
    /// The cursor starts one break margin ahead of the live counter.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured time base is invalid.
    pub fn new(controller: C, config: &HarnessConfig) -> RtioResult<Self> {
        let time_base = config.time_base()?;
        let policy = SlackPolicy::from_config(config, &time_base);
        Ok(Self::with_policy(controller, time_base, policy))
    }

    /// Create a session with an explicit time base and policy.
    pub fn with_policy(mut controller: C, time_base: TimeBase, policy: SlackPolicy) -> Self {
        let cursor = controller.counter_mu().saturating_add(policy.break_margin);
        Self {
            controller,
            time_base,
            cursor,
            policy,
            last_event: HashMap::new(),
            metrics: SlackMetrics::new(SLACK_HISTOGRAM_SIZE, Mu::MAX),
            abort: AbortFlag::new(),
            events_emitted: 0,
        }
    }

    /// Replace the abort flag polled by the pacing wait.
    #[must_use]
    pub fn with_abort(mut self, abort: AbortFlag) -> Self {
        self.abort = abort;
        self
    }

    /// Count emissions whose slack exceeds `bound` as overfill.
    #[must_use]
    pub fn with_fill_bound(mut self, bound: Mu) -> Self {
        self.metrics = SlackMetrics::new(SLACK_HISTOGRAM_SIZE, bound);
        self
    }

    /// Controller reference.
    pub fn controller(&self) -> &C {
        &self.controller
    }

    /// Mutable controller reference.
    pub fn controller_mut(&mut self) -> &mut C {
        &mut self.controller
    }

    /// Consume the session, returning the controller.
    pub fn into_controller(self) -> C {
        self.controller
    }

    /// Machine-unit conversion.
    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }

    /// Slack policy.
    pub fn policy(&self) -> &SlackPolicy {
        &self.policy
    }

    /// Slack metrics gathered so far.
    pub fn metrics(&self) -> &SlackMetrics {
        &self.metrics
    }

    /// Mutable slack metrics, e.g. to reset between tests.
    pub fn metrics_mut(&mut self) -> &mut SlackMetrics {
        &mut self.metrics
    }

    /// The abort flag polled by the pacing wait.
    pub fn abort_flag(&self) -> &AbortFlag {
        &self.abort
    }

    /// Events successfully emitted.
    pub fn events_emitted(&self) -> u64 {
        self.events_emitted
    }

    // =========================================================================
    // CURSOR
    // =========================================================================

    /// Current cursor value.
    #[inline]
    pub fn now_mu(&self) -> Mu {
        self.cursor
    }

    /// Move the cursor to an absolute timestamp.
    #[inline]
    pub fn at_mu(&mut self, timestamp: Mu) {
        self.cursor = timestamp;
    }

    /// Advance the cursor by `duration` machine units.
    #[inline]
    pub fn advance(&mut self, duration: Mu) {
        self.cursor = self.cursor.saturating_add(duration);
    }

    /// Advance the cursor by a real-time duration.
    #[inline]
    pub fn delay(&mut self, duration: Duration) {
        self.advance(self.time_base.duration_to_mu(duration));
    }

    /// Convert seconds using the session time base.
    pub fn seconds_to_mu(&self, seconds: f64) -> Mu {
        self.time_base.seconds_to_mu(seconds)
    }

    // =========================================================================
    // SLACK
    // =========================================================================

    /// Read the live counter.
    pub fn poll_live_counter(&mut self) -> Mu {
        self.controller.counter_mu()
    }

    /// Cursor minus live counter.
    pub fn slack(&mut self) -> Mu {
        self.cursor.saturating_sub(self.controller.counter_mu())
    }

    /// Set the cursor to the live counter plus `margin`.
    ///
    /// The cursor may move backwards; a later emission on a channel that
    /// already has events queued beyond the new cursor fails with
    /// [`RtioError::Sequence`].
    pub fn reset_to_now(&mut self, margin: Mu) {
        let counter = self.controller.counter_mu();
        self.cursor = counter.saturating_add(margin);
        self.metrics.record_break();
        debug!(cursor = self.cursor, counter, margin, "Cursor reset to counter");
    }

    /// Move the cursor to at least one break margin past the live counter.
    ///
    /// Never moves the cursor backwards. Returns true if the cursor moved.
    pub fn break_realtime(&mut self) -> bool {
        let counter = self.controller.counter_mu();
        let min_now = counter.saturating_add(self.policy.break_margin);
        if self.cursor >= min_now {
            return false;
        }
        debug!(
            cursor = self.cursor,
            counter,
            lag = min_now - self.cursor,
            "Breaking realtime"
        );
        self.cursor = min_now;
        self.metrics.record_break();
        true
    }

    /// Widen slack to at least `min_slack` if it has fallen below it.
    ///
    /// Returns true if the cursor moved.
    pub fn ensure_slack(&mut self, min_slack: Mu) -> bool {
        let counter = self.controller.counter_mu();
        let target = counter.saturating_add(min_slack.max(self.policy.break_margin));
        if self.cursor >= counter.saturating_add(min_slack) {
            return false;
        }
        warn!(
            slack = self.cursor - counter,
            min_slack, "Slack below minimum, widening"
        );
        self.cursor = target;
        self.metrics.record_break();
        true
    }

    /// Widen slack to `widen_slack` when the controller queue is near full.
    ///
    /// A near-full queue stalls the producer until the counter reaches the
    /// oldest pending event, which eats into slack. Returns true if the
    /// cursor moved; controllers that do not report a capacity never widen.
    pub fn guard_queue(&mut self) -> bool {
        let Some(capacity) = self.controller.queue_capacity() else {
            return false;
        };
        let depth = self.controller.queue_depth();
        if capacity.saturating_sub(depth) > self.policy.queue_headroom {
            return false;
        }
        debug!(depth, capacity, "Event queue near capacity");
        self.ensure_slack(self.policy.widen_slack)
    }

    /// Block while the live counter is more than `target_fill` behind the cursor.
    ///
    /// Keeps the queue moderately full so repeated bursts neither starve nor
    /// overflow it. Returns the number of counter polls spent waiting.
    ///
    /// # Errors
    ///
    /// [`RtioError::Aborted`] if the abort flag is raised, and
    /// [`RtioError::PacingTimeout`] once `pacing_timeout` has elapsed.
    pub fn wait_for_fill(&mut self) -> RtioResult<u64> {
        let threshold = self.cursor.saturating_sub(self.policy.target_fill);
        let batch = self.policy.abort_check_every.max(1);
        let started = Instant::now();
        let mut polls = 0u64;

        loop {
            for _ in 0..batch {
                if self.controller.counter_mu() >= threshold {
                    if polls > 0 {
                        debug!(polls, threshold, "Pacing wait complete");
                    }
                    return Ok(polls);
                }
                polls += 1;
                std::hint::spin_loop();
            }

            if self.abort.is_requested() {
                debug!(polls, "Pacing wait aborted");
                return Err(RtioError::Aborted);
            }
            if let Some(timeout) = self.policy.pacing_timeout {
                let waited = started.elapsed();
                if waited >= timeout {
                    let waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX);
                    error!(waited_ms, threshold, "Pacing wait timed out");
                    return Err(RtioError::PacingTimeout { waited_ms });
                }
            }
        }
    }

    // =========================================================================
    // EMISSION
    // =========================================================================

    /// Emit one event at the cursor.
    ///
    /// # Errors
    ///
    /// [`RtioError::Underflow`] if the live counter has passed the cursor,
    /// [`RtioError::Sequence`] if the channel already has a later event, or
    /// any error from the controller queue.
    pub fn emit(&mut self, channel: u32, kind: EventKind) -> RtioResult<()> {
        let timestamp = self.cursor;
        let counter = self.controller.counter_mu();
        if counter > timestamp {
            self.metrics.record_underflow();
            error!(channel, timestamp, counter, %kind, "RTIO underflow");
            return Err(RtioError::Underflow {
                channel,
                timestamp,
                counter,
            });
        }

        if let Some(&last) = self.last_event.get(&channel) {
            if timestamp < last {
                error!(channel, timestamp, last, %kind, "RTIO sequence error");
                return Err(RtioError::Sequence {
                    channel,
                    timestamp,
                    last,
                });
            }
        }

        let submitted = self.controller.submit(Event {
            channel,
            timestamp,
            kind,
        });
        if let Err(e) = submitted {
            // Submission cost or a queue stall can still miss the deadline
            if let RtioError::Underflow { counter, .. } = &e {
                self.metrics.record_underflow();
                error!(
                    channel,
                    timestamp,
                    counter = *counter,
                    %kind,
                    "RTIO underflow in submit"
                );
            }
            return Err(e);
        }
        self.last_event.insert(channel, timestamp);
        self.metrics.record(timestamp - counter);
        self.events_emitted += 1;
        trace!(channel, timestamp, slack = timestamp - counter, %kind, "Event emitted");
        Ok(())
    }
}
