//! Common utilities for integration tests.
//!
//! Provides helpers for:
//! - Building sessions over the simulated controller
//! - Deterministic duration sequences
//! - Extracting emitted timestamps from the event log

#![allow(dead_code)] // Not every helper is used by every test module

use rtio_common::config::{ChannelDirection, HarnessConfig};
use rtio_common::time::{Mu, TimeBase};
use rtio_runtime::{
    Channel, ChannelSet, Event, EventKind, Session, SimulatedController, SlackPolicy, TtlInOut,
    TtlOut,
};
use std::time::Duration;

/// Session over the configured simulated controller, with event logging.
pub fn bench_session(config: &HarnessConfig) -> (Session<SimulatedController>, ChannelSet) {
    let mut sim = SimulatedController::from_config(config).expect("simulator config");
    sim.enable_event_log();
    let session = Session::new(sim, config).expect("session");
    let channels = ChannelSet::from_configs(&config.channels).expect("channel set");
    (session, channels)
}

/// Session over a cost-free simulated controller with an explicit policy.
pub fn ideal_session(policy: SlackPolicy) -> Session<SimulatedController> {
    let mut sim = SimulatedController::ideal();
    sim.enable_event_log();
    Session::with_policy(sim, TimeBase::default(), policy)
}

/// Policy with a 1 us break margin and a 1 s pacing timeout.
pub fn test_policy(target_fill: Mu) -> SlackPolicy {
    SlackPolicy {
        break_margin: 1_000,
        target_fill,
        pacing_timeout: Some(Duration::from_secs(1)),
        abort_check_every: 64,
        queue_headroom: 2,
        widen_slack: 100_000,
    }
}

pub fn output(index: u32) -> TtlOut {
    TtlOut::new(Channel::new(
        format!("ttl_out{index}"),
        index,
        ChannelDirection::Output,
    ))
}

pub fn input(index: u32) -> TtlInOut {
    TtlInOut::new(Channel::new(
        format!("ttl_in{index}"),
        index,
        ChannelDirection::InOut,
    ))
    .expect("inout channel")
}

/// Deterministic pseudo-random durations in `1..=max`.
pub fn durations(seed: u64, count: usize, max: Mu) -> Vec<Mu> {
    let mut state = seed.max(1);
    (0..count)
        .map(|_| {
            // xorshift64
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let bounded = state % u64::try_from(max).expect("positive bound");
            Mu::try_from(bounded).expect("in range") + 1
        })
        .collect()
}

/// Timestamps of events of `kind` on `channel`, in emission order.
pub fn timestamps(events: &[Event], channel: u32, kind: EventKind) -> Vec<Mu> {
    events
        .iter()
        .filter(|e| e.channel == channel && e.kind == kind)
        .map(|e| e.timestamp)
        .collect()
}
