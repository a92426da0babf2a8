//! Pacing acceptance tests.
//!
//! A producer that repeatedly emits bursts while polling the simulated live
//! counter must keep slack (cursor minus counter) inside a fixed bound and
//! never let it go negative.
//!
//! # Acceptance Criteria
//!
//! - With the pacing wait, slack stays within `target_fill` plus one burst
//! - With a stalling bounded queue, depth never exceeds its capacity
//! - Without either, slack grows with the run length
//! - A stuck counter ends the wait with a timeout instead of hanging

use super::common::{ideal_session, output, test_policy};
use rtio_common::error::RtioError;
use rtio_common::time::Mu;
use rtio_runtime::{RtioController, Session, SimulatedController, SlackPolicy, TtlOut};
use std::time::Duration;

const TARGET_FILL: Mu = 2_000_000;
const PULSES: usize = 10;
const PULSE: Mu = 10_000;
const BURST: Mu = PULSES as Mu * 2 * PULSE;
const BURSTS: usize = 200;

fn producer() -> Session<SimulatedController> {
    let mut s = ideal_session(SlackPolicy {
        break_margin: 125_000,
        ..test_policy(TARGET_FILL)
    });
    s.controller_mut().set_poll_cost(1_000);
    s.controller_mut().set_emit_cost(500);
    s
}

fn burst(s: &mut Session<SimulatedController>, out: &TtlOut) {
    for _ in 0..PULSES {
        out.pulse_mu(s, PULSE).unwrap();
        s.advance(PULSE);
    }
}

#[test]
fn test_paced_slack_is_bounded() {
    let mut s = producer().with_fill_bound(TARGET_FILL + BURST);
    let out = output(1);

    for _ in 0..BURSTS {
        s.break_realtime();
        s.wait_for_fill().unwrap();
        burst(&mut s, &out);
    }

    let m = s.metrics();
    assert_eq!(m.total_samples(), (BURSTS * PULSES * 2) as u64);
    assert!(m.min().unwrap() >= 0);
    assert!(
        m.max().unwrap() <= TARGET_FILL + BURST,
        "max slack {} over {}",
        m.max().unwrap(),
        TARGET_FILL + BURST
    );
    assert_eq!(m.underflow_count(), 0);
    assert_eq!(m.overfill_count(), 0);
}

#[test]
fn test_unpaced_slack_grows() {
    let mut s = producer().with_fill_bound(TARGET_FILL + BURST);
    let out = output(1);

    for _ in 0..BURSTS {
        s.break_realtime();
        burst(&mut s, &out);
    }

    // Nothing throttles the producer, so the lead keeps growing
    assert!(s.metrics().max().unwrap() > TARGET_FILL + BURST);
    assert!(s.metrics().overfill_count() > 0);
}

#[test]
fn test_stalling_queue_bounds_depth_and_slack() {
    const CAPACITY: usize = 16;
    let mut s = producer();
    s.controller_mut().set_capacity(CAPACITY, true);
    let out = output(1);

    for _ in 0..BURSTS {
        s.break_realtime();
        for _ in 0..PULSES {
            out.pulse_mu(&mut s, PULSE).unwrap();
            assert!(s.controller().queue_depth() <= CAPACITY);
            s.advance(PULSE);
        }
    }

    assert!(s.controller().stalls() > 0);
    let m = s.metrics();
    assert!(m.min().unwrap() >= 0);
    // Queued events are PULSE apart, so the queue spans at most CAPACITY of
    // them on top of the initial break margin
    let bound = s.policy().break_margin + (CAPACITY as Mu + 1) * PULSE;
    assert!(m.max().unwrap() <= bound, "max slack {}", m.max().unwrap());
}

#[test]
fn test_overflowing_queue_fails_loudly() {
    let mut s = producer();
    s.controller_mut().set_capacity(4, false);
    let out = output(1);

    s.advance(1_000_000);
    let mut result = Ok(());
    for _ in 0..10 {
        result = out.pulse_mu(&mut s, PULSE);
        if result.is_err() {
            break;
        }
    }
    assert_eq!(result, Err(RtioError::Overflow { capacity: 4 }));
}

#[test]
fn test_stuck_counter_times_out() {
    let mut s = ideal_session(SlackPolicy {
        pacing_timeout: Some(Duration::from_millis(50)),
        ..test_policy(1_000)
    });
    s.controller_mut().stall_counter(true);
    s.advance(1_000_000_000);

    let err = s.wait_for_fill().unwrap_err();
    assert!(matches!(err, RtioError::PacingTimeout { waited_ms } if waited_ms >= 50));
}

#[test]
fn test_wait_for_fill_leaves_target_lead() {
    let mut s = producer();
    s.advance(10 * TARGET_FILL);
    s.wait_for_fill().unwrap();
    let slack = s.slack();
    assert!(slack <= TARGET_FILL, "slack {slack}");
    assert!(slack > 0);
}
