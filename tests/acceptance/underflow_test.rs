//! Underflow acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - Forcing the live counter past the cursor makes the next emission fail
//!   with an underflow, and nothing reaches the queue
//! - The check applies to every leaf, not once per block
//! - A realtime break restores positive slack without rewinding the cursor
//! - An event whose deadline passes while the controller accepts it (queue
//!   stall or submission cost) is an underflow too

use super::common::{bench_session, ideal_session, output, test_policy, timestamps};
use rtio_common::config::HarnessConfig;
use rtio_common::error::RtioError;
use rtio_runtime::{pulse_train, EventKind, IterationLimit};
use std::time::Duration;

#[test]
fn test_forced_counter_yields_underflow() {
    let mut s = ideal_session(test_policy(0));
    let out = output(1);
    let cursor = s.now_mu();
    s.controller_mut().set_counter(cursor + 1);

    let err = out.pulse_mu(&mut s, 100).unwrap_err();
    assert_eq!(
        err,
        RtioError::Underflow {
            channel: 1,
            timestamp: cursor,
            counter: cursor + 1,
        }
    );
    assert!(s.controller().events().is_empty());
    assert_eq!(s.metrics().underflow_count(), 1);
}

#[test]
fn test_underflow_mid_block() {
    let mut s = ideal_session(test_policy(0));
    let out = output(1);
    let entry = s.now_mu();

    let result = s.sequential(|s| {
        out.pulse_mu(s, 100)?;
        // The deadline of the next edge passes while the block runs
        s.controller_mut().set_counter(entry + 150);
        out.pulse_mu(s, 100)
    });

    assert!(matches!(result, Err(RtioError::Underflow { channel: 1, .. })));
    // First pulse went out in full
    assert_eq!(
        timestamps(s.controller().events(), 1, EventKind::Rising),
        vec![entry]
    );
    assert_eq!(
        timestamps(s.controller().events(), 1, EventKind::Falling),
        vec![entry + 100]
    );
}

#[test]
fn test_stall_in_parallel_block_yields_underflow() {
    let mut s = ideal_session(test_policy(0));
    s.controller_mut().set_capacity(4, true);
    let a = output(1);
    let b = output(2);
    let entry = s.now_mu();

    let result = s.parallel(|p| {
        p.branch(|s| {
            s.advance(1_000);
            a.pulse_mu(s, 1_000)?;
            s.advance(1_000);
            a.pulse_mu(s, 1_000)
        })?;
        // The queue is full of later events, so this submit stalls past it
        p.branch(|s| b.on(s))
    });

    assert_eq!(
        result,
        Err(RtioError::Underflow {
            channel: 2,
            timestamp: entry,
            counter: entry + 1_000,
        })
    );
    assert_eq!(s.controller().stalls(), 1);
    assert!(timestamps(s.controller().events(), 2, EventKind::Rising).is_empty());
    assert_eq!(s.metrics().underflow_count(), 1);
}

#[test]
fn test_submit_cost_past_deadline_yields_underflow() {
    let mut s = ideal_session(test_policy(0));
    let out = output(1);
    let cursor = s.now_mu();
    // Reading the counter is free, but accepting the event is not
    s.controller_mut().set_emit_cost(cursor + 1);

    let err = out.on(&mut s).unwrap_err();
    assert!(matches!(
        err,
        RtioError::Underflow { channel: 1, timestamp, .. } if timestamp == cursor
    ));
    assert!(s.controller().events().is_empty());
    assert_eq!(s.metrics().underflow_count(), 1);
}

#[test]
fn test_break_realtime_recovers() {
    let mut s = ideal_session(test_policy(0));
    let out = output(1);
    out.pulse_mu(&mut s, 100).unwrap();
    let last = s.now_mu();

    s.controller_mut().set_counter(last + 10_000);
    assert!(out.pulse_mu(&mut s, 100).is_err());

    assert!(s.break_realtime());
    assert!(s.now_mu() > last);
    assert_eq!(s.slack(), s.policy().break_margin);
    out.pulse_mu(&mut s, 100).unwrap();
}

#[test]
fn test_slow_producer_underflows_pulse_train() {
    let mut config = HarnessConfig::default();
    // 20 us of CPU per emission against a 2 us pulse period
    config.simulator.emit_cost = Duration::from_micros(20);
    config.ttl_out_test.bursts = 100;
    let (mut s, channels) = bench_session(&config);

    let err = pulse_train(
        &mut s,
        &channels.ttl_outs,
        &config.ttl_out_test,
        &mut IterationLimit::new(1),
    )
    .unwrap_err();
    assert!(matches!(err, RtioError::Underflow { .. }));
    assert!(s.metrics().underflow_count() >= 1);
}

#[test]
fn test_no_underflow_on_nominal_bench() {
    let mut config = HarnessConfig::default();
    config.ttl_out_test.bursts = 1_000;
    let (mut s, channels) = bench_session(&config);

    let report = pulse_train(
        &mut s,
        &channels.ttl_outs,
        &config.ttl_out_test,
        &mut IterationLimit::new(3),
    )
    .unwrap();
    assert_eq!(report.iterations, 3);
    assert_eq!(report.slack.underflow_count, 0);
    assert!(report.slack.min.unwrap() >= 0);
}
