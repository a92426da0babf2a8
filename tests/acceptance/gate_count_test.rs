//! Gate/count loopback acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - W = 1 ms, settle 50 us, 42 pulses of 2 us with 2 us spacing: count is
//!   exactly 42
//! - W = 100 us (shorter than the 218 us pulse branch): count is strictly
//!   below 42, and the same on every run
//! - A fault on one input does not hide the results of the others

use super::common::bench_session;
use rtio_common::config::HarnessConfig;
use rtio_runtime::{loopback_check, GateCountTest};
use std::time::Duration;

fn short_window() -> GateCountTest {
    GateCountTest {
        window: Duration::from_micros(100),
        ..GateCountTest::default()
    }
}

#[test]
fn test_nominal_window_counts_exactly() {
    let config = HarnessConfig::default();
    let (mut s, channels) = bench_session(&config);
    let test = GateCountTest::from(&config.gate_count);
    test.check_window(&s.time_base()).unwrap();

    let outcome = test
        .run(&mut s, &channels.ttl_outs[0], &channels.ttl_ins[0])
        .unwrap();
    assert_eq!(outcome.expected, 42);
    assert_eq!(outcome.observed, 42);
    assert!(outcome.passed());
}

#[test]
fn test_short_window_misses_pulses_deterministically() {
    let config = HarnessConfig::default();
    let mut seen = Vec::new();
    for _ in 0..3 {
        let (mut s, channels) = bench_session(&config);
        let outcome = short_window()
            .run(&mut s, &channels.ttl_outs[0], &channels.ttl_ins[0])
            .unwrap();
        assert!(outcome.observed < 42);
        assert!(!outcome.passed());
        seen.push(outcome.observed);
    }
    assert!(seen.windows(2).all(|w| w[0] == w[1]), "counts {seen:?}");
    assert_eq!(seen[0], 13);
}

#[test]
fn test_short_window_flagged_by_check() {
    let tb = HarnessConfig::default().time_base().unwrap();
    assert!(short_window().check_window(&tb).is_err());
}

#[test]
fn test_count_grows_with_window() {
    let config = HarnessConfig::default();
    let (mut s, channels) = bench_session(&config);
    let mut previous = 0;
    for window_us in (50..=250).step_by(20) {
        let test = GateCountTest {
            window: Duration::from_micros(window_us),
            ..GateCountTest::default()
        };
        let observed = test
            .run(&mut s, &channels.ttl_outs[0], &channels.ttl_ins[0])
            .unwrap()
            .observed;
        assert!(observed >= previous, "window {window_us} us: {observed} < {previous}");
        previous = observed;
    }
    // The last rising edge is at 50 + 41 * 4 = 214 us
    assert_eq!(previous, 42);
}

#[test]
fn test_loopback_on_every_input() {
    let config = HarnessConfig::default();
    let (mut s, channels) = bench_session(&config);
    let results = loopback_check(
        &mut s,
        &channels.ttl_outs[0],
        &channels.ttl_ins,
        &GateCountTest::from(&config.gate_count),
    );
    let inputs: Vec<&str> = results.iter().map(|r| r.input.as_str()).collect();
    assert_eq!(inputs, vec!["ttl4", "ttl5"]);
    assert!(results.iter().all(|r| r.passed()));
}

#[test]
fn test_underflow_on_one_input_does_not_hide_others() {
    let mut config = HarnessConfig::default();
    // Each emission costs more CPU than the 2 us pulse period, so the pulse
    // branch overtakes the 125 us break margin.
    config.simulator.emit_cost = Duration::from_micros(5);
    let (mut s, channels) = bench_session(&config);

    let results = loopback_check(
        &mut s,
        &channels.ttl_outs[0],
        &channels.ttl_ins,
        &GateCountTest::from(&config.gate_count),
    );
    assert_eq!(results.len(), 2);
    for result in &results {
        let err = result.outcome.as_ref().unwrap_err();
        assert!(err.is_timing_fault(), "{}: {err}", result.input);
    }
}
