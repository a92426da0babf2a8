//! Composition arithmetic acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - A sequential block advances the cursor by the sum of its leaves, and
//!   the i-th leaf starts at entry plus the sum of the leaves before it
//! - A parallel block advances the cursor by its longest branch, and every
//!   branch starts at the entry cursor
//! - `advance(0)` and empty blocks never change the cursor

use super::common::{durations, ideal_session, input, output, test_policy, timestamps};
use rtio_common::error::RtioError;
use rtio_common::time::Mu;
use rtio_runtime::{Block, EventKind, Op};

#[test]
fn test_sequential_leaf_starts_are_prefix_sums() {
    for seed in 1..=20 {
        let widths = durations(seed, 16, 500);
        let mut s = ideal_session(test_policy(0));
        let out = output(1);
        let entry = s.now_mu();

        s.sequential(|s| {
            for &w in &widths {
                out.pulse_mu(s, w)?;
            }
            Ok(())
        })
        .unwrap();

        let total: Mu = widths.iter().sum();
        assert_eq!(s.now_mu(), entry + total, "seed {seed}");

        let starts = timestamps(s.controller().events(), 1, EventKind::Rising);
        let mut expected = Vec::with_capacity(widths.len());
        let mut at = entry;
        for &w in &widths {
            expected.push(at);
            at += w;
        }
        assert_eq!(starts, expected, "seed {seed}");
    }
}

#[test]
fn test_parallel_advances_by_max_branch() {
    for seed in 1..=20 {
        let branch_lengths = durations(seed, 5, 10_000);
        let mut s = ideal_session(test_policy(0));
        let entry = s.now_mu();

        s.parallel(|p| {
            for (i, &len) in branch_lengths.iter().enumerate() {
                let out = output(u32::try_from(i).unwrap() + 1);
                p.branch(|s| out.pulse_mu(s, len))?;
            }
            Ok(())
        })
        .unwrap();

        let longest = *branch_lengths.iter().max().unwrap();
        assert_eq!(s.now_mu(), entry + longest, "seed {seed}");

        // Every branch starts at the entry cursor
        for i in 1..=5 {
            assert_eq!(
                timestamps(s.controller().events(), i, EventKind::Rising),
                vec![entry]
            );
        }
    }
}

#[test]
fn test_parallel_with_sequential_sub_block() {
    let mut s = ideal_session(test_policy(0));
    let block = Block::Parallel(vec![
        Block::gate(input(5), 1_000),
        Block::Sequential(vec![
            Block::delay(300),
            Block::pulse(output(1), 400),
            Block::delay(400),
        ]),
    ]);
    let entry = s.now_mu();
    s.execute(&block).unwrap();

    // The sub-block total (1100) wins over the gate (1000)
    assert_eq!(block.duration(), 1_100);
    assert_eq!(s.now_mu(), entry + 1_100);
}

#[test]
fn test_plan_agrees_with_emission() {
    let widths = durations(7, 12, 200);
    // One output per branch
    let branches: Vec<Block> = widths
        .chunks(3)
        .enumerate()
        .map(|(i, chunk)| {
            let out = output(10 + u32::try_from(i).unwrap());
            Block::Sequential(chunk.iter().map(|&w| Block::pulse(out.clone(), w)).collect())
        })
        .collect();
    let block = Block::Sequential(vec![
        Block::delay(50),
        Block::Parallel(branches),
        Block::pulse(output(3), 10),
    ]);

    let mut s = ideal_session(test_policy(0));
    let entry = s.now_mu();
    let plan = block.plan(entry);
    s.execute(&block).unwrap();
    assert_eq!(s.now_mu(), entry + plan.duration);

    for leaf in &plan.leaves {
        if let Op::Pulse { output, .. } = leaf.op {
            let starts = timestamps(
                s.controller().events(),
                output.channel().index(),
                EventKind::Rising,
            );
            assert!(starts.contains(&leaf.start), "leaf at {} not emitted", leaf.start);
        }
    }
}

#[test]
fn test_parallel_branches_on_one_channel_are_rejected() {
    let out = output(2);
    let block = Block::Parallel(vec![
        Block::pulse(out.clone(), 100),
        Block::pulse(out, 100),
    ]);
    let mut s = ideal_session(test_policy(0));
    let err = s.execute(&block).unwrap_err();
    assert!(matches!(err, RtioError::Sequence { channel: 2, .. }));
}

#[test]
fn test_idempotent_identity_operations() {
    let mut s = ideal_session(test_policy(0));
    let before = s.now_mu();

    s.advance(0);
    s.sequential(|_| Ok(())).unwrap();
    s.parallel(|_| Ok(())).unwrap();
    s.execute(&Block::Sequential(vec![])).unwrap();
    s.execute(&Block::Parallel(vec![Block::Sequential(vec![])]))
        .unwrap();

    assert_eq!(s.now_mu(), before);
    assert!(s.controller().events().is_empty());
}

#[test]
fn test_deep_nesting() {
    // par(seq(par(a, b), c), d)
    let inner = Block::Parallel(vec![Block::delay(30), Block::delay(70)]);
    let block = Block::Parallel(vec![
        Block::Sequential(vec![inner, Block::delay(20)]),
        Block::delay(80),
    ]);
    assert_eq!(block.duration(), 90);

    let mut s = ideal_session(test_policy(0));
    let entry = s.now_mu();
    s.execute(&block).unwrap();
    assert_eq!(s.now_mu(), entry + 90);
}
