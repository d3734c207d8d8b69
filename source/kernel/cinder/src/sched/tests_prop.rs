// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for task selection
//! OWNERS: @kernel-sched-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCOPE:
//!   - Round-robin fairness over arbitrary runnable subsets
//!   - Priority dominance: the chosen task always has the best runnable current priority
//!   - Bucket fairness: equal-priority tasks alternate
//!
//! TEST_SCENARIOS:
//!   - round_robin_visits_every_runnable_task(): N decisions cover N runnable tasks
//!   - priority_choice_is_minimal(): no runnable task beats the choice
//!   - bucket_members_all_chosen(): every task of the winning bucket is chosen within its size

use super::{Policy, Scheduler};
use crate::mm::protect::SrdMask;
use crate::task::{Task, TaskState, TaskTable};
use crate::types::{Name, Priority, Slot, TaskId};
use proptest::prelude::*;

fn arb_state() -> impl Strategy<Value = TaskState> {
    prop_oneof![
        Just(TaskState::Ready),
        Just(TaskState::NeverRun),
        Just(TaskState::Delayed),
        Just(TaskState::BlockedOnMutex),
        Just(TaskState::BlockedOnSemaphore),
        Just(TaskState::Killed),
    ]
}

fn build(layout: &[(u8, TaskState)]) -> TaskTable {
    let mut table = TaskTable::new();
    for (i, &(p, state)) in layout.iter().enumerate() {
        let prio = Priority::new(p).unwrap();
        table.insert(Task {
            id: TaskId::new(i as u8, 1),
            entry: 0x1000 + i as u32 * 4,
            state,
            sp: 0,
            stack_base: 0,
            stack_bytes: 0,
            priority: prio,
            current_priority: prio,
            boosted: false,
            ticks: 0,
            mask: SrdMask::DENY_ALL,
            cpu_time: [0; 2],
            name: Name::new("p"),
            blocked_on: None,
        });
    }
    table
}

proptest! {
    #[test]
    fn round_robin_visits_every_runnable_task(
        layout in proptest::collection::vec((0u8..8, arb_state()), 1..=12),
        warmup in 0usize..20,
    ) {
        let table = build(&layout);
        let runnable: Vec<usize> = layout.iter().enumerate().filter(|(_, (_, s))| s.is_runnable()).map(|(i, _)| i).collect();
        prop_assume!(!runnable.is_empty());
        let mut sched = Scheduler::new(Policy::RoundRobin);
        for _ in 0..warmup {
            sched.select(&table).unwrap();
        }
        let mut seen = [false; 12];
        for _ in 0..runnable.len() {
            seen[sched.select(&table).unwrap().as_index()] = true;
        }
        for i in runnable {
            prop_assert!(seen[i], "slot {} starved", i);
        }
    }

    #[test]
    fn priority_choice_is_minimal(layout in proptest::collection::vec((0u8..8, arb_state()), 1..=12)) {
        let table = build(&layout);
        let best = layout.iter().filter(|(_, s)| s.is_runnable()).map(|(p, _)| *p).min();
        let mut sched = Scheduler::new(Policy::Priority);
        match best {
            None => prop_assert_eq!(sched.select(&table), None),
            Some(best) => {
                for _ in 0..layout.len() {
                    let slot = sched.select(&table).unwrap();
                    prop_assert_eq!(table.get(slot).unwrap().current_priority.as_raw(), best);
                }
            }
        }
    }

    #[test]
    fn bucket_members_all_chosen(n in 2usize..=12, offset in 0usize..24) {
        let table = build(&vec![(2, TaskState::Ready); n]);
        let mut sched = Scheduler::new(Policy::Priority);
        for _ in 0..offset {
            sched.select(&table).unwrap();
        }
        let mut seen = vec![false; n];
        for _ in 0..n {
            seen[sched.select(&table).unwrap().as_index()] = true;
        }
        prop_assert!(seen.iter().all(|&s| s));
        prop_assert!(Slot::new(n - 1).is_some());
    }
}
