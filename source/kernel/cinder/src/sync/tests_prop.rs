// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for kernel mutex/semaphore state machines
//! OWNERS: @kernel-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCOPE:
//!   - Semaphore conservation across arbitrary wait/post sequences
//!   - Mutex mutual exclusion and the unlocked-implies-empty-queue invariant
//!
//! TEST_SCENARIOS:
//!   - semaphore_balance_is_conserved(): count - queued tracks posts minus accepted waits
//!   - mutex_single_owner(): owner never queued; unlocked mutex has no waiters

use super::{KernelMutex, LockOutcome, Semaphore};
use crate::types::Slot;
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum SemOp {
    Wait(usize),
    Post,
}

#[derive(Clone, Debug)]
enum MutexOp {
    Lock(usize),
    Unlock(usize),
}

fn arb_sem_op() -> impl Strategy<Value = SemOp> {
    prop_oneof![(0usize..12).prop_map(SemOp::Wait), Just(SemOp::Post)]
}

fn arb_mutex_op() -> impl Strategy<Value = MutexOp> {
    prop_oneof![(0usize..6).prop_map(MutexOp::Lock), (0usize..6).prop_map(MutexOp::Unlock)]
}

proptest! {
    #[test]
    fn semaphore_balance_is_conserved(
        initial in 0u32..4,
        limit in 1usize..5,
        ops in proptest::collection::vec(arb_sem_op(), 1..64),
    ) {
        let mut sem = Semaphore::new(initial);
        let mut balance = i64::from(initial);
        let mut blocked = [false; 12];
        for op in ops {
            match op {
                SemOp::Wait(i) if !blocked[i] => {
                    match sem.wait(Slot::new(i).unwrap(), limit) {
                        Ok(LockOutcome::Acquired) => balance -= 1,
                        Ok(LockOutcome::Queued) => {
                            blocked[i] = true;
                            balance -= 1;
                        }
                        Err(_) => {}
                    }
                }
                SemOp::Wait(_) => {}
                SemOp::Post => {
                    if let Some(woken) = sem.post() {
                        blocked[woken.as_index()] = false;
                    }
                    balance += 1;
                }
            }
            prop_assert_eq!(i64::from(sem.count()) - sem.waiters().len() as i64, balance);
            prop_assert!(sem.count() == 0 || sem.waiters().is_empty());
            prop_assert!(sem.waiters().len() <= limit);
        }
    }

    #[test]
    fn mutex_single_owner(limit in 1usize..5, ops in proptest::collection::vec(arb_mutex_op(), 1..64)) {
        let mut m = KernelMutex::new();
        let mut blocked = [false; 6];
        for op in ops {
            match op {
                MutexOp::Lock(i) if !blocked[i] => {
                    if let Ok(LockOutcome::Queued) = m.lock(Slot::new(i).unwrap(), limit) {
                        blocked[i] = true;
                    }
                }
                MutexOp::Unlock(i) if !blocked[i] => {
                    if let Ok(Some(next)) = m.unlock(Slot::new(i).unwrap()) {
                        blocked[next.as_index()] = false;
                    }
                }
                _ => {}
            }
            match m.owner() {
                None => prop_assert!(m.waiters().is_empty()),
                Some(owner) => prop_assert!(!m.waiters().contains(owner)),
            }
            prop_assert!(m.waiters().len() <= limit);
        }
    }
}
