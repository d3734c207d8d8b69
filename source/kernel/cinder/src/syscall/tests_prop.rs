// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for kernel-level protocols driven through syscalls
//! OWNERS: @kernel-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCOPE:
//!   - Priority inheritance bound after every tick
//!   - Termination cleanup of heap runs, windows and wait queues
//!
//! TEST_SCENARIOS:
//!   - inheritance_bound_holds_after_tick(): owner current = min(static, waiters' current)
//!   - terminated_task_leaves_nothing_behind(): no blocks, deny-all mask, in no queue

use super::api::tests::HostMemory;
use super::Args;
use crate::config::KernelConfig;
use crate::hal::sim::SimBoard;
use crate::kernel::Kernel;
use crate::mm::protect::SrdMask;
use crate::sync::LockOutcome;
use crate::task::{BlockedOn, TaskState};
use crate::types::{MutexId, Priority, SemaphoreId, Slot};
use cinder_abi::SyscallNumber;
use proptest::prelude::*;

fn kernel(prios: &[u8]) -> Kernel<SimBoard> {
    let config = KernelConfig::default().with_wait_queue_capacity(12).with_policy(true, true, true);
    let mut k = Kernel::new(SimBoard::new(), config);
    k.init_mutex(0).unwrap();
    for s in 0..3 {
        k.init_semaphore(s, 0).unwrap();
    }
    for (i, &p) in prios.iter().enumerate() {
        k.create_thread_at(0x1001 + i as u32 * 0x40, "t", p, 512).unwrap();
    }
    k.start().unwrap();
    k
}

fn park(k: &mut Kernel<SimBoard>, slot: Slot, on: BlockedOn) {
    let t = k.tasks.get_mut(slot).unwrap();
    t.state = match on {
        BlockedOn::Mutex(_) => TaskState::BlockedOnMutex,
        BlockedOn::Semaphore(_) => TaskState::BlockedOnSemaphore,
    };
    t.blocked_on = Some(on);
}

proptest! {
    #[test]
    fn inheritance_bound_holds_after_tick(
        prios in proptest::collection::vec(0u8..8, 2..=12),
        waiting in proptest::collection::vec(any::<bool>(), 12),
    ) {
        let mut k = kernel(&prios);
        let m = MutexId::new(0).unwrap();
        let owner = k.current_slot().unwrap();
        {
            let o = k.tasks.get_mut(owner).unwrap();
            o.priority = Priority::LOWEST;
            o.current_priority = Priority::LOWEST;
        }
        prop_assert_eq!(k.ipc.mutex_mut(m).lock(owner, 12), Ok(LockOutcome::Acquired));
        for i in 0..prios.len() {
            let slot = Slot::new(i).unwrap();
            if slot != owner && waiting[i] {
                prop_assert_eq!(k.ipc.mutex_mut(m).lock(slot, 12), Ok(LockOutcome::Queued));
                park(&mut k, slot, BlockedOn::Mutex(m));
            }
        }

        k.on_tick();
        let expected = k
            .ipc()
            .mutex(m)
            .waiters()
            .iter()
            .map(|s| k.tasks().get(s).unwrap().current_priority)
            .fold(k.tasks().get(owner).unwrap().priority, core::cmp::min);
        let o = k.tasks().get(owner).unwrap();
        prop_assert_eq!(o.current_priority, expected);
        prop_assert_eq!(o.boosted, expected != o.priority);

        let r0 = k.syscall(SyscallNumber::Unlock.as_raw(), &Args::new(0, 0), &mut HostMemory::default());
        prop_assert_eq!(r0, 1);
        let o = k.tasks().get(owner).unwrap();
        prop_assert_eq!(o.current_priority, o.priority);
    }

    #[test]
    fn terminated_task_leaves_nothing_behind(
        n in 2usize..=8,
        victim in 0usize..8,
        extra in 0u32..3000,
        on_semaphore in any::<bool>(),
    ) {
        let victim = victim % n;
        let mut k = kernel(&vec![1; n]);
        let current = k.current_slot().unwrap();
        if extra > 0 {
            prop_assume!(k.malloc(extra).is_ok());
        }
        let slot = Slot::new(victim).unwrap();
        if slot != current {
            if on_semaphore {
                let s = SemaphoreId::new(2).unwrap();
                prop_assert_eq!(k.ipc.semaphore_mut(s).wait(slot, 12), Ok(LockOutcome::Queued));
                park(&mut k, slot, BlockedOn::Semaphore(s));
            } else {
                let m = MutexId::new(0).unwrap();
                let _ = k.ipc.mutex_mut(m).lock(current, 12);
                prop_assert_eq!(k.ipc.mutex_mut(m).lock(slot, 12), Ok(LockOutcome::Queued));
                park(&mut k, slot, BlockedOn::Mutex(m));
            }
        }
        let id = k.tasks().get(slot).unwrap().id;

        prop_assert!(k.terminate(slot));
        let t = k.tasks().get(slot).unwrap();
        prop_assert_eq!(t.state, TaskState::Killed);
        prop_assert_eq!(t.mask, SrdMask::DENY_ALL);
        prop_assert!(k.heap().live_runs().all(|run| run.owner.id != id));
        prop_assert!(k.ipc().mutexes().all(|m| !m.waiters().contains(slot) && m.owner() != Some(slot)));
        prop_assert!(k.ipc().semaphores().all(|s| !s.waiters().contains(slot)));
        for run in k.heap().live_runs() {
            prop_assert!(k.protection().shared().allows(run.base));
        }
    }
}
