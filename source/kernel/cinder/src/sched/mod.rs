// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Task selection under round-robin or 8-level priority policy
//! OWNERS: @kernel-sched-team
//! PUBLIC API: Scheduler (new/select/policy/set_policy), Policy
//! DEPENDS_ON: task::TaskTable
//! INVARIANTS: Deterministic; each priority bucket keeps its own cursor; selection only reads
//!             the table (the caller commits the switch)
//! ADR: docs/adr/0003-scheduling-policy.md

use crate::config::{MAX_TASKS, NUM_PRIORITIES};
use crate::task::TaskTable;
use crate::types::{Priority, Slot};

#[cfg(test)]
mod tests_prop;

/// Scheduling policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    RoundRobin,
    Priority,
}

/// Task selector.
///
/// Owned by the kernel instance, which moves into the global kernel lock at boot.
pub struct Scheduler {
    policy: Policy,
    /// Last slot dispatched by the round-robin scan; `None` before the first decision.
    rr_cursor: Option<usize>,
    /// Next slot to examine per priority bucket.
    bucket_cursor: [usize; NUM_PRIORITIES as usize],
}
static_assertions::assert_impl_all!(Scheduler: Send);

impl Scheduler {
    pub const fn new(policy: Policy) -> Self {
        Self {
            policy,
            rr_cursor: None,
            bucket_cursor: [0; NUM_PRIORITIES as usize],
        }
    }

    #[inline]
    pub fn policy(&self) -> Policy {
        self.policy
    }

    #[inline]
    pub fn set_policy(&mut self, policy: Policy) {
        self.policy = policy;
    }

    /// Chooses the next task to run; `None` only when nothing in the table is runnable.
    pub fn select(&mut self, tasks: &TaskTable) -> Option<Slot> {
        if self.policy == Policy::Priority {
            if let Some(slot) = self.select_by_priority(tasks) {
                return Some(slot);
            }
        }
        self.select_round_robin(tasks)
    }

    fn select_by_priority(&mut self, tasks: &TaskTable) -> Option<Slot> {
        let populated = tasks.len();
        if populated == 0 {
            return None;
        }
        for level in 0..NUM_PRIORITIES {
            let bucket = Priority::new(level)?;
            let cursor = &mut self.bucket_cursor[bucket.as_index()];
            let mut index = *cursor % populated;
            for _ in 0..populated {
                let slot = Slot::new(index)?;
                let eligible = tasks
                    .get(slot)
                    .is_some_and(|t| t.is_runnable() && t.current_priority == bucket);
                index = (index + 1) % populated;
                if eligible {
                    *cursor = index;
                    return Some(slot);
                }
            }
        }
        None
    }

    fn select_round_robin(&mut self, tasks: &TaskTable) -> Option<Slot> {
        let mut index = self.rr_cursor.unwrap_or(MAX_TASKS - 1);
        for _ in 0..MAX_TASKS {
            index = (index + 1) % MAX_TASKS;
            let slot = Slot::new(index)?;
            if tasks.get(slot).is_some_and(|t| t.is_runnable()) {
                self.rr_cursor = Some(index);
                return Some(slot);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::protect::SrdMask;
    use crate::task::{Task, TaskState};
    use crate::types::{Name, TaskId};

    fn table(prios: &[(u8, TaskState)]) -> TaskTable {
        let mut t = TaskTable::new();
        for (i, &(p, state)) in prios.iter().enumerate() {
            let prio = Priority::new(p).unwrap();
            t.insert(Task {
                id: TaskId::new(i as u8, 1),
                entry: 0x100 + i as u32,
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
                name: Name::new("t"),
                blocked_on: None,
            });
        }
        t
    }

    fn picks(s: &mut Scheduler, t: &TaskTable, n: usize) -> Vec<usize> {
        (0..n).map(|_| s.select(t).unwrap().as_index()).collect()
    }

    #[test]
    fn round_robin_starts_at_slot_zero_and_wraps() {
        let t = table(&[(7, TaskState::Ready), (0, TaskState::Ready), (3, TaskState::NeverRun)]);
        let mut s = Scheduler::new(Policy::RoundRobin);
        assert_eq!(picks(&mut s, &t, 5), vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn round_robin_skips_blocked() {
        let t = table(&[(7, TaskState::Ready), (0, TaskState::Delayed), (3, TaskState::Ready)]);
        let mut s = Scheduler::new(Policy::RoundRobin);
        assert_eq!(picks(&mut s, &t, 4), vec![0, 2, 0, 2]);
    }

    #[test]
    fn priority_zero_tasks_share_before_priority_one() {
        let t = table(&[(0, TaskState::Ready), (0, TaskState::Ready), (1, TaskState::Ready)]);
        let mut s = Scheduler::new(Policy::Priority);
        assert_eq!(picks(&mut s, &t, 4), vec![0, 1, 0, 1]);
    }

    #[test]
    fn lower_priority_runs_when_higher_blocked() {
        let mut t = table(&[(0, TaskState::Ready), (0, TaskState::Ready), (1, TaskState::Ready)]);
        let mut s = Scheduler::new(Policy::Priority);
        for slot in 0..2 {
            t.get_mut(Slot::new(slot).unwrap()).unwrap().state = TaskState::BlockedOnSemaphore;
        }
        assert_eq!(picks(&mut s, &t, 2), vec![2, 2]);
    }

    #[test]
    fn current_priority_decides_bucket() {
        let mut t = table(&[(7, TaskState::Ready), (3, TaskState::Ready)]);
        t.get_mut(Slot::new(0).unwrap()).unwrap().current_priority = Priority::HIGHEST;
        let mut s = Scheduler::new(Policy::Priority);
        assert_eq!(picks(&mut s, &t, 2), vec![0, 0]);
    }

    #[test]
    fn nothing_runnable_yields_none() {
        let t = table(&[(0, TaskState::Killed), (1, TaskState::Delayed)]);
        let mut s = Scheduler::new(Policy::Priority);
        assert_eq!(s.select(&t), None);
        assert_eq!(s.select(&TaskTable::new()), None);
    }
}
