// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Task control records and the fixed task table
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests (slot allocation, lookup, duplicate entry rejection)
//! PUBLIC API: TaskTable, Task, TaskState, BlockedOn, TaskEntry, CreateError
//! DEPENDS_ON: types, mm::protect::SrdMask
//! INVARIANTS: Occupied slots form a prefix of the table (slots are never freed, only Killed);
//!             entry points are unique among occupied slots
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

use crate::config::MAX_TASKS;
use crate::mm::protect::SrdMask;
use crate::types::{MutexId, Name, Priority, SemaphoreId, Slot, TaskId};

pub use cinder_abi::TaskState;

/// Task entry point; tasks never return.
pub type TaskEntry = extern "C" fn() -> !;

/// Synchronization object a blocked task is queued on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockedOn {
    Mutex(MutexId),
    Semaphore(SemaphoreId),
}

/// Ping/pong CPU-time accounting phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Ping,
    Pong,
}

impl Phase {
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Phase::Ping => 0,
            Phase::Pong => 1,
        }
    }

    #[inline]
    pub const fn flip(self) -> Self {
        match self {
            Phase::Ping => Phase::Pong,
            Phase::Pong => Phase::Ping,
        }
    }
}

/// Task control record.
#[derive(Clone, Copy, Debug)]
pub struct Task {
    pub id: TaskId,
    pub entry: u32,
    pub state: TaskState,
    /// Saved stack pointer; meaningful only while the task is not current.
    pub sp: u32,
    /// Base of the stack allocation, 0 when none is held.
    pub stack_base: u32,
    pub stack_bytes: u32,
    pub priority: Priority,
    pub current_priority: Priority,
    /// Set while the current priority was raised by inheritance.
    pub boosted: bool,
    pub ticks: u32,
    pub mask: SrdMask,
    pub cpu_time: [u32; 2],
    pub name: Name,
    pub blocked_on: Option<BlockedOn>,
}

impl Task {
    /// Top of the stack run, 8-byte aligned.
    #[inline]
    pub fn stack_top(&self) -> u32 {
        (self.stack_base + self.stack_bytes) & !7
    }

    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.state.is_runnable()
    }
}

#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateError {
    TableFull,
    DuplicateEntry,
    InvalidPriority,
    OutOfMemory,
    AlreadyStarted,
}

/// Fixed table of task slots.
pub struct TaskTable {
    slots: [Option<Task>; MAX_TASKS],
    len: usize,
}

impl TaskTable {
    pub const fn new() -> Self {
        Self { slots: [None; MAX_TASKS], len: 0 }
    }

    /// Number of occupied slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Next free slot, or why there is none.
    pub fn vacant_slot(&self, entry: u32) -> Result<Slot, CreateError> {
        if self.iter().any(|(_, t)| t.entry == entry) {
            return Err(CreateError::DuplicateEntry);
        }
        Slot::new(self.len).ok_or(CreateError::TableFull)
    }

    /// Fills the next free slot; the caller obtained `task.id` from `vacant_slot`.
    pub fn insert(&mut self, task: Task) {
        let index = task.id.slot();
        debug_assert_eq!(index, self.len);
        self.slots[index] = Some(task);
        self.len += 1;
    }

    #[inline]
    pub fn get(&self, slot: Slot) -> Option<&Task> {
        self.slots[slot.as_index()].as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, slot: Slot) -> Option<&mut Task> {
        self.slots[slot.as_index()].as_mut()
    }

    /// Looks up a task by exact id; stale generations miss.
    pub fn find_id(&self, id: TaskId) -> Option<Slot> {
        let slot = Slot::from(id);
        self.get(slot).filter(|t| t.id == id).map(|_| slot)
    }

    pub fn find_name(&self, name: &str) -> Option<Slot> {
        self.iter().find(|(_, t)| t.name.as_str() == name).map(|(slot, _)| slot)
    }

    /// Occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (Slot, &Task)> + '_ {
        self.slots[..self.len]
            .iter()
            .enumerate()
            .filter_map(|(i, t)| Some((Slot::new(i)?, t.as_ref()?)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Task> + '_ {
        self.slots[..self.len].iter_mut().flatten()
    }
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}
