// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Process and IPC snapshot records filled in place by the `Ps`/`Ipcs` syscalls.

use crate::{Name, TaskState, MAX_MUTEXES, MAX_SEMAPHORES, MAX_TASKS, MAX_WAITERS};

/// One row of the process table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct TaskInfo {
    /// Packed [`crate::TaskId`], 0 for an unused slot.
    pub id: u32,
    /// Task name.
    pub name: Name,
    /// Remaining delay ticks.
    pub ticks: u32,
    /// [`TaskState`] code.
    pub state: u8,
    /// CPU share in the active accounting window, in hundredths of a percent.
    pub cpu: u32,
}

impl TaskInfo {
    /// Decoded lifecycle state; unknown codes read as `Invalid`.
    pub fn state(&self) -> TaskState {
        TaskState::from_raw(self.state).unwrap_or(TaskState::Invalid)
    }
}

/// Process table snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct PsInfo {
    /// One entry per task slot, in slot order.
    pub tasks: [TaskInfo; MAX_TASKS],
}

impl Default for PsInfo {
    fn default() -> Self {
        Self { tasks: [TaskInfo::default(); MAX_TASKS] }
    }
}

/// Names of the tasks queued on a synchronization object, head first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct QueueInfo {
    /// Number of valid entries in `names`.
    pub len: u8,
    /// Queued task names.
    pub names: [Name; MAX_WAITERS],
}

impl QueueInfo {
    /// Iterates the queued names in FIFO order.
    pub fn iter(&self) -> impl Iterator<Item = &Name> {
        self.names[..usize::from(self.len).min(MAX_WAITERS)].iter()
    }
}

impl Default for QueueInfo {
    fn default() -> Self {
        Self { len: 0, names: [Name::EMPTY; MAX_WAITERS] }
    }
}

/// Mutex status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct MutexInfo {
    /// Whether the mutex is held.
    pub locked: bool,
    /// Owner name, empty when unlocked.
    pub owner: Name,
    /// Waiting tasks.
    pub queue: QueueInfo,
}

/// Semaphore status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SemaphoreInfo {
    /// Available permits.
    pub count: u32,
    /// Waiting tasks.
    pub queue: QueueInfo,
}

/// IPC snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct IpcsInfo {
    /// Mutex records by index.
    pub mutexes: [MutexInfo; MAX_MUTEXES],
    /// Semaphore records by index.
    pub semaphores: [SemaphoreInfo; MAX_SEMAPHORES],
}

impl Default for IpcsInfo {
    fn default() -> Self {
        Self {
            mutexes: [MutexInfo::default(); MAX_MUTEXES],
            semaphores: [SemaphoreInfo::default(); MAX_SEMAPHORES],
        }
    }
}
