// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Shared kernel/userspace ABI for the Cinder RTOS (SVC selectors, task ids, snapshots)
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Stable (selector numbers and snapshot layouts are wire ABI)
//! TEST_COVERAGE: Unit tests for id packing, name handling and selector decoding
//! PUBLIC API: SyscallNumber, TaskState, TaskId, Name, snapshot::*, sys::*
//! INVARIANTS: Selectors 0..=17 never renumbered; snapshot structs are #[repr(C)]

#![cfg_attr(not(test), no_std)]
#![deny(clippy::all, missing_docs)]

pub mod snapshot;
pub mod sys;

use core::{fmt, num::NonZeroU32};

pub use snapshot::{IpcsInfo, MutexInfo, PsInfo, SemaphoreInfo, TaskInfo};

/// Maximum number of task slots in the kernel task table.
pub const MAX_TASKS: usize = 12;
/// Number of kernel mutexes.
pub const MAX_MUTEXES: usize = 1;
/// Number of kernel counting semaphores.
pub const MAX_SEMAPHORES: usize = 3;
/// Upper bound on any wait queue; a queue never holds more slots than exist.
pub const MAX_WAITERS: usize = MAX_TASKS;
/// Bytes reserved for a task name, including the terminating NUL.
pub const NAME_LEN: usize = 16;
/// Number of scheduling priority levels (0 is highest).
pub const NUM_PRIORITIES: u8 = 8;

/// Semaphore signalled when a key is pressed.
pub const KEY_PRESSED: u8 = 0;
/// Semaphore signalled when a key is released.
pub const KEY_RELEASED: u8 = 1;
/// Semaphore used to request an LED flash.
pub const FLASH_REQ: u8 = 2;
/// The single kernel mutex guarding the shared resource.
pub const RESOURCE: u8 = 0;

static_assertions::const_assert!(MAX_TASKS < 255);
static_assertions::const_assert!(MAX_WAITERS >= 2);

/// SVC immediate selectors.
///
/// **ABI STABILITY**: discriminants are encoded in the `svc #imm` instruction of every
/// compiled task. New selectors must be appended.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyscallNumber {
    /// Give up the CPU.
    Yield = 0,
    /// Sleep for `r0` ticks.
    Sleep = 1,
    /// Lock mutex `r0`.
    Lock = 2,
    /// Unlock mutex `r0`.
    Unlock = 3,
    /// Wait on semaphore `r0`.
    Wait = 4,
    /// Post semaphore `r0`.
    Post = 5,
    /// Enable (`r0 != 0`) or disable priority inheritance.
    PriorityInheritance = 6,
    /// Select priority (`r0 != 0`) or round-robin scheduling.
    Scheduler = 7,
    /// Enable (`r0 != 0`) or disable tick preemption.
    Preemption = 8,
    /// Reset the system.
    Reboot = 9,
    /// Look up a task id by name (`r0` = ptr, `r1` = len).
    PidOf = 10,
    /// Fill the IPC snapshot at `r0`.
    Ipcs = 11,
    /// Fill the process snapshot at `r0`.
    Ps = 12,
    /// Kill a task by name (`r0` = ptr, `r1` = len).
    KillByName = 13,
    /// Kill a task by id.
    KillById = 14,
    /// Restart a killed task by name (`r0` = ptr, `r1` = len).
    RunByName = 15,
    /// Restart a killed task by id.
    RestartById = 16,
    /// Set the current priority of task `r0` to `r1`.
    SetPriority = 17,
}

impl SyscallNumber {
    /// Decodes an SVC immediate; unknown selectors yield `None`.
    pub const fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::Yield,
            1 => Self::Sleep,
            2 => Self::Lock,
            3 => Self::Unlock,
            4 => Self::Wait,
            5 => Self::Post,
            6 => Self::PriorityInheritance,
            7 => Self::Scheduler,
            8 => Self::Preemption,
            9 => Self::Reboot,
            10 => Self::PidOf,
            11 => Self::Ipcs,
            12 => Self::Ps,
            13 => Self::KillByName,
            14 => Self::KillById,
            15 => Self::RunByName,
            16 => Self::RestartById,
            17 => Self::SetPriority,
            _ => return None,
        })
    }

    /// Returns the selector byte.
    pub const fn as_raw(self) -> u8 {
        self as u8
    }
}

/// Lifecycle state of a task slot, as reported in [`TaskInfo::state`].
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TaskState {
    /// Slot unused.
    #[default]
    Invalid = 0,
    /// Created (or restarted) but never dispatched; no trap frame yet.
    NeverRun = 1,
    /// Runnable.
    Ready = 2,
    /// Sleeping until its delay counter reaches zero.
    Delayed = 3,
    /// Queued on a semaphore.
    BlockedOnSemaphore = 4,
    /// Queued on a mutex.
    BlockedOnMutex = 5,
    /// Terminated; resources reclaimed, may be restarted.
    Killed = 6,
}

impl TaskState {
    /// Decodes a state code.
    pub const fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::Invalid,
            1 => Self::NeverRun,
            2 => Self::Ready,
            3 => Self::Delayed,
            4 => Self::BlockedOnSemaphore,
            5 => Self::BlockedOnMutex,
            6 => Self::Killed,
            _ => return None,
        })
    }

    /// Short label used by `ps` style listings.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::NeverRun => "unrun",
            Self::Ready => "ready",
            Self::Delayed => "delayed",
            Self::BlockedOnSemaphore => "blocked-sem",
            Self::BlockedOnMutex => "blocked-mtx",
            Self::Killed => "killed",
        }
    }

    /// Returns true when the scheduler may dispatch a task in this state.
    pub const fn is_runnable(self) -> bool {
        matches!(self, Self::Ready | Self::NeverRun)
    }
}

/// Generational task handle: slot index plus a creation counter.
///
/// Packed as `generation << 8 | (slot + 1)`, so the raw value is never zero and zero can
/// signal "not found" across the SVC boundary.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct TaskId(NonZeroU32);

impl TaskId {
    /// Builds an id from its parts.
    pub const fn new(slot: u8, generation: u16) -> Self {
        let raw = ((generation as u32) << 8) | (slot as u32 + 1);
        match NonZeroU32::new(raw) {
            Some(v) => Self(v),
            // slot + 1 is never zero for slot < 255
            None => panic!("task id packs to zero"),
        }
    }

    /// Decodes a raw register value; zero and out-of-table slots yield `None`.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        let slot = (raw & 0xff) as usize;
        if slot == 0 || slot > MAX_TASKS || raw >> 24 != 0 {
            return None;
        }
        match NonZeroU32::new(raw) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Returns the packed register value.
    pub const fn as_raw(self) -> u32 {
        self.0.get()
    }

    /// Returns the slot index.
    pub const fn slot(self) -> usize {
        (self.0.get() & 0xff) as usize - 1
    }

    /// Returns the creation counter.
    pub const fn generation(self) -> u16 {
        (self.0.get() >> 8) as u16
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({}#{})", self.slot(), self.generation())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.slot(), self.generation())
    }
}

/// Fixed-capacity, NUL-padded task name.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Name([u8; NAME_LEN]);

impl Name {
    /// The empty name.
    pub const EMPTY: Self = Self([0; NAME_LEN]);

    /// Copies `s`, truncating to `NAME_LEN - 1` bytes on a character boundary.
    pub fn new(s: &str) -> Self {
        let mut end = s.len().min(NAME_LEN - 1);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        let mut bytes = [0u8; NAME_LEN];
        bytes[..end].copy_from_slice(&s.as_bytes()[..end]);
        Self(bytes)
    }

    /// Returns the name up to the first NUL.
    pub fn as_str(&self) -> &str {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        core::str::from_utf8(&self.0[..len]).unwrap_or("?")
    }

    /// Returns true when no characters are stored.
    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }
}

impl Default for Name {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
