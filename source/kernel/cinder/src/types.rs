// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Newtypes for task slots, priorities and synchronization object handles
//! OWNERS: @kernel-team
//! PUBLIC API: Slot, Priority, MutexId, SemaphoreId, TaskId (re-export), Name (re-export)
//! DEPENDS_ON: config limits
//! INVARIANTS: Every constructed handle is in range for its arena; Priority < NUM_PRIORITIES

use core::fmt;

use crate::config::{MAX_MUTEXES, MAX_SEMAPHORES, MAX_TASKS, NUM_PRIORITIES};

pub use cinder_abi::{Name, TaskId};

/// Index into the task table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Slot(u8);

impl Slot {
    /// Returns `None` when `index` is outside the task table.
    #[inline]
    pub const fn new(index: usize) -> Option<Self> {
        if index < MAX_TASKS {
            Some(Self(index as u8))
        } else {
            None
        }
    }

    #[inline]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn as_raw(self) -> u8 {
        self.0
    }
}

impl From<TaskId> for Slot {
    fn from(id: TaskId) -> Self {
        // TaskId::from_raw/new only admit slots below MAX_TASKS
        Self(id.slot() as u8)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority, 0 is highest.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Priority(u8);

impl Priority {
    pub const HIGHEST: Self = Self(0);
    pub const LOWEST: Self = Self(NUM_PRIORITIES - 1);

    #[inline]
    pub const fn new(raw: u8) -> Option<Self> {
        if raw < NUM_PRIORITIES {
            Some(Self(raw))
        } else {
            None
        }
    }

    #[inline]
    pub const fn as_raw(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! object_id {
    ($(#[$doc:meta])* $name:ident, $max:expr) => {
        $(#[$doc])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        #[repr(transparent)]
        pub struct $name(u8);

        impl $name {
            #[inline]
            pub const fn new(raw: u32) -> Option<Self> {
                if (raw as usize) < $max {
                    Some(Self(raw as u8))
                } else {
                    None
                }
            }

            #[inline]
            pub const fn as_index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

object_id!(
    /// Handle of a kernel mutex.
    MutexId,
    MAX_MUTEXES
);
object_id!(
    /// Handle of a kernel counting semaphore.
    SemaphoreId,
    MAX_SEMAPHORES
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_range_checked() {
        assert!(Slot::new(MAX_TASKS - 1).is_some());
        assert!(Slot::new(MAX_TASKS).is_none());
        assert!(Priority::new(7).is_some());
        assert!(Priority::new(8).is_none());
        assert!(MutexId::new(0).is_some());
        assert!(MutexId::new(1).is_none());
        assert!(SemaphoreId::new(2).is_some());
        assert!(SemaphoreId::new(3).is_none());
        assert!(SemaphoreId::new(u32::MAX).is_none());
    }

    #[test]
    fn slot_from_task_id() {
        let id = TaskId::new(5, 9);
        assert_eq!(Slot::from(id).as_index(), 5);
    }
}
