// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel mutex and counting semaphores with bounded FIFO wait queues
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests + proptest (conservation, mutual exclusion)
//! PUBLIC API: WaitQueue, KernelMutex, Semaphore, Ipc, SyncError, LockOutcome, inheritance_target()
//! DEPENDS_ON: types::{Slot, Priority, MutexId, SemaphoreId}
//! INVARIANTS: Unlocked mutex has no owner and an empty queue; count > 0 implies empty queue;
//!             queues never exceed the configured limit (deterministic reject on saturation)
//! ADR: docs/adr/0005-sync-primitives.md

use crate::config::{MAX_MUTEXES, MAX_SEMAPHORES, MAX_WAITERS};
use crate::types::{MutexId, Priority, SemaphoreId, Slot};

#[cfg(test)]
mod tests_prop;

#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    /// Mutex or semaphore index out of range.
    InvalidId,
    /// The wait queue is at its configured limit.
    QueueFull { capacity: usize },
    /// Unlock by a task that does not hold the mutex.
    NotOwner,
    /// Lock by the task that already holds the mutex.
    AlreadyOwner,
}

/// Result of a blocking acquire.
#[must_use = "a queued caller must be blocked by the kernel"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    Queued,
}

/// Bounded FIFO of task slots.
#[derive(Debug, Clone, Copy)]
pub struct WaitQueue {
    slots: [Option<Slot>; MAX_WAITERS],
    len: usize,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self { slots: [None; MAX_WAITERS], len: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends `slot` unless the queue already holds `limit` entries.
    pub fn push(&mut self, slot: Slot, limit: usize) -> Result<(), SyncError> {
        let capacity = limit.min(MAX_WAITERS);
        if self.len >= capacity {
            return Err(SyncError::QueueFull { capacity });
        }
        self.slots[self.len] = Some(slot);
        self.len += 1;
        Ok(())
    }

    pub fn pop_front(&mut self) -> Option<Slot> {
        let head = self.slots[..self.len].first().copied().flatten()?;
        self.slots.copy_within(1..self.len, 0);
        self.len -= 1;
        self.slots[self.len] = None;
        Some(head)
    }

    /// Removes `slot` wherever it is queued, keeping the order of the rest.
    pub fn remove(&mut self, slot: Slot) -> bool {
        let Some(pos) = self.iter().position(|s| s == slot) else {
            return false;
        };
        self.slots.copy_within(pos + 1..self.len, pos);
        self.len -= 1;
        self.slots[self.len] = None;
        true
    }

    pub fn contains(&self, slot: Slot) -> bool {
        self.iter().any(|s| s == slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = Slot> + '_ {
        self.slots[..self.len].iter().flatten().copied()
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-recursive kernel mutex.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelMutex {
    owner: Option<Slot>,
    queue: WaitQueue,
}

impl KernelMutex {
    pub const fn new() -> Self {
        Self { owner: None, queue: WaitQueue::new() }
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.owner.is_some()
    }

    #[inline]
    pub fn owner(&self) -> Option<Slot> {
        self.owner
    }

    #[inline]
    pub fn waiters(&self) -> &WaitQueue {
        &self.queue
    }

    /// Acquires for `caller` or queues it behind the owner.
    pub fn lock(&mut self, caller: Slot, limit: usize) -> Result<LockOutcome, SyncError> {
        match self.owner {
            None => {
                self.owner = Some(caller);
                Ok(LockOutcome::Acquired)
            }
            Some(owner) if owner == caller => Err(SyncError::AlreadyOwner),
            Some(_) => {
                self.queue.push(caller, limit)?;
                Ok(LockOutcome::Queued)
            }
        }
    }

    /// Releases the mutex held by `caller`; ownership passes to the queue head, which is returned.
    pub fn unlock(&mut self, caller: Slot) -> Result<Option<Slot>, SyncError> {
        if self.owner != Some(caller) {
            return Err(SyncError::NotOwner);
        }
        self.owner = self.queue.pop_front();
        Ok(self.owner)
    }

    /// Drops `slot` from the wait queue.
    pub fn withdraw(&mut self, slot: Slot) -> bool {
        self.queue.remove(slot)
    }
}

/// Counting semaphore.
#[derive(Debug, Clone, Copy, Default)]
pub struct Semaphore {
    count: u32,
    queue: WaitQueue,
}

impl Semaphore {
    pub const fn new(count: u32) -> Self {
        Self { count, queue: WaitQueue::new() }
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[inline]
    pub fn waiters(&self) -> &WaitQueue {
        &self.queue
    }

    /// Takes a permit for `caller` or queues it.
    pub fn wait(&mut self, caller: Slot, limit: usize) -> Result<LockOutcome, SyncError> {
        if self.count > 0 {
            self.count -= 1;
            return Ok(LockOutcome::Acquired);
        }
        self.queue.push(caller, limit)?;
        Ok(LockOutcome::Queued)
    }

    /// Hands the permit to the queue head (returned) or banks it.
    pub fn post(&mut self) -> Option<Slot> {
        let woken = self.queue.pop_front();
        if woken.is_none() {
            self.count = self.count.saturating_add(1);
        }
        woken
    }

    pub fn withdraw(&mut self, slot: Slot) -> bool {
        self.queue.remove(slot)
    }
}

/// All kernel synchronization objects.
#[derive(Debug, Default)]
pub struct Ipc {
    mutexes: [KernelMutex; MAX_MUTEXES],
    semaphores: [Semaphore; MAX_SEMAPHORES],
}

impl Ipc {
    pub const fn new() -> Self {
        Self {
            mutexes: [KernelMutex::new(); MAX_MUTEXES],
            semaphores: [Semaphore::new(0); MAX_SEMAPHORES],
        }
    }

    /// Resets mutex `raw` to unlocked.
    pub fn init_mutex(&mut self, raw: u32) -> Result<MutexId, SyncError> {
        let id = MutexId::new(raw).ok_or(SyncError::InvalidId)?;
        self.mutexes[id.as_index()] = KernelMutex::new();
        Ok(id)
    }

    /// Resets semaphore `raw` to `count` permits.
    pub fn init_semaphore(&mut self, raw: u32, count: u32) -> Result<SemaphoreId, SyncError> {
        let id = SemaphoreId::new(raw).ok_or(SyncError::InvalidId)?;
        self.semaphores[id.as_index()] = Semaphore::new(count);
        Ok(id)
    }

    #[inline]
    pub fn mutex(&self, id: MutexId) -> &KernelMutex {
        &self.mutexes[id.as_index()]
    }

    #[inline]
    pub fn mutex_mut(&mut self, id: MutexId) -> &mut KernelMutex {
        &mut self.mutexes[id.as_index()]
    }

    #[inline]
    pub fn semaphore(&self, id: SemaphoreId) -> &Semaphore {
        &self.semaphores[id.as_index()]
    }

    #[inline]
    pub fn semaphore_mut(&mut self, id: SemaphoreId) -> &mut Semaphore {
        &mut self.semaphores[id.as_index()]
    }

    pub fn mutexes(&self) -> impl Iterator<Item = &KernelMutex> + '_ {
        self.mutexes.iter()
    }

    pub fn semaphores(&self) -> impl Iterator<Item = &Semaphore> + '_ {
        self.semaphores.iter()
    }
}

/// Priority an owner should run at: its static priority, raised to the best waiter's.
pub fn inheritance_target(owner_static: Priority, waiters: impl Iterator<Item = Priority>) -> Priority {
    waiters.fold(owner_static, Priority::min)
}
