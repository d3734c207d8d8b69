// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Board geometry constants and runtime kernel configuration
//! OWNERS: @kernel-team
//! PUBLIC API: KernelConfig, QueueOverflow, arena/MPU/clock constants
//! DEPENDS_ON: cinder_abi limits
//! INVARIANTS: Arena lies inside the four MPU-managed SRAM regions; queue capacity <= MAX_WAITERS

pub use cinder_abi::{MAX_MUTEXES, MAX_SEMAPHORES, MAX_TASKS, MAX_WAITERS, NUM_PRIORITIES};

/// CPU clock of the reference board.
pub const CPU_HZ: u32 = 40_000_000;
/// Periodic tick rate.
pub const TICK_HZ: u32 = 1_000;

/// Base of SRAM; MPU regions 2..=5 cover 8 KiB each from here.
pub const SRAM_BASE: u32 = 0x2000_0000;
/// Protection granule (one MPU sub-region).
pub const SUBREGION_BYTES: u32 = 1024;
/// Sub-regions per MPU region.
pub const SUBREGIONS_PER_REGION: usize = 8;
/// MPU regions whose sub-region disables are managed per task.
pub const MANAGED_REGIONS: usize = 4;
/// First MPU region number managed per task; 0 (flash) and 1 (peripherals) are static.
pub const FIRST_MANAGED_REGION: u8 = 2;
/// Total sub-regions under per-task control.
pub const MANAGED_SUBREGIONS: usize = MANAGED_REGIONS * SUBREGIONS_PER_REGION;

/// Heap arena start; the first 4 KiB of SRAM hold kernel data and the main stack.
pub const HEAP_BASE: u32 = 0x2000_1000;
/// Allocation granule.
pub const BLOCK_BYTES: u32 = 1024;
/// Blocks in the arena.
pub const HEAP_BLOCKS: usize = 28;
/// One past the last arena byte.
pub const HEAP_END: u32 = HEAP_BASE + BLOCK_BYTES * HEAP_BLOCKS as u32;

static_assertions::const_assert!(HEAP_BASE >= SRAM_BASE);
static_assertions::const_assert!(BLOCK_BYTES == SUBREGION_BYTES);
static_assertions::const_assert!(
    (HEAP_END - SRAM_BASE) as usize <= MANAGED_SUBREGIONS * SUBREGION_BYTES as usize
);
static_assertions::const_assert!(MANAGED_SUBREGIONS <= 64);

/// What a blocking call does when its wait queue is at capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueOverflow {
    /// Fail the call (returns 0) and leave the caller running.
    Reject,
    /// Admit the waiter as long as the table-wide bound `MAX_WAITERS` allows.
    Extend,
}

/// Runtime kernel configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelConfig {
    /// Wait-queue capacity of every mutex and semaphore.
    pub wait_queue_capacity: usize,
    /// Overflow policy for full wait queues.
    pub queue_overflow: QueueOverflow,
    /// Ticks per ping/pong accounting window.
    pub accounting_window_ticks: u32,
    /// Start in priority scheduling mode.
    pub priority_scheduling: bool,
    /// Start with priority inheritance enabled.
    pub priority_inheritance: bool,
    /// Start with tick preemption enabled.
    pub preemption: bool,
}

impl KernelConfig {
    /// Reference board defaults.
    pub const fn new() -> Self {
        Self {
            wait_queue_capacity: 2,
            queue_overflow: QueueOverflow::Reject,
            accounting_window_ticks: 500,
            priority_scheduling: true,
            priority_inheritance: false,
            preemption: true,
        }
    }

    /// Overrides the wait-queue capacity, clamped to `1..=MAX_WAITERS`.
    pub const fn with_wait_queue_capacity(mut self, capacity: usize) -> Self {
        self.wait_queue_capacity = clamp_capacity(capacity);
        self
    }

    /// Overrides the overflow policy.
    pub const fn with_queue_overflow(mut self, policy: QueueOverflow) -> Self {
        self.queue_overflow = policy;
        self
    }

    /// Overrides the initial policy flags.
    pub const fn with_policy(mut self, priority: bool, inheritance: bool, preemption: bool) -> Self {
        self.priority_scheduling = priority;
        self.priority_inheritance = inheritance;
        self.preemption = preemption;
        self
    }

    /// Effective number of waiters a queue admits under this configuration.
    pub const fn queue_limit(&self) -> usize {
        match self.queue_overflow {
            QueueOverflow::Reject => clamp_capacity(self.wait_queue_capacity),
            QueueOverflow::Extend => MAX_WAITERS,
        }
    }
}

const fn clamp_capacity(capacity: usize) -> usize {
    if capacity == 0 {
        1
    } else if capacity > MAX_WAITERS {
        MAX_WAITERS
    } else {
        capacity
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}
