// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Block-granular first-fit allocator over the fixed SRAM arena
//! OWNERS: @kernel-mm-team
//! PUBLIC API: HeapMap (allocate/free/free_owned_by/live_runs), Owner, Run, AllocError, FreeError
//! DEPENDS_ON: config arena geometry, types::{Slot, TaskId}
//! INVARIANTS: A block belongs to at most one live run; only the run head records the run
//!             length; frees must name a run head
//! ADR: docs/adr/0004-mpu-subregion-windows.md

use core::fmt;

use crate::config::{BLOCK_BYTES, HEAP_BASE, HEAP_BLOCKS, HEAP_END};
use crate::types::{Slot, TaskId};

/// Task that owns an allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Owner {
    pub slot: Slot,
    pub id: TaskId,
}

/// A live allocation as seen from its head block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Run {
    pub base: u32,
    pub blocks: u32,
    pub requested: u32,
    pub owner: Owner,
}

#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocError {
    ZeroSize,
    TooLarge { requested: u32, capacity: u32 },
    NoSpace { blocks: usize },
}

#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FreeError {
    OutOfRange,
    Misaligned,
    NotAllocated,
    NotRunBase,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroSize => f.write_str("zero-sized request"),
            Self::TooLarge { requested, capacity } => {
                write!(f, "request of {requested} bytes exceeds arena of {capacity}")
            }
            Self::NoSpace { blocks } => write!(f, "no run of {blocks} free blocks"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Block {
    owner: Option<Owner>,
    requested: u32,
    run_base: u32,
    /// Non-zero only on the head block of a run.
    run_len: u8,
}

impl Block {
    const FREE: Self = Self { owner: None, requested: 0, run_base: 0, run_len: 0 };
}

/// Allocation map of the heap arena.
pub struct HeapMap {
    blocks: [Block; HEAP_BLOCKS],
}

impl HeapMap {
    pub const fn new() -> Self {
        Self { blocks: [Block::FREE; HEAP_BLOCKS] }
    }

    #[inline]
    const fn addr_of(index: usize) -> u32 {
        HEAP_BASE + index as u32 * BLOCK_BYTES
    }

    /// Reserves the first run of free blocks that fits `size` bytes and returns its base.
    pub fn allocate(&mut self, owner: Owner, size: u32) -> Result<u32, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let capacity = HEAP_END - HEAP_BASE;
        if size > capacity {
            return Err(AllocError::TooLarge { requested: size, capacity });
        }
        let needed = size.div_ceil(BLOCK_BYTES) as usize;

        let start = (0..=HEAP_BLOCKS - needed)
            .find(|&start| self.blocks[start..start + needed].iter().all(|b| b.owner.is_none()))
            .ok_or(AllocError::NoSpace { blocks: needed })?;

        let base = Self::addr_of(start);
        for block in &mut self.blocks[start..start + needed] {
            *block = Block { owner: Some(owner), requested: size, run_base: base, run_len: 0 };
        }
        self.blocks[start].run_len = needed as u8;
        Ok(base)
    }

    /// Releases the run whose head is at `addr`.
    pub fn free(&mut self, addr: u32) -> Result<Run, FreeError> {
        if !(HEAP_BASE..HEAP_END).contains(&addr) {
            return Err(FreeError::OutOfRange);
        }
        if (addr - HEAP_BASE) % BLOCK_BYTES != 0 {
            return Err(FreeError::Misaligned);
        }
        let index = ((addr - HEAP_BASE) / BLOCK_BYTES) as usize;
        let run = self.run_at_index(index)?;
        for block in &mut self.blocks[index..index + run.blocks as usize] {
            *block = Block::FREE;
        }
        Ok(run)
    }

    fn run_at_index(&self, index: usize) -> Result<Run, FreeError> {
        let head = &self.blocks[index];
        let owner = head.owner.ok_or(FreeError::NotAllocated)?;
        if head.run_len == 0 || head.run_base != Self::addr_of(index) {
            return Err(FreeError::NotRunBase);
        }
        Ok(Run { base: head.run_base, blocks: u32::from(head.run_len), requested: head.requested, owner })
    }

    /// Releases every block owned by `id`; returns the number of blocks released.
    pub fn free_owned_by(&mut self, id: TaskId) -> usize {
        let mut released = 0;
        for block in self.blocks.iter_mut().filter(|b| matches!(b.owner, Some(o) if o.id == id)) {
            *block = Block::FREE;
            released += 1;
        }
        released
    }

    /// Live runs in address order.
    pub fn live_runs(&self) -> impl Iterator<Item = Run> + '_ {
        (0..HEAP_BLOCKS).filter_map(move |i| self.run_at_index(i).ok())
    }

    /// Owner of the block containing `addr`.
    pub fn owner_of(&self, addr: u32) -> Option<Owner> {
        if !(HEAP_BASE..HEAP_END).contains(&addr) {
            return None;
        }
        self.blocks[((addr - HEAP_BASE) / BLOCK_BYTES) as usize].owner
    }

    pub fn free_blocks(&self) -> usize {
        self.blocks.iter().filter(|b| b.owner.is_none()).count()
    }
}

impl Default for HeapMap {
    fn default() -> Self {
        Self::new()
    }
}
