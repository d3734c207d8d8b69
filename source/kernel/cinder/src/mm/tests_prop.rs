// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the heap arena allocator
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCOPE:
//!   - Live allocations never overlap
//!   - Freeing a run releases exactly its blocks
//!   - Non-base addresses are rejected
//!
//! TEST_SCENARIOS:
//!   - live_runs_are_disjoint(): random alloc/free sequences keep runs disjoint
//!   - free_releases_exactly_the_run(): block accounting after each free
//!   - interior_addresses_rejected(): any aligned interior address of a run fails to free

use super::heap::{FreeError, HeapMap, Owner};
use super::protect::SrdMask;
use crate::config::{BLOCK_BYTES, HEAP_BLOCKS};
use crate::types::{Slot, TaskId};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Alloc { slot: usize, size: u32 },
    FreeNth(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..4, 1u32..6000).prop_map(|(slot, size)| Op::Alloc { slot, size }),
        (0usize..16).prop_map(Op::FreeNth),
    ]
}

fn owner(slot: usize) -> Owner {
    Owner { slot: Slot::new(slot).unwrap(), id: TaskId::new(slot as u8, 1) }
}

proptest! {
    #[test]
    fn live_runs_are_disjoint(ops in proptest::collection::vec(arb_op(), 1..64)) {
        let mut heap = HeapMap::new();
        let mut bases: Vec<u32> = Vec::new();
        for op in ops {
            match op {
                Op::Alloc { slot, size } => {
                    if let Ok(base) = heap.allocate(owner(slot), size) {
                        bases.push(base);
                    }
                }
                Op::FreeNth(n) if !bases.is_empty() => {
                    let base = bases.remove(n % bases.len());
                    prop_assert!(heap.free(base).is_ok());
                }
                Op::FreeNth(_) => {}
            }
            let mut covered = [false; HEAP_BLOCKS];
            let mut used = 0;
            for run in heap.live_runs() {
                let first = ((run.base - crate::config::HEAP_BASE) / BLOCK_BYTES) as usize;
                for seen in &mut covered[first..first + run.blocks as usize] {
                    prop_assert!(!*seen);
                    *seen = true;
                }
                used += run.blocks as usize;
            }
            prop_assert_eq!(used, HEAP_BLOCKS - heap.free_blocks());
        }
    }

    #[test]
    fn free_releases_exactly_the_run(sizes in proptest::collection::vec(1u32..4000, 1..8), pick in 0usize..8) {
        let mut heap = HeapMap::new();
        let bases: Vec<u32> = sizes
            .iter()
            .enumerate()
            .filter_map(|(i, &s)| heap.allocate(owner(i % 4), s).ok())
            .collect();
        prop_assume!(!bases.is_empty());
        let target = bases[pick % bases.len()];
        let before = heap.free_blocks();
        let run = heap.free(target).unwrap();
        prop_assert_eq!(heap.free_blocks(), before + run.blocks as usize);
        for &other in bases.iter().filter(|&&b| b != target) {
            prop_assert!(heap.owner_of(other).is_some());
        }
    }

    #[test]
    fn interior_addresses_rejected(size in 1025u32..8000, offset_blocks in 1u32..8) {
        let mut heap = HeapMap::new();
        let base = heap.allocate(owner(0), size).unwrap();
        let blocks = size.div_ceil(BLOCK_BYTES);
        prop_assume!(offset_blocks < blocks);
        prop_assert_eq!(heap.free(base + offset_blocks * BLOCK_BYTES), Err(FreeError::NotRunBase));
        prop_assert!(heap.free(base).is_ok());
    }

    #[test]
    fn window_then_revoke_restores_deny_all(size in 1u32..28_672) {
        let base = crate::config::HEAP_BASE;
        let mask = SrdMask::DENY_ALL.with_window(base, size);
        prop_assert!(mask.allows(base));
        prop_assert_eq!(mask.without_window(base, size), SrdMask::DENY_ALL);
    }
}
