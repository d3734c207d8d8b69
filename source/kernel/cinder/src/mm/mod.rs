// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Memory management: heap arena allocator and MPU protection windows
//! OWNERS: @kernel-mm-team
//! PUBLIC API: heap::HeapMap, protect::{SrdMask, ProtectionManager}
//! DEPENDS_ON: config, hal::Mpu
//! INVARIANTS: Heap blocks and protection sub-regions share one 1 KiB granule
//! ADR: docs/adr/0004-mpu-subregion-windows.md

pub mod heap;
pub mod protect;

#[cfg(test)]
mod tests_prop;

pub use heap::{AllocError, FreeError, HeapMap, Owner, Run};
pub use protect::{ProtectionManager, SrdMask};
