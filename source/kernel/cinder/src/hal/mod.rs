// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hardware abstraction layer traits.

pub mod sim;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod tm4c;

use crate::mm::protect::RegionConfig;

/// Memory protection unit.
pub trait Mpu {
    /// Replaces the sub-region disable byte of `region`.
    fn set_subregion_disable(&mut self, region: u8, srd: u8);
    /// Programs a complete region (boot only).
    fn program_region(&mut self, region: &RegionConfig);
}

/// Free-running counter used for CPU-time accounting.
pub trait CycleCounter {
    /// Returns the count since the previous lap and restarts the counter.
    fn lap(&mut self) -> u32;
}

/// System control block operations.
pub trait SystemControl {
    /// Pends the context-switch exception.
    fn pend_switch(&mut self);
    /// Requests a system reset.
    fn system_reset(&mut self);
    /// Clears latched memory-management fault state.
    fn clear_memory_fault(&mut self);
}

/// Everything the kernel core needs from the board.
pub trait Board: Mpu + CycleCounter + SystemControl {}

impl<T: Mpu + CycleCounter + SystemControl> Board for T {}
