// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Recording board used by host tests and simulations.

use super::{CycleCounter, Mpu, SystemControl};
use crate::mm::protect::RegionConfig;

const REGIONS: usize = 8;

/// Board double that records every hardware request.
#[derive(Debug, Default)]
pub struct SimBoard {
    /// Last SRD byte written per region number.
    pub srd: [u8; REGIONS],
    /// Total SRD field writes.
    pub srd_writes: usize,
    /// Regions programmed at boot.
    pub regions: [Option<RegionConfig>; REGIONS],
    /// Context switches requested.
    pub pending_switches: usize,
    /// Resets requested.
    pub resets: usize,
    /// Memory-fault clears requested.
    pub memory_fault_clears: usize,
    /// Value returned by every `lap`.
    pub cycles_per_lap: u32,
}

impl SimBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns and clears the pending-switch counter.
    pub fn take_switches(&mut self) -> usize {
        core::mem::take(&mut self.pending_switches)
    }
}

impl Mpu for SimBoard {
    fn set_subregion_disable(&mut self, region: u8, srd: u8) {
        self.srd[usize::from(region)] = srd;
        self.srd_writes += 1;
    }

    fn program_region(&mut self, region: &RegionConfig) {
        self.regions[usize::from(region.number)] = Some(*region);
        self.srd[usize::from(region.number)] = region.srd;
    }
}

impl CycleCounter for SimBoard {
    fn lap(&mut self) -> u32 {
        self.cycles_per_lap
    }
}

impl SystemControl for SimBoard {
    fn pend_switch(&mut self) {
        self.pending_switches += 1;
    }

    fn system_reset(&mut self) {
        self.resets += 1;
    }

    fn clear_memory_fault(&mut self) {
        self.memory_fault_clears += 1;
    }
}
