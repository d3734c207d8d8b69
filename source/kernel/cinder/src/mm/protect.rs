// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-task MPU sub-region windows and the static region layout
//! OWNERS: @kernel-mm-team
//! PUBLIC API: SrdMask, RegionAttr, RegionConfig, static_regions(), ProtectionManager
//! DEPENDS_ON: hal::Mpu, mm::heap::HeapMap (shared mask recompute)
//! INVARIANTS: Bit i covers [SRAM_BASE + i KiB, +1 KiB); 1 = denied; only regions 2..=5 are
//!             reprogrammed at switch time
//! NOTE: The shared mask is diagnostic state; no kernel decision reads it.
//!       Task masks alone decide what reaches the MPU.
//! ADR: docs/adr/0004-mpu-subregion-windows.md

use bitflags::bitflags;

use crate::config::{
    FIRST_MANAGED_REGION, MANAGED_REGIONS, MANAGED_SUBREGIONS, SRAM_BASE, SUBREGIONS_PER_REGION,
    SUBREGION_BYTES,
};
use crate::hal::Mpu;
use crate::mm::heap::HeapMap;

/// Sub-region disable mask over the managed SRAM window.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct SrdMask(u64);

impl SrdMask {
    /// Every sub-region denied.
    pub const DENY_ALL: Self = Self(u64::MAX);

    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Sub-region index covering `addr`, or `None` outside the managed window.
    #[inline]
    pub const fn subregion_of(addr: u32) -> Option<usize> {
        if addr < SRAM_BASE {
            return None;
        }
        let index = ((addr - SRAM_BASE) / SUBREGION_BYTES) as usize;
        if index < MANAGED_SUBREGIONS {
            Some(index)
        } else {
            None
        }
    }

    fn window_bits(base: u32, size: u32) -> u64 {
        let Some(first) = Self::subregion_of(base) else {
            return 0;
        };
        let count = size.div_ceil(SUBREGION_BYTES) as usize;
        let last = (first + count).min(MANAGED_SUBREGIONS);
        (first..last).fold(0, |acc, bit| acc | (1u64 << bit))
    }

    /// Grants the sub-regions spanned by `[base, base + size)`. Out-of-window bases are ignored.
    #[must_use]
    pub fn with_window(self, base: u32, size: u32) -> Self {
        Self(self.0 & !Self::window_bits(base, size))
    }

    /// Revokes the sub-regions spanned by `[base, base + size)`.
    #[must_use]
    pub fn without_window(self, base: u32, size: u32) -> Self {
        Self(self.0 | Self::window_bits(base, size))
    }

    /// Returns true when `addr` is accessible under this mask.
    pub fn allows(self, addr: u32) -> bool {
        match Self::subregion_of(addr) {
            Some(bit) => self.0 & (1u64 << bit) == 0,
            None => false,
        }
    }

    /// SRD byte for each managed region, lowest region first.
    pub fn fields(self) -> [u8; MANAGED_REGIONS] {
        let mut out = [0u8; MANAGED_REGIONS];
        for (i, field) in out.iter_mut().enumerate() {
            *field = (self.0 >> (i * SUBREGIONS_PER_REGION)) as u8;
        }
        out
    }
}

impl Default for SrdMask {
    fn default() -> Self {
        Self::DENY_ALL
    }
}

impl core::fmt::Debug for SrdMask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "SrdMask({:#010x})", self.0 as u32)
    }
}

bitflags! {
    /// MPU region attribute and size register bits (RASR).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RegionAttr: u32 {
        const ENABLE = 1 << 0;
        const BUFFERABLE = 1 << 16;
        const CACHEABLE = 1 << 17;
        const SHAREABLE = 1 << 18;
        /// AP = 0b011: full access from both privilege levels.
        const AP_FULL = 0b011 << 24;
        const XN = 1 << 28;
    }
}

impl RegionAttr {
    /// Encodes a region of `2^log2_bytes` bytes with sub-region disables `srd`.
    pub const fn rasr(self, log2_bytes: u32, srd: u8) -> u32 {
        self.bits() | ((log2_bytes - 1) << 1) | ((srd as u32) << 8)
    }
}

/// A fully described MPU region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionConfig {
    pub number: u8,
    pub base: u32,
    pub log2_bytes: u32,
    pub attr: RegionAttr,
    pub srd: u8,
}

impl RegionConfig {
    pub const fn rasr(&self) -> u32 {
        self.attr.rasr(self.log2_bytes, self.srd)
    }
}

const FLASH_BASE: u32 = 0x0000_0000;
const PERIPH_BASE: u32 = 0x4000_0000;

/// Boot-time layout: flash (0), peripherals (1), four 8 KiB SRAM regions (2..=5) starting
/// fully denied to unprivileged code.
pub fn static_regions() -> [RegionConfig; 2 + MANAGED_REGIONS] {
    let sram = RegionAttr::ENABLE
        .union(RegionAttr::AP_FULL)
        .union(RegionAttr::SHAREABLE)
        .union(RegionAttr::CACHEABLE)
        .union(RegionAttr::BUFFERABLE)
        .union(RegionAttr::XN);
    let mut regions = [RegionConfig { number: 0, base: 0, log2_bytes: 13, attr: sram, srd: 0xff };
        2 + MANAGED_REGIONS];
    regions[0] = RegionConfig {
        number: 0,
        base: FLASH_BASE,
        log2_bytes: 18,
        attr: RegionAttr::ENABLE.union(RegionAttr::AP_FULL).union(RegionAttr::CACHEABLE),
        srd: 0,
    };
    regions[1] = RegionConfig {
        number: 1,
        base: PERIPH_BASE,
        log2_bytes: 26,
        attr: RegionAttr::ENABLE
            .union(RegionAttr::AP_FULL)
            .union(RegionAttr::SHAREABLE)
            .union(RegionAttr::BUFFERABLE)
            .union(RegionAttr::XN),
        srd: 0,
    };
    for i in 0..MANAGED_REGIONS {
        regions[2 + i].number = FIRST_MANAGED_REGION + i as u8;
        regions[2 + i].base = SRAM_BASE + (i * SUBREGIONS_PER_REGION) as u32 * SUBREGION_BYTES;
    }
    regions
}

/// Tracks what is programmed into the managed regions and the union of live heap windows.
#[derive(Debug)]
pub struct ProtectionManager {
    programmed: Option<SrdMask>,
    shared: SrdMask,
}

impl ProtectionManager {
    pub const fn new() -> Self {
        Self { programmed: None, shared: SrdMask::DENY_ALL }
    }

    /// Mask currently loaded into the MPU, if any.
    pub fn programmed(&self) -> Option<SrdMask> {
        self.programmed
    }

    /// Deny-all mask with the windows of every live allocation cleared (diagnostic only).
    pub fn shared(&self) -> SrdMask {
        self.shared
    }

    /// Writes the four SRD fields when `mask` differs from the loaded one.
    pub fn apply<M: Mpu + ?Sized>(&mut self, mpu: &mut M, mask: SrdMask) {
        if self.programmed == Some(mask) {
            return;
        }
        for (i, field) in mask.fields().into_iter().enumerate() {
            mpu.set_subregion_disable(FIRST_MANAGED_REGION + i as u8, field);
        }
        self.programmed = Some(mask);
    }

    /// Rebuilds the shared mask from the blocks still allocated in `heap`.
    pub fn recompute_shared(&mut self, heap: &HeapMap) {
        self.shared = heap
            .live_runs()
            .fold(SrdMask::DENY_ALL, |mask, run| mask.with_window(run.base, run.blocks * SUBREGION_BYTES));
    }
}

impl Default for ProtectionManager {
    fn default() -> Self {
        Self::new()
    }
}
