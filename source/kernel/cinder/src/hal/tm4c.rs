// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! HAL implementation targeting the TM4C123GH6PM (EK-TM4C123GXL).

use core::ptr::{read_volatile, write_volatile};

use cortex_m::peripheral::{MPU, SCB};

use super::{CycleCounter, Mpu, SystemControl};
use crate::mm::protect::RegionConfig;

const SYSCTL_RCGCWTIMER: usize = 0x400F_E65C;
const WTIMER0_BASE: usize = 0x4003_6000;
const GPTM_CFG: usize = 0x000;
const GPTM_TAMR: usize = 0x004;
const GPTM_CTL: usize = 0x00C;
const GPTM_TAV: usize = 0x050;
const TAMR_PERIODIC: u32 = 0x2;
const TAMR_COUNT_UP: u32 = 1 << 4;
const CTL_TAEN: u32 = 1 << 0;
const CFG_32BIT: u32 = 0x4;

const MPU_CTRL_ENABLE: u32 = 1 << 0;
const MPU_CTRL_PRIVDEFENA: u32 = 1 << 2;
const RASR_SRD_MASK: u32 = 0xff << 8;

const SHCSR_MEMFAULTACT: u32 = 1 << 0;
const SHCSR_MEMFAULTPENDED: u32 = 1 << 13;
const SHCSR_MEMFAULTENA: u32 = 1 << 16;
const SHCSR_BUSFAULTENA: u32 = 1 << 17;
const SHCSR_USGFAULTENA: u32 = 1 << 18;
/// MMFSR: IACCVIOL | DACCVIOL | MUNSTKERR | MSTKERR | MLSPERR | MMARVALID.
const CFSR_MMFSR_W1C: u32 = 0xBB;

#[inline]
fn reg(addr: usize) -> *mut u32 {
    addr as *mut u32
}

/// Board handle; zero-sized, registers are reached through fixed addresses.
pub struct Tm4cBoard {
    _private: (),
}

impl Tm4cBoard {
    /// Takes ownership of the board resources used by the kernel.
    ///
    /// # Safety
    /// Must be called once, before the scheduler starts, with interrupts masked.
    pub unsafe fn init() -> Self {
        // SAFETY: fixed TM4C register addresses; caller guarantees exclusive boot-time access.
        unsafe {
            let rcgc = read_volatile(reg(SYSCTL_RCGCWTIMER));
            write_volatile(reg(SYSCTL_RCGCWTIMER), rcgc | 1);
            write_volatile(reg(WTIMER0_BASE + GPTM_CTL), 0);
            write_volatile(reg(WTIMER0_BASE + GPTM_CFG), CFG_32BIT);
            write_volatile(reg(WTIMER0_BASE + GPTM_TAMR), TAMR_PERIODIC | TAMR_COUNT_UP);
            write_volatile(reg(WTIMER0_BASE + GPTM_TAV), 0);
            write_volatile(reg(WTIMER0_BASE + GPTM_CTL), CTL_TAEN);

            let scb = &*SCB::PTR;
            scb.shcsr.modify(|v| v | SHCSR_MEMFAULTENA | SHCSR_BUSFAULTENA | SHCSR_USGFAULTENA);
        }
        Self { _private: () }
    }

    /// Turns the MPU on with the privileged default map as background region.
    pub fn enable_mpu(&mut self) {
        // SAFETY: regions are programmed before this call; privileged code keeps the default map.
        unsafe { (*MPU::PTR).ctrl.write(MPU_CTRL_PRIVDEFENA | MPU_CTRL_ENABLE) };
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }
}

impl Mpu for Tm4cBoard {
    fn set_subregion_disable(&mut self, region: u8, srd: u8) {
        // SAFETY: RNR/RASR are only touched from exception context with the kernel lock held.
        unsafe {
            let mpu = &*MPU::PTR;
            mpu.rnr.write(u32::from(region));
            mpu.rasr.modify(|v| (v & !RASR_SRD_MASK) | (u32::from(srd) << 8));
        }
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }

    fn program_region(&mut self, region: &RegionConfig) {
        // SAFETY: boot-time programming of a complete region description.
        unsafe {
            let mpu = &*MPU::PTR;
            mpu.rnr.write(u32::from(region.number));
            mpu.rbar.write(region.base);
            mpu.rasr.write(region.rasr());
        }
    }
}

impl CycleCounter for Tm4cBoard {
    fn lap(&mut self) -> u32 {
        // SAFETY: WTIMER0 is owned by the kernel after init.
        unsafe {
            let elapsed = read_volatile(reg(WTIMER0_BASE + GPTM_TAV));
            write_volatile(reg(WTIMER0_BASE + GPTM_TAV), 0);
            elapsed
        }
    }
}

impl SystemControl for Tm4cBoard {
    fn pend_switch(&mut self) {
        SCB::set_pendsv();
    }

    fn system_reset(&mut self) {
        SCB::sys_reset();
    }

    fn clear_memory_fault(&mut self) {
        // SAFETY: write-one-to-clear status bits and the pend/active flags of MemManage.
        unsafe {
            let scb = &*SCB::PTR;
            scb.shcsr.modify(|v| v & !(SHCSR_MEMFAULTPENDED | SHCSR_MEMFAULTACT));
            scb.cfsr.write(CFSR_MMFSR_W1C);
        }
    }
}
