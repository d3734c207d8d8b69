// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Cortex-M4 trap glue: kernel singleton, PendSV/SVCall entry, SysTick and fault
//!          handlers, first-task launch
//! OWNERS: @kernel-arch-team
//! PUBLIC API: install(), configure(), launch(), with_kernel()
//! DEPENDS_ON: cortex-m (registers, SCB/SYST), cortex-m-rt (exception attribute, `rt` feature)
//! INVARIANTS: SysTick > SVCall > PendSV in urgency; every kernel access runs inside
//!             `interrupt::free` so each trap completes before another touches kernel state
//! ADR: docs/adr/0002-context-switch.md

use core::mem::align_of;

use cortex_m::interrupt;
use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};
use cortex_m::register::{self, control};
use spin::Mutex;

use crate::config::{CPU_HZ, SRAM_BASE, TICK_HZ};
use crate::hal::tm4c::Tm4cBoard;
use crate::kernel::{Kernel, Launch};
use crate::syscall::{Args, UserMemory};
use crate::trap::{self, ExceptionFrame, TrapFrame, TRAP_FRAME_WORDS};
use cinder_abi::{IpcsInfo, Name, PsInfo, NAME_LEN};

#[cfg(feature = "rt")]
core::arch::global_asm!(include_str!("switch.S"));

/// On-chip flash of the TM4C123GH6PM.
const FLASH_END: u32 = 0x0004_0000;
/// On-chip SRAM of the TM4C123GH6PM.
const SRAM_END: u32 = SRAM_BASE + 0x8000;

const PRIO_SYSTICK: u8 = 0x00;
const PRIO_SVCALL: u8 = 0x40;
const PRIO_PENDSV: u8 = 0xE0;

static KERNEL: Mutex<Option<Kernel<Tm4cBoard>>> = Mutex::new(None);

/// Hands the configured kernel to the exception handlers.
pub fn install(kernel: Kernel<Tm4cBoard>) {
    interrupt::free(|_| *KERNEL.lock() = Some(kernel));
}

/// Runs `f` on the installed kernel with interrupts masked.
pub fn with_kernel<R>(f: impl FnOnce(&mut Kernel<Tm4cBoard>) -> R) -> Option<R> {
    interrupt::free(|_| KERNEL.lock().as_mut().map(f))
}

/// Like [`with_kernel`], but returns `None` instead of spinning when the lock is held.
///
/// Fault entry uses this: a fault raised while a trap owns the kernel must still dump and halt.
fn try_with_kernel<R>(f: impl FnOnce(&mut Kernel<Tm4cBoard>) -> R) -> Option<R> {
    interrupt::free(|_| KERNEL.try_lock().and_then(|mut guard| guard.as_mut().map(f)))
}

/// Sets exception priorities and starts the 1 kHz SysTick.
///
/// # Safety
/// Boot-time only, before [`launch`].
pub unsafe fn configure(scb: &mut SCB, syst: &mut SYST) {
    // SAFETY: priorities are changed before any of these exceptions can be taken.
    unsafe {
        scb.set_priority(SystemHandler::SysTick, PRIO_SYSTICK);
        scb.set_priority(SystemHandler::SVCall, PRIO_SVCALL);
        scb.set_priority(SystemHandler::PendSV, PRIO_PENDSV);
    }
    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(CPU_HZ / TICK_HZ - 1);
    syst.clear_current();
    syst.enable_interrupt();
    syst.enable_counter();
}

/// Switches thread mode to the process stack, drops privilege and enters the first task.
///
/// # Safety
/// `launch` must come from [`Kernel::start`] of the installed kernel.
pub unsafe fn launch(launch: Launch) -> ! {
    // SAFETY: the stack top belongs to the first task; CONTROL is written from thread mode on
    // MSP and followed by an ISB as the architecture requires.
    unsafe {
        register::psp::write(launch.sp);
        let mut ctrl = control::read();
        ctrl.set_spsel(control::Spsel::Psp);
        ctrl.set_npriv(control::Npriv::Unprivileged);
        control::write(ctrl);
        cortex_m::asm::isb();
        let entry: extern "C" fn() -> ! = core::mem::transmute(launch.entry as usize);
        entry()
    }
}

/// Called by the PendSV glue with the outgoing stack pointer; returns the incoming one.
#[no_mangle]
extern "C" fn cinder_switch_context(outgoing_sp: u32) -> u32 {
    with_kernel(|kernel| {
        let plan = kernel.switch_context(outgoing_sp);
        if let Some(frame) = plan.initial_frame {
            write_frame(plan.sp, &frame);
        }
        plan.sp
    })
    .unwrap_or(outgoing_sp)
}

fn write_frame(sp: u32, frame: &TrapFrame) {
    let words: [u32; TRAP_FRAME_WORDS] = frame.to_words();
    // SAFETY: `sp` lies inside the incoming task's stack run with room for a full frame;
    // privileged code reaches it through the background map.
    unsafe { core::ptr::write(sp as *mut [u32; TRAP_FRAME_WORDS], words) };
}

/// Called by the SVCall glue with the stacked frame of the caller.
///
/// # Safety
/// `frame` must point at the hardware-stacked frame on the process stack.
#[no_mangle]
unsafe extern "C" fn cinder_svcall(frame: *mut ExceptionFrame) {
    // SAFETY: guaranteed by the SVCall glue.
    let frame = unsafe { &mut *frame };
    // SAFETY: the stacked PC follows the 16-bit `svc` instruction in task code.
    let instr = unsafe { core::ptr::read((frame.pc - 2) as *const u16) };
    let Some(number) = trap::syscall_selector(instr) else {
        return;
    };
    trap::record(frame);
    let args = Args::new(frame.r0, frame.r1);
    if let Some(r0) = with_kernel(|kernel| kernel.syscall(number, &args, &mut RawUserMemory)) {
        frame.r0 = r0;
    }
}

/// Dereferences task pointers directly; reads may target flash, writes only SRAM.
struct RawUserMemory;

impl RawUserMemory {
    fn readable(ptr: u32, len: u32) -> bool {
        let Some(end) = ptr.checked_add(len) else { return false };
        (ptr != 0 && end <= FLASH_END) || (ptr >= SRAM_BASE && end <= SRAM_END)
    }

    fn writable<T>(ptr: u32) -> bool {
        let Some(end) = ptr.checked_add(core::mem::size_of::<T>() as u32) else { return false };
        ptr >= SRAM_BASE && end <= SRAM_END && ptr as usize % align_of::<T>() == 0
    }

    fn write<T: Copy>(ptr: u32, value: &T) -> bool {
        if !Self::writable::<T>(ptr) {
            return false;
        }
        // SAFETY: range and alignment checked above.
        unsafe { core::ptr::write(ptr as *mut T, *value) };
        true
    }
}

impl UserMemory for RawUserMemory {
    fn read_name(&self, ptr: u32, len: u32) -> Option<Name> {
        let len = len.min(NAME_LEN as u32 - 1);
        if !Self::readable(ptr, len) {
            return None;
        }
        // SAFETY: range checked above; bytes are only copied.
        let bytes = unsafe { core::slice::from_raw_parts(ptr as *const u8, len as usize) };
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        core::str::from_utf8(&bytes[..end]).ok().map(Name::new)
    }

    fn write_ps(&mut self, ptr: u32, info: &PsInfo) -> bool {
        Self::write(ptr, info)
    }

    fn write_ipcs(&mut self, ptr: u32, info: &IpcsInfo) -> bool {
        Self::write(ptr, info)
    }
}

#[cfg(feature = "rt")]
mod handlers {
    use cortex_m::peripheral::SCB;
    use cortex_m::register;
    use cortex_m_rt::exception;

    use super::{try_with_kernel, with_kernel};
    use crate::console::raw_writer;
    use crate::fault::{FaultAction, FaultKind, FaultReport};
    use crate::trap::ExceptionFrame;

    #[exception]
    fn SysTick() {
        with_kernel(|kernel| kernel.on_tick());
    }

    #[exception]
    fn MemoryManagement() {
        fault(FaultKind::MemManage);
    }

    #[exception]
    fn BusFault() {
        fault(FaultKind::Bus);
    }

    #[exception]
    fn UsageFault() {
        fault(FaultKind::Usage);
    }

    #[exception]
    unsafe fn HardFault(_ef: &cortex_m_rt::ExceptionFrame) -> ! {
        fault(FaultKind::Hard);
        halt()
    }

    fn fault(kind: FaultKind) {
        let psp = register::psp::read();
        // SAFETY: read-only access to the fault status registers.
        let (cfsr, hfsr, mmfar) = unsafe {
            let scb = &*SCB::PTR;
            (scb.cfsr.read(), scb.hfsr.read(), scb.mmfar.read())
        };
        // SAFETY: faults taken from thread mode stack their frame on the process stack.
        let frame = unsafe { core::ptr::read_volatile(psp as *const ExceptionFrame) };
        let report = FaultReport { kind, psp, msp: register::msp::read(), cfsr, hfsr, mmfar, frame };
        match try_with_kernel(|kernel| kernel.handle_fault(&report)) {
            Some(FaultAction::Resume) => {}
            Some(FaultAction::Halt) => halt(),
            None => {
                let _ = report.dump_detached(&mut raw_writer());
                halt()
            }
        }
    }

    fn halt() -> ! {
        loop {
            cortex_m::asm::wfi();
        }
    }
}
