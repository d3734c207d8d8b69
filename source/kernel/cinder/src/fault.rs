// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Fault classification, register dumps and the kill-or-halt decision
//! OWNERS: @kernel-team
//! PUBLIC API: FaultKind, FaultReport, FaultAction, Kernel::handle_fault()
//! DEPENDS_ON: trap::ExceptionFrame, console raw writer, kernel::Kernel
//! INVARIANTS: Only memory-management faults are survivable; the faulting task is killed and
//!             latched MemManage status cleared before a switch is requested

use core::fmt::{self, Write};

use crate::console::raw_writer;
use crate::hal::Board;
use crate::kernel::Kernel;
use crate::trap::{fmt_frame, ExceptionFrame};

/// MMFSR.MMARVALID: MMFAR holds the faulting data address.
pub const MMFSR_MMARVALID: u8 = 1 << 7;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
    MemManage,
    Bus,
    Usage,
    Hard,
}

impl FaultKind {
    const fn label(self) -> &'static str {
        match self {
            FaultKind::MemManage => "MPU fault",
            FaultKind::Bus => "bus fault",
            FaultKind::Usage => "usage fault",
            FaultKind::Hard => "hard fault",
        }
    }
}

/// Registers captured by the fault entry glue.
#[derive(Clone, Copy, Debug)]
pub struct FaultReport {
    pub kind: FaultKind,
    pub psp: u32,
    pub msp: u32,
    pub cfsr: u32,
    pub hfsr: u32,
    pub mmfar: u32,
    /// Frame stacked on the process stack at fault entry.
    pub frame: ExceptionFrame,
}

impl FaultReport {
    /// MemManage status byte of CFSR.
    #[inline]
    pub const fn mmfsr(&self) -> u8 {
        self.cfsr as u8
    }

    /// Faulting data address, when the hardware latched one.
    pub const fn fault_address(&self) -> Option<u32> {
        if self.mmfsr() & MMFSR_MMARVALID != 0 {
            Some(self.mmfar)
        } else {
            None
        }
    }

    /// Dumps the registers when the kernel cannot be reached (its lock is held by the
    /// interrupted trap, or it was never installed).
    pub fn dump_detached<W: Write>(&self, w: &mut W) -> fmt::Result {
        self.dump("<kernel busy>", None, w)
    }

    fn dump<W: Write>(&self, task: &str, id: Option<cinder_abi::TaskId>, w: &mut W) -> fmt::Result {
        writeln!(w, "*** {} in {} ({:?}) ***", self.kind.label(), task, id)?;
        writeln!(w, "  psp {:#010x}  msp {:#010x}", self.psp, self.msp)?;
        match self.kind {
            FaultKind::MemManage => {
                writeln!(w, "  mmfsr {:#04x}  mmfar {:#010x}", self.mmfsr(), self.mmfar)?;
                writeln!(w, "  instruction at {:#010x}", self.frame.pc)?;
            }
            FaultKind::Hard => writeln!(w, "  hfsr {:#010x}  cfsr {:#010x}", self.hfsr, self.cfsr)?,
            FaultKind::Bus | FaultKind::Usage => writeln!(w, "  cfsr {:#010x}", self.cfsr)?,
        }
        fmt_frame(&self.frame, w)
    }
}

/// What the fault entry glue does after the kernel has handled a fault.
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultAction {
    /// Return from the exception; a switch away from the killed task is pending.
    Resume,
    /// Stop the system.
    Halt,
}

impl<B: Board> Kernel<B> {
    /// Dumps `report`; kills the current task on a memory-management fault, otherwise halts.
    pub fn handle_fault(&mut self, report: &FaultReport) -> FaultAction {
        let current = self.current_slot();
        let task = current.and_then(|slot| self.tasks.get(slot));
        let name = task.map(|t| t.name).unwrap_or_default();
        let id = task.map(|t| t.id);
        let _ = report.dump(name.as_str(), id, &mut raw_writer());

        match (report.kind, current) {
            (FaultKind::MemManage, Some(slot)) => {
                self.terminate(slot);
                self.board.clear_memory_fault();
                self.board.pend_switch();
                FaultAction::Resume
            }
            _ => FaultAction::Halt,
        }
    }
}
