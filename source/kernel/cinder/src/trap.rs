// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Cortex-M trap frame layout, initial frame synthesis, SVC decoding, trap diagnostics
//! OWNERS: @kernel-team
//! PUBLIC API: TrapFrame, CalleeSaved, ExceptionFrame, synthesize_initial_frame(),
//!             decode_svc(), syscall_selector(), record(), last_trap(), fmt_frame()
//! DEPENDS_ON: console (raw writer for dumps)
//! INVARIANTS: TrapFrame matches the PendSV push order (r4-r11, EXC_RETURN) followed by the
//!             hardware-stacked frame; the synthesized frame is 17 words and has no FP block
//!             (EXC_RETURN bit 4 set); FP-active tasks carry s16-s31 between the two
//! ADR: docs/adr/0002-context-switch.md

use core::fmt::{self, Write};
use spin::Mutex;

/// Return to thread mode using the process stack, no FP state.
pub const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;
/// EXC_RETURN bit 4: set when the frame has no FP extension.
pub const EXC_RETURN_NO_FP: u32 = 1 << 4;
/// xPSR with only the Thumb bit set.
pub const XPSR_THUMB: u32 = 0x0100_0000;
/// Link register of a fresh task; returning from the entry function faults on this address.
pub const LR_POISON: u32 = 0x1111_1111;

/// Registers saved by the PendSV glue (`stmdb r0!, {r4-r11, lr}`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CalleeSaved {
    pub r4: u32,
    pub r5: u32,
    pub r6: u32,
    pub r7: u32,
    pub r8: u32,
    pub r9: u32,
    pub r10: u32,
    pub r11: u32,
    pub exc_return: u32,
}

/// Frame stacked by hardware on exception entry.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExceptionFrame {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

/// Full saved context of a switched-out task, lowest address first.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub sw: CalleeSaved,
    pub hw: ExceptionFrame,
}

/// Words occupied by a [`TrapFrame`] on a task stack.
pub const TRAP_FRAME_WORDS: usize = core::mem::size_of::<TrapFrame>() / 4;

static_assertions::const_assert_eq!(core::mem::size_of::<TrapFrame>(), 17 * 4);
static_assertions::const_assert_eq!(core::mem::size_of::<ExceptionFrame>(), 8 * 4);

impl TrapFrame {
    /// Frame contents as stack words, lowest address first.
    pub fn to_words(&self) -> [u32; TRAP_FRAME_WORDS] {
        let s = &self.sw;
        let h = &self.hw;
        [
            s.r4, s.r5, s.r6, s.r7, s.r8, s.r9, s.r10, s.r11, s.exc_return, h.r0, h.r1, h.r2,
            h.r3, h.r12, h.lr, h.pc, h.xpsr,
        ]
    }
}

/// Builds the context a never-run task resumes from.
///
/// General-purpose slots carry sentinels (r0-r3 = 100..103, r4-r11 = 111 down to 104,
/// r12 = 112) so they are recognizable in dumps; they carry no meaning. The Thumb bit of
/// `entry` is dropped from the stacked PC; xPSR.T carries it instead.
pub const fn synthesize_initial_frame(entry: u32) -> TrapFrame {
    TrapFrame {
        sw: CalleeSaved {
            r4: 111,
            r5: 110,
            r6: 109,
            r7: 108,
            r8: 107,
            r9: 106,
            r10: 105,
            r11: 104,
            exc_return: EXC_RETURN_THREAD_PSP,
        },
        hw: ExceptionFrame {
            r0: 100,
            r1: 101,
            r2: 102,
            r3: 103,
            r12: 112,
            lr: LR_POISON,
            pc: entry & !1,
            xpsr: XPSR_THUMB,
        },
    }
}

/// Decodes the immediate of a Thumb `svc #imm8` halfword.
pub const fn decode_svc(instr: u16) -> Option<u8> {
    if instr & 0xff00 == 0xdf00 {
        Some(instr as u8)
    } else {
        None
    }
}

/// Selector of a `svc` the kernel serves; anything else is left alone by the trap glue,
/// including the caller's r0.
pub const fn syscall_selector(instr: u16) -> Option<u8> {
    match decode_svc(instr) {
        Some(imm) if cinder_abi::SyscallNumber::from_raw(imm).is_some() => Some(imm),
        _ => None,
    }
}

static LAST_TRAP: Mutex<Option<ExceptionFrame>> = Mutex::new(None);

#[cfg(feature = "trap_ring")]
const TRAP_RING_LEN: usize = 8;
#[cfg(feature = "trap_ring")]
static TRAP_RING: Mutex<([Option<ExceptionFrame>; TRAP_RING_LEN], usize)> =
    Mutex::new(([None; TRAP_RING_LEN], 0));

/// Records a trap for post-mortem diagnostics.
pub fn record(frame: &ExceptionFrame) {
    *LAST_TRAP.lock() = Some(*frame);
    #[cfg(feature = "trap_ring")]
    {
        let mut ring = TRAP_RING.lock();
        let idx = ring.1;
        ring.0[idx] = Some(*frame);
        ring.1 = (idx + 1) % TRAP_RING_LEN;
    }
}

/// Returns the most recently recorded trap, if any.
pub fn last_trap() -> Option<ExceptionFrame> {
    // try_lock: callable from the panic path while a recorder holds the lock
    LAST_TRAP.try_lock().and_then(|guard| *guard)
}

/// Visits recorded traps oldest first.
#[cfg(feature = "trap_ring")]
pub fn for_each_recent(mut f: impl FnMut(&ExceptionFrame)) {
    if let Some(ring) = TRAP_RING.try_lock() {
        let (frames, next) = &*ring;
        for i in 0..TRAP_RING_LEN {
            if let Some(frame) = &frames[(next + i) % TRAP_RING_LEN] {
                f(frame);
            }
        }
    }
}

/// Writes a stacked frame as one labelled register per line.
pub fn fmt_frame<W: Write>(frame: &ExceptionFrame, w: &mut W) -> fmt::Result {
    writeln!(w, "  r0  {:#010x}  r1  {:#010x}", frame.r0, frame.r1)?;
    writeln!(w, "  r2  {:#010x}  r3  {:#010x}", frame.r2, frame.r3)?;
    writeln!(w, "  r12 {:#010x}  lr  {:#010x}", frame.r12, frame.lr)?;
    writeln!(w, "  pc  {:#010x}  psr {:#010x}", frame.pc, frame.xpsr)
}
