// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Panic handler emitting diagnostics over the raw console
//! OWNERS: @kernel-team
//! PUBLIC API: panic handler (no_std, target only)
//! DEPENDS_ON: trap::last_trap(), console::raw_writer()
//! INVARIANTS: No allocations; never takes the console lock; halts with interrupts masked
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

use core::{fmt::Write, panic::PanicInfo};

use crate::{console, trap};

/// Emits a panic message including source location and the last trap frame.
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    cortex_m::interrupt::disable();
    let mut w = console::raw_writer();

    let _ = w.write_str("\nPANIC: ");
    if let Some(location) = info.location() {
        let _ = write!(w, "{}:{}: ", location.file(), location.line());
    }
    let _ = writeln!(w, "{}", info.message());

    if let Some(frame) = trap::last_trap() {
        let _ = w.write_str("PANIC: last trap:\n");
        let _ = trap::fmt_frame(&frame, &mut w);
    }
    #[cfg(feature = "trap_ring")]
    {
        let _ = w.write_str("PANIC: recent traps (oldest first):\n");
        trap::for_each_recent(|frame| {
            let _ = writeln!(w, "  pc {:#010x} r0 {:#010x}", frame.pc, frame.r0);
        });
    }

    loop {
        cortex_m::asm::wfi();
    }
}
