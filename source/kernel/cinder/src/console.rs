// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Kernel console: polled UART0 on the board, an in-memory capture buffer on hosts.

use core::fmt::{self, Write};
use spin::Mutex;

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod backend {
    /// UART0 on the TM4C123GH6PM.
    const UART0_BASE: usize = 0x4000_C000;
    const UART_DR: usize = 0x000;
    const UART_FR: usize = 0x018;
    const FR_TXFF: u32 = 1 << 5;

    #[inline]
    pub fn put(byte: u8) {
        // SAFETY: UART0 registers are always mapped; the peripheral region is static in the MPU.
        unsafe {
            while core::ptr::read_volatile((UART0_BASE + UART_FR) as *const u32) & FR_TXFF != 0 {}
            core::ptr::write_volatile((UART0_BASE + UART_DR) as *mut u32, u32::from(byte));
        }
    }
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
mod backend {
    use spin::Mutex;

    const CAPTURE_LEN: usize = 64 * 1024;

    pub struct Capture {
        buf: [u8; CAPTURE_LEN],
        len: usize,
    }

    pub static CAPTURE: Mutex<Capture> = Mutex::new(Capture { buf: [0; CAPTURE_LEN], len: 0 });

    impl Capture {
        pub fn bytes(&self) -> &[u8] {
            &self.buf[..self.len]
        }

        pub fn clear(&mut self) {
            self.len = 0;
        }
    }

    #[inline]
    pub fn put(byte: u8) {
        let mut cap = CAPTURE.lock();
        if cap.len == CAPTURE_LEN {
            // keep the newest half
            cap.buf.copy_within(CAPTURE_LEN / 2.., 0);
            cap.len = CAPTURE_LEN / 2;
        }
        let len = cap.len;
        cap.buf[len] = byte;
        cap.len += 1;
    }
}

static CONSOLE: Mutex<Console> = Mutex::new(Console);

/// Serialized console writer.
pub struct Console;

impl Console {
    /// Returns a guard for the console singleton.
    pub fn lock() -> spin::MutexGuard<'static, Console> {
        CONSOLE.lock()
    }
}

impl Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        emit_bytes(s.as_bytes());
        Ok(())
    }
}

/// Lock-free writer for fault and panic paths where the console lock may be held.
pub struct RawConsole;

impl Write for RawConsole {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        // hosts: keep dump fragments out of the middle of a log line
        #[cfg(not(all(target_arch = "arm", target_os = "none")))]
        let _line = CONSOLE.lock();
        emit_bytes(s.as_bytes());
        Ok(())
    }
}

pub fn raw_writer() -> RawConsole {
    RawConsole
}

fn emit_bytes(bytes: &[u8]) {
    for &byte in bytes {
        #[cfg(all(target_arch = "arm", target_os = "none"))]
        if byte == b'\n' {
            backend::put(b'\r');
        }
        backend::put(byte);
    }
}

/// Copies the captured console output (hosts only).
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn with_captured<R>(f: impl FnOnce(&str) -> R) -> R {
    let cap = backend::CAPTURE.lock();
    f(core::str::from_utf8(cap.bytes()).unwrap_or(""))
}

/// Discards captured console output (hosts only).
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn clear_captured() {
    backend::CAPTURE.lock().clear();
}
