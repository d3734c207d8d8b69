// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Clock and console bring-up: PLL to 40 MHz from the 16 MHz crystal, UART0 at 115200 8N1.

use core::ptr::{read_volatile, write_volatile};

const SYSCTL_RIS: usize = 0x400F_E050;
const SYSCTL_RCC: usize = 0x400F_E060;
const SYSCTL_RCC2: usize = 0x400F_E070;
const SYSCTL_RCGCGPIO: usize = 0x400F_E608;
const SYSCTL_RCGCUART: usize = 0x400F_E618;

const RCC_XTAL_MASK: u32 = 0x1f << 6;
const RCC_XTAL_16MHZ: u32 = 0x15 << 6;
const RCC2_USERCC2: u32 = 1 << 31;
const RCC2_DIV400: u32 = 1 << 30;
const RCC2_SYSDIV2_MASK: u32 = 0x7f << 22;
const RCC2_PWRDN2: u32 = 1 << 13;
const RCC2_BYPASS2: u32 = 1 << 11;
const RCC2_OSCSRC2_MASK: u32 = 0x7 << 4;
const RIS_PLLLRIS: u32 = 1 << 6;
/// 400 MHz / (9 + 1).
const SYSDIV_40MHZ: u32 = 9 << 22;

const GPIOA_BASE: usize = 0x4000_4000;
const GPIO_AFSEL: usize = 0x420;
const GPIO_DEN: usize = 0x51C;
const GPIO_PCTL: usize = 0x52C;
const PA0_PA1: u32 = 0b11;

const UART0_BASE: usize = 0x4000_C000;
const UART_IBRD: usize = 0x024;
const UART_FBRD: usize = 0x028;
const UART_LCRH: usize = 0x02C;
const UART_CTL: usize = 0x030;
const UART_CC: usize = 0xFC8;
const LCRH_WLEN8_FEN: u32 = 0x70;
const CTL_UARTEN_TXE_RXE: u32 = 0x301;
// 40 MHz / (16 * 115200) = 21.7014
const IBRD_115200: u32 = 21;
const FBRD_115200: u32 = 45;

#[inline]
unsafe fn modify(addr: usize, f: impl FnOnce(u32) -> u32) {
    // SAFETY: caller passes a mapped system-control or peripheral register.
    unsafe { write_volatile(addr as *mut u32, f(read_volatile(addr as *const u32))) };
}

/// # Safety
/// Boot-time only, single-threaded, interrupts masked.
pub unsafe fn init() {
    // SAFETY: fixed TM4C123 register addresses; exclusive access guaranteed by the caller.
    unsafe {
        modify(SYSCTL_RCC2, |v| v | RCC2_USERCC2 | RCC2_BYPASS2);
        modify(SYSCTL_RCC, |v| (v & !RCC_XTAL_MASK) | RCC_XTAL_16MHZ);
        modify(SYSCTL_RCC2, |v| v & !(RCC2_OSCSRC2_MASK | RCC2_PWRDN2));
        modify(SYSCTL_RCC2, |v| (v & !RCC2_SYSDIV2_MASK) | RCC2_DIV400 | SYSDIV_40MHZ);
        while read_volatile(SYSCTL_RIS as *const u32) & RIS_PLLLRIS == 0 {}
        modify(SYSCTL_RCC2, |v| v & !RCC2_BYPASS2);

        modify(SYSCTL_RCGCUART, |v| v | 1);
        modify(SYSCTL_RCGCGPIO, |v| v | 1);
        // clock gating settles within a few cycles
        cortex_m::asm::delay(16);

        write_volatile((UART0_BASE + UART_CTL) as *mut u32, 0);
        write_volatile((UART0_BASE + UART_IBRD) as *mut u32, IBRD_115200);
        write_volatile((UART0_BASE + UART_FBRD) as *mut u32, FBRD_115200);
        write_volatile((UART0_BASE + UART_LCRH) as *mut u32, LCRH_WLEN8_FEN);
        write_volatile((UART0_BASE + UART_CC) as *mut u32, 0);
        write_volatile((UART0_BASE + UART_CTL) as *mut u32, CTL_UARTEN_TXE_RXE);

        modify(GPIOA_BASE + GPIO_AFSEL, |v| v | PA0_PA1);
        modify(GPIOA_BASE + GPIO_DEN, |v| v | PA0_PA1);
        modify(GPIOA_BASE + GPIO_PCTL, |v| (v & !0xff) | 0x11);
    }
}
