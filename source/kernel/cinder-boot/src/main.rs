// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Firmware image for the EK-TM4C123GXL: brings up the clock and console, programs the static
//! MPU layout, creates the boot tasks and hands the CPU to the first one via `cinder`.
#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_std)]
#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_main)]

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod bringup;

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod firmware {
    use cinder::arch::cortex_m as arch;
    use cinder::hal::tm4c::Tm4cBoard;
    use cinder::hal::Mpu;
    use cinder::mm::protect::static_regions;
    use cinder::{log_info, Kernel, KernelConfig};
    use cinder_abi::{sys, FLASH_REQ, KEY_PRESSED, KEY_RELEASED, RESOURCE};
    use cortex_m_rt::entry;

    const IDLE_STACK: u32 = 512;
    const WORKER_STACK: u32 = 1024;

    extern "C" fn idle() -> ! {
        loop {
            cortex_m::asm::wfi();
        }
    }

    /// Holds the shared resource for a few ticks every 100 ms.
    extern "C" fn worker() -> ! {
        loop {
            if sys::lock(RESOURCE).is_ok() {
                let _ = sys::sleep(5);
                let _ = sys::unlock(RESOURCE);
            }
            let _ = sys::post(FLASH_REQ);
            let _ = sys::sleep(100);
        }
    }

    /// Drains one flash request per worker round.
    extern "C" fn flasher() -> ! {
        loop {
            let _ = sys::wait(FLASH_REQ);
            let _ = sys::yield_();
        }
    }

    #[entry]
    fn main() -> ! {
        cortex_m::interrupt::disable();
        let Some(mut cp) = cortex_m::Peripherals::take() else {
            panic!("BOOT: core peripherals already taken");
        };
        // SAFETY: single-threaded boot with interrupts masked.
        unsafe { crate::bringup::init() };

        // SAFETY: called once, before the scheduler starts, with interrupts masked.
        let mut board = unsafe { Tm4cBoard::init() };
        for region in static_regions().iter() {
            board.program_region(region);
        }
        board.enable_mpu();

        let mut kernel = Kernel::new(board, KernelConfig::default());
        if kernel.init_mutex(u32::from(RESOURCE)).is_err() {
            panic!("BOOT: mutex init");
        }
        for (id, count) in [(KEY_PRESSED, 0), (KEY_RELEASED, 1), (FLASH_REQ, 0)] {
            if kernel.init_semaphore(u32::from(id), count).is_err() {
                panic!("BOOT: semaphore {} init", id);
            }
        }
        let tasks: [(cinder::task::TaskEntry, &str, u8, u32); 3] = [
            (worker, "worker", 2, WORKER_STACK),
            (flasher, "flash", 4, WORKER_STACK),
            (idle, "idle", 7, IDLE_STACK),
        ];
        for (entry, name, prio, stack) in tasks {
            if let Err(err) = kernel.create_thread(entry, name, prio, stack) {
                panic!("BOOT: create {}: {:?}", name, err);
            }
        }

        let launch = match kernel.start() {
            Ok(launch) => launch,
            Err(err) => panic!("BOOT: start: {:?}", err),
        };
        log_info!(target: "boot", "launching {} at {:#010x}", launch.id, launch.sp);
        arch::install(kernel);
        // SAFETY: boot-time configuration, then the first task enters with the kernel installed.
        unsafe {
            arch::configure(&mut cp.SCB, &mut cp.SYST);
            cortex_m::interrupt::enable();
            arch::launch(launch)
        }
    }
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
fn main() {
    println!("cinder-boot: firmware image; build with --target thumbv7em-none-eabihf");
}
