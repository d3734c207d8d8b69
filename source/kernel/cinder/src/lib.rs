// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Cinder kernel library: preemptive priority RTOS core for the TM4C123 (Cortex-M4F)
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests + proptest per subsystem; scenario tests in tests/
//! PUBLIC API: Kernel, KernelConfig, Board traits, syscall dispatch, fault handling
//! DEPENDS_ON: cinder-abi, spin, bitflags, static_assertions; cortex-m(-rt) on target
//! INVARIANTS: Kernel state is reached only through the trap glue; hosts drive it via SimBoard
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

#[macro_use]
mod diag;
pub use diag::log;

pub mod arch;
pub mod config;
pub mod console;
pub mod fault;
pub mod hal;
pub mod kernel;
pub mod mm;
pub mod sched;
pub mod sync;
pub mod syscall;
pub mod task;
pub mod trap;
pub mod types;

#[cfg(all(not(test), target_arch = "arm", target_os = "none"))]
mod panic;

pub use config::{KernelConfig, QueueOverflow};
pub use fault::{FaultAction, FaultKind, FaultReport};
pub use kernel::{Kernel, Launch, PolicyFlags, StartError, SwitchPlan};
pub use sched::Policy;
pub use task::{CreateError, TaskState};
pub use types::{Name, Priority, TaskId};
