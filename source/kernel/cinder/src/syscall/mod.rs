// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall dispatcher and error handling
//! OWNERS: @kernel-team
//! PUBLIC API: SyscallTable, Args, Error, Handler, UserMemory, SysResult, encode()
//! DEPENDS_ON: sync, mm::heap, task, syscall::api
//! INVARIANTS: Selectors follow cinder_abi::SyscallNumber; decode/check/execute discipline;
//!             any error reaches the caller as 0 in r0
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

pub mod api;

#[cfg(test)]
mod tests_prop;

use core::fmt;

use crate::hal::Board;
use crate::mm::heap::AllocError;
use crate::sync::SyncError;
use crate::task::CreateError;
use cinder_abi::{IpcsInfo, Name, PsInfo, SyscallNumber};

pub use api::Context;

/// Number of selectors the gate accepts (`svc #0` ..= `svc #17`).
const MAX_SYSCALL: usize = 18;

/// Result type used by syscall handlers.
pub type SysResult<T> = Result<T, Error>;

/// Syscall arguments passed in r0/r1.
#[derive(Default, Clone, Copy, Debug)]
pub struct Args {
    regs: [u32; 2],
}

impl Args {
    pub const fn new(r0: u32, r1: u32) -> Self {
        Self { regs: [r0, r1] }
    }

    /// Returns the raw register at `index`.
    pub fn get(&self, index: usize) -> u32 {
        self.regs[index]
    }
}

/// Error returned by the dispatcher and handler stack.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Selector not present in the dispatch table.
    InvalidSyscall,
    /// Mutex or semaphore operation failed.
    Sync(SyncError),
    /// Heap allocation failed.
    Alloc(AllocError),
    /// Task creation failed.
    Create(CreateError),
    /// No task matched the supplied name or id.
    NotFound,
    /// Priority outside `0..NUM_PRIORITIES`.
    InvalidPriority,
    /// Target already terminated.
    AlreadyKilled,
    /// Restart of a task that is still alive.
    NotKilled,
    /// Trap taken before the first task was launched.
    NoCurrentTask,
    /// User pointer or length rejected by the copy-in/copy-out layer.
    BadUserPointer,
}

impl From<SyncError> for Error {
    fn from(value: SyncError) -> Self {
        Self::Sync(value)
    }
}

impl From<AllocError> for Error {
    fn from(value: AllocError) -> Self {
        Self::Alloc(value)
    }
}

impl From<CreateError> for Error {
    fn from(value: CreateError) -> Self {
        Self::Create(value)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Maps a handler outcome onto the r0 result convention.
#[inline]
pub fn encode(result: SysResult<u32>) -> u32 {
    result.unwrap_or(0)
}

/// Access to the calling task's memory for arguments passed by pointer.
///
/// The target implementation dereferences raw user pointers; host tests supply buffers.
pub trait UserMemory {
    /// Copies a `(ptr, len)` name argument; names longer than the table field are truncated.
    fn read_name(&self, ptr: u32, len: u32) -> Option<Name>;
    /// Copies a process snapshot out to `ptr`.
    fn write_ps(&mut self, ptr: u32, info: &PsInfo) -> bool;
    /// Copies an IPC snapshot out to `ptr`.
    fn write_ipcs(&mut self, ptr: u32, info: &IpcsInfo) -> bool;
}

/// Type alias for a syscall handler.
pub type Handler<B> = fn(&mut Context<'_, B>, &Args) -> SysResult<u32>;

/// Dispatch table storing handlers by selector.
pub struct SyscallTable<B: Board> {
    handlers: [Option<Handler<B>>; MAX_SYSCALL],
}

impl<B: Board> Clone for SyscallTable<B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: Board> Copy for SyscallTable<B> {}

impl<B: Board> SyscallTable<B> {
    /// Creates an empty dispatch table.
    pub const fn new() -> Self {
        Self { handlers: [None; MAX_SYSCALL] }
    }

    /// Table with every selector of [`SyscallNumber`] bound to its handler.
    pub fn with_default_handlers() -> Self {
        let mut table = Self::new();
        api::install_handlers(&mut table);
        table
    }

    /// Registers a handler.
    pub fn register(&mut self, number: SyscallNumber, handler: Handler<B>) {
        let index = usize::from(number.as_raw());
        if index < MAX_SYSCALL {
            self.handlers[index] = Some(handler);
        }
    }

    /// Executes the handler referenced by `number`.
    pub fn dispatch(&self, number: u8, ctx: &mut Context<'_, B>, args: &Args) -> SysResult<u32> {
        self.handlers
            .get(usize::from(number))
            .and_then(|entry| *entry)
            .ok_or(Error::InvalidSyscall)
            .and_then(|handler| handler(ctx, args))
    }
}

impl<B: Board> Default for SyscallTable<B> {
    fn default() -> Self {
        Self::with_default_handlers()
    }
}
