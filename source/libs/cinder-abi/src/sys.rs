// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Unprivileged syscall wrappers (one `svc #imm` per operation)
//! OWNERS: @kernel-team
//! PUBLIC API: yield_, sleep, lock, unlock, wait, post, set_* policy toggles, reboot,
//!             pid_of, ipcs, ps, kill*, run, restart, set_task_priority
//! DEPENDS_ON: SyscallNumber selectors; kernel writes the result into stacked r0
//! INVARIANTS: Kernel reports failure as 0; hosts always return `AbiError::Unsupported`

use crate::{IpcsInfo, PsInfo, TaskId};

/// Result type of the wrappers.
pub type SysResult<T> = core::result::Result<T, AbiError>;

/// Errors surfaced by the wrappers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbiError {
    /// The kernel refused the request (invalid id, full queue, out of memory).
    Rejected,
    /// No task matched the supplied name or id.
    NotFound,
    /// Not running on the target; the wrapper has no kernel to trap into.
    Unsupported,
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
macro_rules! trap {
    ($sel:ident, $a0:expr, $a1:expr) => {{
        const SEL: u8 = $crate::SyscallNumber::$sel.as_raw();
        let ret: u32;
        // SAFETY: the SVC gate reads r0/r1 from the stacked frame and writes r0 back.
        unsafe {
            core::arch::asm!(
                "svc #{n}",
                n = const SEL,
                inlateout("r0") ($a0 as u32) => ret,
                in("r1") ($a1 as u32),
                options(nostack),
            );
        }
        ret
    }};
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
macro_rules! trap {
    ($sel:ident, $a0:expr, $a1:expr) => {{
        let _ = ($a0, $a1);
        return Err(AbiError::Unsupported);
    }};
}

#[allow(dead_code)]
fn status(raw: u32, err: AbiError) -> SysResult<()> {
    if raw == 0 {
        Err(err)
    } else {
        Ok(())
    }
}

#[allow(dead_code)]
fn task_id(raw: u32) -> SysResult<TaskId> {
    TaskId::from_raw(raw).ok_or(AbiError::NotFound)
}

/// Gives up the CPU.
#[allow(unreachable_code)]
pub fn yield_() -> SysResult<()> {
    let _ = trap!(Yield, 0, 0);
    Ok(())
}

/// Sleeps for `ticks` system ticks (1 ms each).
#[allow(unreachable_code)]
pub fn sleep(ticks: u32) -> SysResult<()> {
    let _ = trap!(Sleep, ticks, 0);
    Ok(())
}

/// Locks mutex `id`, blocking while another task holds it.
#[allow(unreachable_code)]
pub fn lock(id: u8) -> SysResult<()> {
    status(trap!(Lock, id, 0), AbiError::Rejected)
}

/// Unlocks mutex `id`. Unlocking a mutex the caller does not own terminates the caller.
#[allow(unreachable_code)]
pub fn unlock(id: u8) -> SysResult<()> {
    status(trap!(Unlock, id, 0), AbiError::Rejected)
}

/// Waits on semaphore `id`.
#[allow(unreachable_code)]
pub fn wait(id: u8) -> SysResult<()> {
    status(trap!(Wait, id, 0), AbiError::Rejected)
}

/// Posts semaphore `id`.
#[allow(unreachable_code)]
pub fn post(id: u8) -> SysResult<()> {
    status(trap!(Post, id, 0), AbiError::Rejected)
}

/// Turns mutex priority inheritance on or off.
#[allow(unreachable_code)]
pub fn set_priority_inheritance(on: bool) -> SysResult<()> {
    let _ = trap!(PriorityInheritance, on, 0);
    Ok(())
}

/// Selects priority scheduling (`true`) or round-robin (`false`).
#[allow(unreachable_code)]
pub fn set_priority_scheduling(on: bool) -> SysResult<()> {
    let _ = trap!(Scheduler, on, 0);
    Ok(())
}

/// Turns tick preemption on or off.
#[allow(unreachable_code)]
pub fn set_preemption(on: bool) -> SysResult<()> {
    let _ = trap!(Preemption, on, 0);
    Ok(())
}

/// Resets the system. Returns only on hosts.
#[allow(unreachable_code)]
pub fn reboot() -> SysResult<()> {
    let _ = trap!(Reboot, 0, 0);
    Ok(())
}

/// Looks up a task id by name.
#[allow(unreachable_code)]
pub fn pid_of(name: &str) -> SysResult<TaskId> {
    task_id(trap!(PidOf, name.as_ptr(), name.len()))
}

/// Fills `out` with the mutex/semaphore snapshot.
#[allow(unreachable_code)]
pub fn ipcs(out: &mut IpcsInfo) -> SysResult<()> {
    status(trap!(Ipcs, out as *mut IpcsInfo, 0), AbiError::Rejected)
}

/// Fills `out` with the process table snapshot.
#[allow(unreachable_code)]
pub fn ps(out: &mut PsInfo) -> SysResult<()> {
    status(trap!(Ps, out as *mut PsInfo, 0), AbiError::Rejected)
}

/// Terminates the task called `name`.
#[allow(unreachable_code)]
pub fn kill_by_name(name: &str) -> SysResult<()> {
    status(trap!(KillByName, name.as_ptr(), name.len()), AbiError::NotFound)
}

/// Terminates task `id`.
#[allow(unreachable_code)]
pub fn kill(id: TaskId) -> SysResult<()> {
    status(trap!(KillById, id.as_raw(), 0), AbiError::NotFound)
}

/// Restarts the killed task called `name`, returning its new id.
#[allow(unreachable_code)]
pub fn run(name: &str) -> SysResult<TaskId> {
    task_id(trap!(RunByName, name.as_ptr(), name.len()))
}

/// Restarts killed task `id`, returning its new id.
#[allow(unreachable_code)]
pub fn restart(id: TaskId) -> SysResult<TaskId> {
    task_id(trap!(RestartById, id.as_raw(), 0))
}

/// Overwrites the current priority of task `id`.
#[allow(unreachable_code)]
pub fn set_task_priority(id: TaskId, priority: u8) -> SysResult<()> {
    status(trap!(SetPriority, id.as_raw(), priority), AbiError::NotFound)
}
