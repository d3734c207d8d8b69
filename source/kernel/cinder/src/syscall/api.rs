// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall handlers exposed to the dispatcher
//! OWNERS: @kernel-team
//! PUBLIC API: install_handlers(table), Context, Kernel::syscall()
//! DEPENDS_ON: kernel::Kernel, sync::Ipc, sched::Policy, task::TaskTable
//! INVARIANTS: Decode→Check→Execute pattern; only blocking, waking and killing handlers
//!             request a switch; policy toggles never do
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

use super::{encode, Args, Error, SysResult, SyscallTable, UserMemory};
use crate::hal::Board;
use crate::kernel::Kernel;
use crate::sched::Policy;
use crate::sync::{LockOutcome, SyncError};
use crate::task::{BlockedOn, TaskState};
use crate::types::{MutexId, Name, Priority, SemaphoreId, Slot, TaskId};
use cinder_abi::{IpcsInfo, PsInfo, SyscallNumber};

// Typed decoders for Decode→Check→Execute

#[derive(Copy, Clone)]
struct MutexArgs {
    id: MutexId,
}

impl MutexArgs {
    #[inline]
    fn decode(args: &Args) -> Result<Self, Error> {
        let raw = args.get(0);
        match MutexId::new(raw) {
            Some(id) => Ok(Self { id }),
            None => {
                log_warn!(target: "sys", "mutex {} out of range", raw);
                Err(SyncError::InvalidId.into())
            }
        }
    }
}

#[derive(Copy, Clone)]
struct SemaphoreArgs {
    id: SemaphoreId,
}

impl SemaphoreArgs {
    #[inline]
    fn decode(args: &Args) -> Result<Self, Error> {
        let raw = args.get(0);
        match SemaphoreId::new(raw) {
            Some(id) => Ok(Self { id }),
            None => {
                log_warn!(target: "sys", "semaphore {} out of range", raw);
                Err(SyncError::InvalidId.into())
            }
        }
    }
}

#[derive(Copy, Clone)]
struct NameArgs {
    name: Name,
}

impl NameArgs {
    #[inline]
    fn decode(user: &dyn UserMemory, args: &Args) -> Result<Self, Error> {
        let name = user.read_name(args.get(0), args.get(1)).ok_or(Error::BadUserPointer)?;
        Ok(Self { name })
    }
}

#[derive(Copy, Clone)]
struct TaskArgs {
    id: TaskId,
}

impl TaskArgs {
    #[inline]
    fn decode(args: &Args) -> Result<Self, Error> {
        let id = TaskId::from_raw(args.get(0)).ok_or(Error::NotFound)?;
        Ok(Self { id })
    }
}

#[derive(Copy, Clone)]
struct PriorityArgs {
    id: TaskId,
    priority: Priority,
}

impl PriorityArgs {
    #[inline]
    fn decode(args: &Args) -> Result<Self, Error> {
        let TaskArgs { id } = TaskArgs::decode(args)?;
        let priority = u8::try_from(args.get(1))
            .ok()
            .and_then(Priority::new)
            .ok_or(Error::InvalidPriority)?;
        Ok(Self { id, priority })
    }
}

/// State a handler may touch: the kernel and the caller's memory.
pub struct Context<'a, B: Board> {
    pub kernel: &'a mut Kernel<B>,
    pub user: &'a mut dyn UserMemory,
}

impl<'a, B: Board> Context<'a, B> {
    pub fn new(kernel: &'a mut Kernel<B>, user: &'a mut dyn UserMemory) -> Self {
        Self { kernel, user }
    }

    fn current(&self) -> Result<Slot, Error> {
        self.kernel.current_slot().ok_or(Error::NoCurrentTask)
    }

    /// Parks the caller on `on` and asks for a switch.
    fn block(&mut self, slot: Slot, on: BlockedOn) {
        if let Some(task) = self.kernel.tasks.get_mut(slot) {
            task.state = match on {
                BlockedOn::Mutex(_) => TaskState::BlockedOnMutex,
                BlockedOn::Semaphore(_) => TaskState::BlockedOnSemaphore,
            };
            task.blocked_on = Some(on);
        }
        self.kernel.board.pend_switch();
    }
}

/// Registers the default set of syscall handlers.
pub fn install_handlers<B: Board>(table: &mut SyscallTable<B>) {
    table.register(SyscallNumber::Yield, sys_yield);
    table.register(SyscallNumber::Sleep, sys_sleep);
    table.register(SyscallNumber::Lock, sys_lock);
    table.register(SyscallNumber::Unlock, sys_unlock);
    table.register(SyscallNumber::Wait, sys_wait);
    table.register(SyscallNumber::Post, sys_post);
    table.register(SyscallNumber::PriorityInheritance, sys_priority_inheritance);
    table.register(SyscallNumber::Scheduler, sys_scheduler);
    table.register(SyscallNumber::Preemption, sys_preemption);
    table.register(SyscallNumber::Reboot, sys_reboot);
    table.register(SyscallNumber::PidOf, sys_pid_of);
    table.register(SyscallNumber::Ipcs, sys_ipcs);
    table.register(SyscallNumber::Ps, sys_ps);
    table.register(SyscallNumber::KillByName, sys_kill_by_name);
    table.register(SyscallNumber::KillById, sys_kill_by_id);
    table.register(SyscallNumber::RunByName, sys_run_by_name);
    table.register(SyscallNumber::RestartById, sys_restart_by_id);
    table.register(SyscallNumber::SetPriority, sys_set_priority);
}

impl<B: Board> Kernel<B> {
    /// Runs selector `number` for the current task and returns the value for r0.
    pub fn syscall(&mut self, number: u8, args: &Args, user: &mut dyn UserMemory) -> u32 {
        let table = self.syscalls;
        let mut ctx = Context::new(self, user);
        let result = table.dispatch(number, &mut ctx, args);
        if let Err(err) = result {
            log_debug!(target: "sys", "svc #{} -> {}", number, err);
        }
        encode(result)
    }
}

fn sys_yield<B: Board>(ctx: &mut Context<'_, B>, _args: &Args) -> SysResult<u32> {
    ctx.kernel.board.pend_switch();
    Ok(1)
}

fn sys_sleep<B: Board>(ctx: &mut Context<'_, B>, args: &Args) -> SysResult<u32> {
    let ticks = args.get(0);
    let slot = ctx.current()?;
    if ticks > 0 {
        if let Some(task) = ctx.kernel.tasks.get_mut(slot) {
            task.ticks = ticks;
            task.state = TaskState::Delayed;
        }
    }
    ctx.kernel.board.pend_switch();
    Ok(1)
}

fn sys_lock<B: Board>(ctx: &mut Context<'_, B>, args: &Args) -> SysResult<u32> {
    let MutexArgs { id } = MutexArgs::decode(args)?;
    let slot = ctx.current()?;
    let limit = ctx.kernel.config.queue_limit();
    match ctx.kernel.ipc.mutex_mut(id).lock(slot, limit) {
        Ok(LockOutcome::Acquired) => Ok(1),
        Ok(LockOutcome::Queued) => {
            ctx.block(slot, BlockedOn::Mutex(id));
            Ok(1)
        }
        Err(err) => {
            if let SyncError::QueueFull { capacity } = err {
                log_warn!(target: "sys", "mutex {} queue full ({}), lock rejected", id, capacity);
            }
            Err(err.into())
        }
    }
}

fn sys_unlock<B: Board>(ctx: &mut Context<'_, B>, args: &Args) -> SysResult<u32> {
    let MutexArgs { id } = MutexArgs::decode(args)?;
    let slot = ctx.current()?;
    match ctx.kernel.ipc.mutex_mut(id).unlock(slot) {
        Ok(next) => {
            ctx.kernel.clear_boost(slot);
            if let Some(next) = next {
                ctx.kernel.wake(next);
                ctx.kernel.board.pend_switch();
            }
            Ok(1)
        }
        Err(err) => {
            log_warn!(target: "sys", "unlock of mutex {} by non-owner slot {}, terminating", id, slot);
            ctx.kernel.terminate(slot);
            Err(err.into())
        }
    }
}

fn sys_wait<B: Board>(ctx: &mut Context<'_, B>, args: &Args) -> SysResult<u32> {
    let SemaphoreArgs { id } = SemaphoreArgs::decode(args)?;
    let slot = ctx.current()?;
    let limit = ctx.kernel.config.queue_limit();
    match ctx.kernel.ipc.semaphore_mut(id).wait(slot, limit) {
        Ok(LockOutcome::Acquired) => Ok(1),
        Ok(LockOutcome::Queued) => {
            ctx.block(slot, BlockedOn::Semaphore(id));
            Ok(1)
        }
        Err(err) => {
            log_warn!(target: "sys", "semaphore {} wait rejected: {:?}", id, err);
            Err(err.into())
        }
    }
}

fn sys_post<B: Board>(ctx: &mut Context<'_, B>, args: &Args) -> SysResult<u32> {
    let SemaphoreArgs { id } = SemaphoreArgs::decode(args)?;
    if let Some(next) = ctx.kernel.ipc.semaphore_mut(id).post() {
        ctx.kernel.wake(next);
        ctx.kernel.board.pend_switch();
    }
    Ok(1)
}

fn sys_priority_inheritance<B: Board>(ctx: &mut Context<'_, B>, args: &Args) -> SysResult<u32> {
    let on = args.get(0) != 0;
    ctx.kernel.flags.inheritance = on;
    log_info!(target: "sys", "priority inheritance {}", if on { "on" } else { "off" });
    Ok(1)
}

fn sys_scheduler<B: Board>(ctx: &mut Context<'_, B>, args: &Args) -> SysResult<u32> {
    let policy = if args.get(0) != 0 { Policy::Priority } else { Policy::RoundRobin };
    ctx.kernel.scheduler.set_policy(policy);
    log_info!(target: "sys", "scheduler {:?}", policy);
    Ok(1)
}

fn sys_preemption<B: Board>(ctx: &mut Context<'_, B>, args: &Args) -> SysResult<u32> {
    let on = args.get(0) != 0;
    ctx.kernel.flags.preemption = on;
    log_info!(target: "sys", "preemption {}", if on { "on" } else { "off" });
    Ok(1)
}

fn sys_reboot<B: Board>(ctx: &mut Context<'_, B>, _args: &Args) -> SysResult<u32> {
    log_warn!(target: "sys", "reboot requested");
    ctx.kernel.board.system_reset();
    Ok(1)
}

fn sys_pid_of<B: Board>(ctx: &mut Context<'_, B>, args: &Args) -> SysResult<u32> {
    let NameArgs { name } = NameArgs::decode(ctx.user, args)?;
    let slot = ctx.kernel.tasks.find_name(name.as_str()).ok_or(Error::NotFound)?;
    ctx.kernel.tasks.get(slot).map(|t| t.id.as_raw()).ok_or(Error::NotFound)
}

fn sys_ipcs<B: Board>(ctx: &mut Context<'_, B>, args: &Args) -> SysResult<u32> {
    let mut info = IpcsInfo::default();
    ctx.kernel.fill_ipcs(&mut info);
    if ctx.user.write_ipcs(args.get(0), &info) {
        Ok(1)
    } else {
        Err(Error::BadUserPointer)
    }
}

fn sys_ps<B: Board>(ctx: &mut Context<'_, B>, args: &Args) -> SysResult<u32> {
    let mut info = PsInfo::default();
    ctx.kernel.fill_ps(&mut info);
    if ctx.user.write_ps(args.get(0), &info) {
        Ok(1)
    } else {
        Err(Error::BadUserPointer)
    }
}

fn sys_kill_by_name<B: Board>(ctx: &mut Context<'_, B>, args: &Args) -> SysResult<u32> {
    let NameArgs { name } = NameArgs::decode(ctx.user, args)?;
    let slot = ctx
        .kernel
        .tasks
        .iter()
        .find(|(_, t)| t.name == name && t.state != TaskState::Killed)
        .map(|(slot, _)| slot)
        .ok_or(Error::NotFound)?;
    ctx.kernel.terminate(slot);
    Ok(1)
}

fn sys_kill_by_id<B: Board>(ctx: &mut Context<'_, B>, args: &Args) -> SysResult<u32> {
    let TaskArgs { id } = TaskArgs::decode(args)?;
    let slot = ctx.kernel.tasks.find_id(id).ok_or(Error::NotFound)?;
    if ctx.kernel.terminate(slot) {
        Ok(1)
    } else {
        Err(Error::AlreadyKilled)
    }
}

fn sys_run_by_name<B: Board>(ctx: &mut Context<'_, B>, args: &Args) -> SysResult<u32> {
    let NameArgs { name } = NameArgs::decode(ctx.user, args)?;
    let killed = ctx
        .kernel
        .tasks
        .iter()
        .find(|(_, t)| t.name == name && t.state == TaskState::Killed)
        .map(|(slot, _)| slot);
    let slot = match killed {
        Some(slot) => slot,
        None if ctx.kernel.tasks.find_name(name.as_str()).is_some() => return Err(Error::NotKilled),
        None => return Err(Error::NotFound),
    };
    ctx.kernel.restart(slot).map(TaskId::as_raw)
}

fn sys_restart_by_id<B: Board>(ctx: &mut Context<'_, B>, args: &Args) -> SysResult<u32> {
    let TaskArgs { id } = TaskArgs::decode(args)?;
    let slot = ctx.kernel.tasks.find_id(id).ok_or(Error::NotFound)?;
    ctx.kernel.restart(slot).map(TaskId::as_raw)
}

fn sys_set_priority<B: Board>(ctx: &mut Context<'_, B>, args: &Args) -> SysResult<u32> {
    let PriorityArgs { id, priority } = PriorityArgs::decode(args)?;
    let slot = ctx.kernel.tasks.find_id(id).ok_or(Error::NotFound)?;
    let task = ctx.kernel.tasks.get_mut(slot).ok_or(Error::NotFound)?;
    task.current_priority = priority;
    task.boosted = false;
    Ok(1)
}
