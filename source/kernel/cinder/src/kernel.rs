// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel instance: task lifecycle, context switch core, periodic tick, snapshots
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below + scenario tests in tests/scenarios.rs
//! PUBLIC API: Kernel (new/create_thread/start/switch_context/on_tick/terminate/restart/...),
//!             Launch, SwitchPlan, StartError
//! DEPENDS_ON: task, sched, sync, mm, trap, hal::Board
//! INVARIANTS: `current` changes only in start() and switch_context(); a Killed slot holds no
//!             heap blocks, has a deny-all mask and sits in no wait queue
//! ADR: docs/adr/0002-context-switch.md

use crate::config::KernelConfig;
use crate::hal::Board;
use crate::mm::heap::{AllocError, FreeError, HeapMap, Owner};
use crate::mm::protect::{ProtectionManager, SrdMask};
use crate::sched::{Policy, Scheduler};
use crate::sync::{inheritance_target, Ipc, SyncError};
use crate::syscall::SyscallTable;
use crate::task::{BlockedOn, CreateError, Phase, Task, TaskEntry, TaskState, TaskTable};
use crate::trap::{synthesize_initial_frame, TrapFrame, TRAP_FRAME_WORDS};
use crate::types::{MutexId, Name, Priority, SemaphoreId, Slot, TaskId};
use cinder_abi::{IpcsInfo, PsInfo, TaskInfo};

/// Where the first task begins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Launch {
    pub id: TaskId,
    /// Process stack pointer to install (top of the task stack).
    pub sp: u32,
    pub entry: u32,
}

/// Outcome of one context-switch decision.
#[must_use = "the PendSV glue must install the returned stack pointer"]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwitchPlan {
    /// Process stack pointer of the incoming task, pointing at its saved [`TrapFrame`].
    pub sp: u32,
    /// Frame to write at `sp` before restoring, for a task that has never run.
    pub initial_frame: Option<TrapFrame>,
}

#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartError {
    AlreadyStarted,
    NoRunnableTask,
}

/// Global policy switches toggled by syscalls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PolicyFlags {
    pub inheritance: bool,
    pub preemption: bool,
}

/// The kernel: every piece of state mutated from trap context.
pub struct Kernel<B: Board> {
    pub(crate) board: B,
    pub(crate) config: KernelConfig,
    pub(crate) tasks: TaskTable,
    pub(crate) scheduler: Scheduler,
    pub(crate) ipc: Ipc,
    pub(crate) heap: HeapMap,
    pub(crate) protection: ProtectionManager,
    pub(crate) flags: PolicyFlags,
    pub(crate) syscalls: SyscallTable<B>,
    phase: Phase,
    window_ticks: u32,
    current: Option<Slot>,
}

impl<B: Board> Kernel<B> {
    pub fn new(board: B, config: KernelConfig) -> Self {
        let policy = if config.priority_scheduling { Policy::Priority } else { Policy::RoundRobin };
        Self {
            board,
            config,
            tasks: TaskTable::new(),
            scheduler: Scheduler::new(policy),
            ipc: Ipc::new(),
            heap: HeapMap::new(),
            protection: ProtectionManager::new(),
            flags: PolicyFlags {
                inheritance: config.priority_inheritance,
                preemption: config.preemption,
            },
            syscalls: SyscallTable::with_default_handlers(),
            phase: Phase::Ping,
            window_ticks: 0,
            current: None,
        }
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    pub fn ipc(&self) -> &Ipc {
        &self.ipc
    }

    pub fn heap(&self) -> &HeapMap {
        &self.heap
    }

    pub fn protection(&self) -> &ProtectionManager {
        &self.protection
    }

    pub fn policy(&self) -> Policy {
        self.scheduler.policy()
    }

    pub fn flags(&self) -> PolicyFlags {
        self.flags
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Task record for a live id.
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.find_id(id).and_then(|slot| self.tasks.get(slot))
    }

    /// Id of the running task.
    pub fn current(&self) -> Option<TaskId> {
        self.current.and_then(|slot| self.tasks.get(slot)).map(|t| t.id)
    }

    pub(crate) fn current_slot(&self) -> Option<Slot> {
        self.current
    }

    pub fn is_started(&self) -> bool {
        self.current.is_some()
    }

    pub fn init_mutex(&mut self, raw: u32) -> Result<MutexId, SyncError> {
        self.ipc.init_mutex(raw)
    }

    pub fn init_semaphore(&mut self, raw: u32, count: u32) -> Result<SemaphoreId, SyncError> {
        self.ipc.init_semaphore(raw, count)
    }

    /// Creates a task from a function pointer. See [`Kernel::create_thread_at`].
    pub fn create_thread(
        &mut self,
        entry: TaskEntry,
        name: &str,
        priority: u8,
        stack_bytes: u32,
    ) -> Result<TaskId, CreateError> {
        self.create_thread_at(entry as usize as u32, name, priority, stack_bytes)
    }

    /// Registers a task with a private stack of `stack_bytes` bytes carved from the heap.
    pub fn create_thread_at(
        &mut self,
        entry: u32,
        name: &str,
        priority: u8,
        stack_bytes: u32,
    ) -> Result<TaskId, CreateError> {
        if self.is_started() {
            return Err(CreateError::AlreadyStarted);
        }
        let priority = Priority::new(priority).ok_or(CreateError::InvalidPriority)?;
        let slot = self.tasks.vacant_slot(entry)?;
        let id = TaskId::new(slot.as_raw(), 1);
        let base = self.heap.allocate(Owner { slot, id }, stack_bytes).map_err(|err| {
            log_warn!(target: "task", "create {}: stack: {}", name, err);
            CreateError::OutOfMemory
        })?;

        let mut task = Task {
            id,
            entry,
            state: TaskState::NeverRun,
            sp: 0,
            stack_base: base,
            stack_bytes,
            priority,
            current_priority: priority,
            boosted: false,
            ticks: 0,
            mask: SrdMask::DENY_ALL.with_window(base, stack_bytes),
            cpu_time: [0; 2],
            name: Name::new(name),
            blocked_on: None,
        };
        task.sp = task.stack_top();
        self.tasks.insert(task);
        self.protection.recompute_shared(&self.heap);
        log_info!(
            target: "task",
            "created {} id={} prio={} stack={:#010x}+{}",
            name,
            id,
            priority,
            base,
            stack_bytes
        );
        Ok(id)
    }

    /// Picks the first task and returns where to launch it.
    pub fn start(&mut self) -> Result<Launch, StartError> {
        if self.is_started() {
            return Err(StartError::AlreadyStarted);
        }
        let slot = self.scheduler.select(&self.tasks).ok_or(StartError::NoRunnableTask)?;
        let task = self.tasks.get_mut(slot).ok_or(StartError::NoRunnableTask)?;
        task.state = TaskState::Ready;
        let launch = Launch { id: task.id, sp: task.sp, entry: task.entry };
        let mask = task.mask;
        self.current = Some(slot);
        self.protection.apply(&mut self.board, mask);
        let _ = self.board.lap();
        log_info!(target: "sched", "start {} sp={:#010x}", launch.id, launch.sp);
        Ok(launch)
    }

    /// Context-switch core, run from PendSV with the outgoing registers already pushed.
    pub fn switch_context(&mut self, outgoing_sp: u32) -> SwitchPlan {
        let elapsed = self.board.lap();
        let phase = self.phase.index();
        if let Some(task) = self.current.and_then(|slot| self.tasks.get_mut(slot)) {
            if task.state != TaskState::Killed {
                task.sp = outgoing_sp;
            }
            task.cpu_time[phase] = task.cpu_time[phase].saturating_add(elapsed);
        }

        let Some(next) = self.scheduler.select(&self.tasks) else {
            panic!("SCHED: no runnable task");
        };
        self.current = Some(next);
        let Some(task) = self.tasks.get_mut(next) else {
            panic!("SCHED: selected empty slot {}", next);
        };

        let initial_frame = if task.state == TaskState::NeverRun {
            task.state = TaskState::Ready;
            task.sp -= (TRAP_FRAME_WORDS * 4) as u32;
            Some(synthesize_initial_frame(task.entry))
        } else {
            None
        };
        let plan = SwitchPlan { sp: task.sp, initial_frame };
        let mask = task.mask;
        #[cfg(feature = "debug_switch")]
        log_trace!(target: "sched", "switch -> {} sp={:#010x}", task.id, task.sp);
        self.protection.apply(&mut self.board, mask);
        plan
    }

    /// Periodic tick: delays, inheritance, accounting window, preemption.
    pub fn on_tick(&mut self) {
        for task in self.tasks.iter_mut().filter(|t| t.state == TaskState::Delayed) {
            task.ticks = task.ticks.saturating_sub(1);
            if task.ticks == 0 {
                task.state = TaskState::Ready;
            }
        }

        if self.flags.inheritance {
            self.recompute_inheritance();
        }

        self.window_ticks += 1;
        if self.window_ticks >= self.config.accounting_window_ticks {
            self.window_ticks = 0;
            self.phase = self.phase.flip();
            let fresh = self.phase.index();
            for task in self.tasks.iter_mut() {
                task.cpu_time[fresh] = 0;
            }
        }

        if self.flags.preemption {
            self.board.pend_switch();
        }
    }

    /// Raises each mutex owner to its best waiter's current priority, or back to static.
    fn recompute_inheritance(&mut self) {
        for index in 0..crate::config::MAX_MUTEXES {
            let Some(id) = MutexId::new(index as u32) else { continue };
            let mutex = self.ipc.mutex(id);
            let Some(owner) = mutex.owner() else { continue };
            let Some(owner_static) = self.tasks.get(owner).map(|t| t.priority) else { continue };
            let waiters =
                mutex.waiters().iter().filter_map(|s| self.tasks.get(s)).map(|t| t.current_priority);
            let target = inheritance_target(owner_static, waiters);
            if let Some(task) = self.tasks.get_mut(owner) {
                task.current_priority = target;
                task.boosted = target != owner_static;
            }
        }
    }

    pub(crate) fn wake(&mut self, slot: Slot) {
        if let Some(task) = self.tasks.get_mut(slot) {
            task.state = TaskState::Ready;
            task.blocked_on = None;
        }
    }

    /// Drops an inherited boost from `slot` after it released a mutex.
    pub(crate) fn clear_boost(&mut self, slot: Slot) {
        if let Some(task) = self.tasks.get_mut(slot) {
            if task.boosted {
                task.current_priority = task.priority;
                task.boosted = false;
            }
        }
    }

    /// Kills `slot`: frees its memory, denies its windows, pulls it out of wait queues and
    /// hands over any mutex it holds. Returns false if it was not alive.
    pub fn terminate(&mut self, slot: Slot) -> bool {
        let Some(task) = self.tasks.get(slot) else { return false };
        if task.state == TaskState::Killed {
            return false;
        }
        let (id, name, blocked_on) = (task.id, task.name, task.blocked_on);

        let released = self.heap.free_owned_by(id);
        self.protection.recompute_shared(&self.heap);

        match blocked_on {
            Some(BlockedOn::Mutex(m)) => {
                let _ = self.ipc.mutex_mut(m).withdraw(slot);
            }
            Some(BlockedOn::Semaphore(s)) => {
                let _ = self.ipc.semaphore_mut(s).withdraw(slot);
            }
            None => {}
        }

        let mut woke = false;
        for index in 0..crate::config::MAX_MUTEXES {
            let Some(m) = MutexId::new(index as u32) else { continue };
            if self.ipc.mutex(m).owner() == Some(slot) {
                if let Ok(Some(next)) = self.ipc.mutex_mut(m).unlock(slot) {
                    self.wake(next);
                    woke = true;
                }
            }
        }

        if let Some(task) = self.tasks.get_mut(slot) {
            task.state = TaskState::Killed;
            task.mask = SrdMask::DENY_ALL;
            task.sp = 0;
            task.stack_base = 0;
            task.ticks = 0;
            task.blocked_on = None;
            task.current_priority = task.priority;
            task.boosted = false;
        }

        log_info!(target: "task", "killed {} id={} blocks={}", name, id, released);
        if woke || self.current == Some(slot) {
            self.board.pend_switch();
        }
        true
    }

    /// Re-provisions a killed task so it starts again from its entry point.
    pub fn restart(&mut self, slot: Slot) -> Result<TaskId, crate::syscall::Error> {
        let task = self.tasks.get(slot).ok_or(crate::syscall::Error::NotFound)?;
        if task.state != TaskState::Killed {
            return Err(crate::syscall::Error::NotKilled);
        }
        let id = TaskId::new(slot.as_raw(), task.id.generation().wrapping_add(1));
        let stack_bytes = task.stack_bytes;
        let base = self.heap.allocate(Owner { slot, id }, stack_bytes)?;
        self.protection.recompute_shared(&self.heap);

        let Some(task) = self.tasks.get_mut(slot) else {
            return Err(crate::syscall::Error::NotFound);
        };
        task.id = id;
        task.state = TaskState::NeverRun;
        task.current_priority = task.priority;
        task.boosted = false;
        task.blocked_on = None;
        task.ticks = 0;
        task.cpu_time = [0; 2];
        task.stack_base = base;
        task.mask = SrdMask::DENY_ALL.with_window(base, stack_bytes);
        task.sp = task.stack_top();
        log_info!(target: "task", "restarted {} id={}", task.name, id);
        Ok(id)
    }

    /// Allocates heap memory for the running task and opens its window.
    pub fn malloc(&mut self, size: u32) -> Result<u32, AllocError> {
        let Some(slot) = self.current else {
            return Err(AllocError::NoSpace { blocks: 0 });
        };
        let Some(id) = self.tasks.get(slot).map(|t| t.id) else {
            return Err(AllocError::NoSpace { blocks: 0 });
        };
        let base = self.heap.allocate(Owner { slot, id }, size)?;
        self.protection.recompute_shared(&self.heap);
        if let Some(task) = self.tasks.get_mut(slot) {
            task.mask = task.mask.with_window(base, size);
            let mask = task.mask;
            self.protection.apply(&mut self.board, mask);
        }
        Ok(base)
    }

    /// Frees the run at `addr` and closes the owner's window over it.
    pub fn free(&mut self, addr: u32) -> Result<(), FreeError> {
        let run = self.heap.free(addr)?;
        self.protection.recompute_shared(&self.heap);
        if let Some(task) = self.tasks.get_mut(run.owner.slot).filter(|t| t.id == run.owner.id) {
            task.mask = task.mask.without_window(run.base, run.blocks * crate::config::BLOCK_BYTES);
            let mask = task.mask;
            if self.current == Some(run.owner.slot) {
                self.protection.apply(&mut self.board, mask);
            }
        }
        Ok(())
    }

    /// Fills the process table snapshot from the active accounting window.
    pub fn fill_ps(&self, out: &mut PsInfo) {
        let phase = self.phase.index();
        let total: u64 = self.tasks.iter().map(|(_, t)| u64::from(t.cpu_time[phase])).sum();
        for (index, row) in out.tasks.iter_mut().enumerate() {
            let task = Slot::new(index).and_then(|slot| self.tasks.get(slot));
            *row = match task {
                Some(t) => TaskInfo {
                    id: t.id.as_raw(),
                    name: t.name,
                    ticks: t.ticks,
                    state: t.state as u8,
                    cpu: if total == 0 {
                        0
                    } else {
                        (u64::from(t.cpu_time[phase]) * 10_000 / total) as u32
                    },
                },
                None => TaskInfo::default(),
            };
        }
    }

    /// Fills the mutex/semaphore snapshot.
    pub fn fill_ipcs(&self, out: &mut IpcsInfo) {
        let name_of = |slot: Slot| self.tasks.get(slot).map(|t| t.name).unwrap_or_default();
        for (row, mutex) in out.mutexes.iter_mut().zip(self.ipc.mutexes()) {
            *row = Default::default();
            row.locked = mutex.is_locked();
            row.owner = mutex.owner().map(name_of).unwrap_or_default();
            for (dst, slot) in row.queue.names.iter_mut().zip(mutex.waiters().iter()) {
                *dst = name_of(slot);
            }
            row.queue.len = mutex.waiters().len() as u8;
        }
        for (row, sem) in out.semaphores.iter_mut().zip(self.ipc.semaphores()) {
            *row = Default::default();
            row.count = sem.count();
            for (dst, slot) in row.queue.names.iter_mut().zip(sem.waiters().iter()) {
                *dst = name_of(slot);
            }
            row.queue.len = sem.waiters().len() as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HEAP_BASE, HEAP_BLOCKS};
    use crate::hal::sim::SimBoard;

    fn kernel() -> Kernel<SimBoard> {
        Kernel::new(SimBoard::new(), KernelConfig::default())
    }

    #[test]
    fn create_reserves_stack_and_window() {
        let mut k = kernel();
        let id = k.create_thread_at(0x1001, "idle", 7, 1024).unwrap();
        let t = k.task(id).unwrap();
        assert_eq!(t.state, TaskState::NeverRun);
        assert_eq!(t.stack_base, HEAP_BASE);
        assert_eq!(t.sp, HEAP_BASE + 1024);
        assert!(t.mask.allows(HEAP_BASE));
        assert!(!t.mask.allows(HEAP_BASE + 1024));
        assert_eq!(k.heap().free_blocks(), HEAP_BLOCKS - 1);
    }

    #[test]
    fn create_rejects_duplicates_bad_priority_and_oom() {
        let mut k = kernel();
        k.create_thread_at(0x1001, "a", 0, 1024).unwrap();
        assert_eq!(k.create_thread_at(0x1001, "b", 0, 1024), Err(CreateError::DuplicateEntry));
        assert_eq!(k.create_thread_at(0x2001, "b", 8, 1024), Err(CreateError::InvalidPriority));
        assert_eq!(k.create_thread_at(0x3001, "c", 0, 64 * 1024), Err(CreateError::OutOfMemory));
        assert_eq!(k.tasks().len(), 1);
    }

    #[test]
    fn first_switch_synthesizes_frame_and_programs_mpu() {
        let mut k = kernel();
        let a = k.create_thread_at(0x1001, "a", 0, 1024).unwrap();
        let b = k.create_thread_at(0x2001, "b", 0, 1024).unwrap();
        let launch = k.start().unwrap();
        assert_eq!(launch.id, a);
        assert_eq!(launch.entry, 0x1001);
        assert_eq!(k.task(a).unwrap().state, TaskState::Ready);

        let plan = k.switch_context(launch.sp - 68);
        assert_eq!(k.current(), Some(b));
        let frame = plan.initial_frame.unwrap();
        assert_eq!(frame.hw.pc, 0x2000);
        assert_eq!(plan.sp, HEAP_BASE + 2048 - 68);
        assert_eq!(k.task(b).unwrap().state, TaskState::Ready);
        assert_eq!(k.board().srd[2], !(1u8 << 5));
        assert_eq!(k.task(a).unwrap().sp, launch.sp - 68);

        let back = k.switch_context(plan.sp);
        assert_eq!(k.current(), Some(a));
        assert_eq!(back.initial_frame, None);
        assert_eq!(back.sp, launch.sp - 68);
    }

    #[test]
    fn start_requires_a_task() {
        let mut k = kernel();
        assert_eq!(k.start(), Err(StartError::NoRunnableTask));
        k.create_thread_at(0x1001, "idle", 7, 512).unwrap();
        assert!(k.start().is_ok());
        assert_eq!(k.start(), Err(StartError::AlreadyStarted));
        assert_eq!(k.create_thread_at(0x2001, "late", 7, 512), Err(CreateError::AlreadyStarted));
    }

    #[test]
    fn tick_wakes_delayed_and_pends_when_preemptive() {
        let mut k = kernel();
        let a = k.create_thread_at(0x1001, "a", 0, 512).unwrap();
        let slot = k.tasks.find_id(a).unwrap();
        {
            let t = k.tasks.get_mut(slot).unwrap();
            t.state = TaskState::Delayed;
            t.ticks = 2;
        }
        k.on_tick();
        assert_eq!(k.task(a).unwrap().state, TaskState::Delayed);
        k.on_tick();
        assert_eq!(k.task(a).unwrap().state, TaskState::Ready);
        assert_eq!(k.board_mut().take_switches(), 2);

        k.flags.preemption = false;
        k.on_tick();
        assert_eq!(k.board_mut().take_switches(), 0);
    }

    #[test]
    fn accounting_window_flips_and_clears() {
        let mut k = Kernel::new(SimBoard::new(), KernelConfig { accounting_window_ticks: 3, ..Default::default() });
        let a = k.create_thread_at(0x1001, "a", 0, 512).unwrap();
        k.create_thread_at(0x2001, "b", 0, 512).unwrap();
        let launch = k.start().unwrap();
        k.board_mut().cycles_per_lap = 100;
        let _ = k.switch_context(launch.sp);
        assert_eq!(k.task(a).unwrap().cpu_time, [100, 0]);

        let mut ps = PsInfo::default();
        k.fill_ps(&mut ps);
        assert_eq!(ps.tasks[0].cpu, 10_000);
        assert_eq!(ps.tasks[1].cpu, 0);
        assert_eq!(ps.tasks[2].id, 0);

        for _ in 0..3 {
            k.on_tick();
        }
        assert_eq!(k.phase(), Phase::Pong);
        assert_eq!(k.task(a).unwrap().cpu_time, [100, 0]);
        for _ in 0..3 {
            k.on_tick();
        }
        assert_eq!(k.phase(), Phase::Ping);
        assert_eq!(k.task(a).unwrap().cpu_time, [0, 0]);
    }

    #[test]
    fn restart_bumps_generation_and_reprovisions() {
        let mut k = kernel();
        k.create_thread_at(0x1001, "idle", 7, 512).unwrap();
        let a = k.create_thread_at(0x2001, "a", 0, 1500).unwrap();
        let slot = k.tasks.find_id(a).unwrap();
        assert_eq!(k.restart(slot), Err(crate::syscall::Error::NotKilled));
        assert!(k.terminate(slot));
        assert!(!k.terminate(slot));
        assert_eq!(k.heap().free_blocks(), HEAP_BLOCKS - 1);

        let fresh = k.restart(slot).unwrap();
        assert_ne!(fresh, a);
        assert_eq!(fresh.generation(), a.generation() + 1);
        assert!(k.task(a).is_none());
        let t = k.task(fresh).unwrap();
        assert_eq!(t.state, TaskState::NeverRun);
        assert_eq!(t.sp, t.stack_top());
        assert!(t.mask.allows(t.stack_base));
        assert_eq!(k.heap().owner_of(t.stack_base).map(|o| o.id), Some(fresh));
    }

    #[test]
    fn malloc_and_free_track_the_current_window() {
        let mut k = kernel();
        k.create_thread_at(0x1001, "a", 0, 1024).unwrap();
        k.start().unwrap();
        let addr = k.malloc(2048).unwrap();
        let id = k.current().unwrap();
        assert!(k.task(id).unwrap().mask.allows(addr + 2047));
        assert!(k.protection().shared().allows(addr));
        k.free(addr).unwrap();
        assert!(!k.task(id).unwrap().mask.allows(addr));
        assert!(!k.protection().shared().allows(addr));
        assert_eq!(k.free(addr), Err(FreeError::NotAllocated));
    }
}
