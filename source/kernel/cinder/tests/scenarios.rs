// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end kernel scenarios driven through the public API on the simulated board.

use cinder::hal::sim::SimBoard;
use cinder::mm::heap::FreeError;
use cinder::syscall::{Args, UserMemory};
use cinder::{Kernel, KernelConfig, Name, Policy, QueueOverflow, TaskId, TaskState};
use cinder_abi::{IpcsInfo, PsInfo, SyscallNumber, KEY_PRESSED, RESOURCE};

#[derive(Default)]
struct Memory {
    names: Vec<(u32, &'static str)>,
    ps: Option<PsInfo>,
    ipcs: Option<IpcsInfo>,
}

impl UserMemory for Memory {
    fn read_name(&self, ptr: u32, len: u32) -> Option<Name> {
        let (_, name) = self.names.iter().find(|(p, _)| *p == ptr)?;
        Some(Name::new(name.get(..len as usize)?))
    }

    fn write_ps(&mut self, _ptr: u32, info: &PsInfo) -> bool {
        self.ps = Some(*info);
        true
    }

    fn write_ipcs(&mut self, _ptr: u32, info: &IpcsInfo) -> bool {
        self.ipcs = Some(*info);
        true
    }
}

fn kernel(config: KernelConfig, tasks: &[(&str, u8)]) -> (Kernel<SimBoard>, Vec<TaskId>) {
    let mut k = Kernel::new(SimBoard::new(), config);
    k.init_mutex(u32::from(RESOURCE)).expect("mutex");
    for s in 0..3 {
        k.init_semaphore(s, 0).expect("semaphore");
    }
    let ids = tasks
        .iter()
        .enumerate()
        .map(|(i, &(name, prio))| {
            k.create_thread_at(0x0000_1001 + 0x100 * i as u32, name, prio, 1024)
                .expect("create")
        })
        .collect();
    (k, ids)
}

fn sys(k: &mut Kernel<SimBoard>, n: SyscallNumber, r0: u32) -> u32 {
    k.syscall(n.as_raw(), &Args::new(r0, 0), &mut Memory::default())
}

/// Performs the switch the board was asked for, as PendSV would.
fn reschedule(k: &mut Kernel<SimBoard>) -> TaskId {
    let current = k.current().expect("running");
    let sp = k.task(current).map_or(0, |t| t.sp);
    let _ = k.switch_context(sp);
    k.board_mut().take_switches();
    k.current().expect("running")
}

#[test]
fn equal_priorities_alternate_and_lower_starves() {
    let (mut k, ids) = kernel(KernelConfig::default(), &[("a", 0), ("b", 0), ("c", 1)]);
    let first = k.start().expect("start").id;
    let mut order = vec![first];
    for _ in 0..5 {
        order.push(reschedule(&mut k));
    }
    assert_eq!(order, vec![ids[0], ids[1], ids[0], ids[1], ids[0], ids[1]]);
    assert_eq!(k.task(ids[2]).map(|t| t.state), Some(TaskState::NeverRun));
}

#[test]
fn round_robin_ignores_priority() {
    let config = KernelConfig::default().with_policy(false, false, true);
    let (mut k, ids) = kernel(config, &[("a", 0), ("b", 7), ("c", 3)]);
    assert_eq!(k.policy(), Policy::RoundRobin);
    k.start().expect("start");
    assert_eq!(reschedule(&mut k), ids[1]);
    assert_eq!(reschedule(&mut k), ids[2]);
    assert_eq!(reschedule(&mut k), ids[0]);
}

#[test]
fn mutex_hands_off_to_blocked_waiter() {
    let (mut k, ids) = kernel(KernelConfig::default(), &[("a", 0), ("b", 0)]);
    k.start().expect("start");
    assert_eq!(sys(&mut k, SyscallNumber::Lock, u32::from(RESOURCE)), 1);

    assert_eq!(reschedule(&mut k), ids[1]);
    assert_eq!(sys(&mut k, SyscallNumber::Lock, u32::from(RESOURCE)), 1);
    assert_eq!(k.task(ids[1]).map(|t| t.state), Some(TaskState::BlockedOnMutex));

    assert_eq!(reschedule(&mut k), ids[0]);
    assert_eq!(sys(&mut k, SyscallNumber::Unlock, u32::from(RESOURCE)), 1);

    let mut mem = Memory::default();
    k.syscall(SyscallNumber::Ipcs.as_raw(), &Args::new(0x2000_0400, 0), &mut mem);
    let ipcs = mem.ipcs.expect("snapshot");
    assert!(ipcs.mutexes[0].locked);
    assert_eq!(ipcs.mutexes[0].owner.as_str(), "b");
    assert_eq!(ipcs.mutexes[0].queue.len, 0);
    assert_eq!(k.task(ids[1]).map(|t| t.state), Some(TaskState::Ready));
}

#[test]
fn full_queue_rejects_or_extends_by_policy() {
    let tasks = [("a", 0), ("b", 0), ("c", 0), ("d", 0)];

    let (mut k, ids) = kernel(KernelConfig::default(), &tasks);
    k.start().expect("start");
    for _ in 0..2 {
        assert_eq!(sys(&mut k, SyscallNumber::Wait, u32::from(KEY_PRESSED)), 1);
        reschedule(&mut k);
    }
    assert_eq!(k.current(), Some(ids[2]));
    assert_eq!(sys(&mut k, SyscallNumber::Wait, u32::from(KEY_PRESSED)), 0);
    assert_eq!(k.task(ids[2]).map(|t| t.state), Some(TaskState::Ready));
    assert_eq!(k.board_mut().take_switches(), 0);

    let config = KernelConfig::default().with_queue_overflow(QueueOverflow::Extend);
    let (mut k, ids) = kernel(config, &tasks);
    k.start().expect("start");
    for _ in 0..3 {
        sys(&mut k, SyscallNumber::Wait, u32::from(KEY_PRESSED));
        reschedule(&mut k);
    }
    assert_eq!(sys(&mut k, SyscallNumber::Wait, u32::from(KEY_PRESSED)), 1);
    assert_eq!(k.task(ids[3]).map(|t| t.state), Some(TaskState::BlockedOnSemaphore));
}

#[test]
fn allocation_rounds_to_blocks_and_free_needs_run_base() {
    let (mut k, _) = kernel(KernelConfig::default(), &[("a", 0)]);
    k.start().expect("start");
    let before = k.heap().free_blocks();
    let base = k.malloc(1500).expect("malloc");
    assert_eq!(k.heap().free_blocks(), before - 2);
    assert_eq!(k.free(base + 1024), Err(FreeError::NotRunBase));
    assert_eq!(k.free(base + 1), Err(FreeError::Misaligned));
    assert_eq!(k.free(base), Ok(()));
    assert_eq!(k.heap().free_blocks(), before);
}

#[test]
fn sleeping_task_wakes_after_its_ticks() {
    let config = KernelConfig::default().with_policy(true, false, false);
    let (mut k, ids) = kernel(config, &[("sleeper", 0), ("idle", 7)]);
    k.start().expect("start");
    assert_eq!(sys(&mut k, SyscallNumber::Sleep, 3), 1);
    assert_eq!(reschedule(&mut k), ids[1]);
    k.on_tick();
    k.on_tick();
    assert_eq!(k.task(ids[0]).map(|t| t.state), Some(TaskState::Delayed));
    k.on_tick();
    assert_eq!(k.task(ids[0]).map(|t| t.state), Some(TaskState::Ready));
    assert_eq!(k.board_mut().take_switches(), 0);
    assert_eq!(reschedule(&mut k), ids[0]);
}

#[test]
fn inheritance_lifts_owner_over_middle_priority() {
    let config = KernelConfig::default().with_policy(true, true, true);
    let (mut k, ids) = kernel(config, &[("low", 5), ("mid", 3), ("high", 1)]);
    let (low, mid, high) = (ids[0], ids[1], ids[2]);

    let slot = k.tasks().find_id(high).expect("high");
    k.start().expect("start");
    assert_eq!(k.current(), Some(high));
    assert_eq!(sys(&mut k, SyscallNumber::Sleep, 1), 1);
    assert_eq!(reschedule(&mut k), mid);
    assert_eq!(sys(&mut k, SyscallNumber::Sleep, 1), 1);
    assert_eq!(reschedule(&mut k), low);
    assert_eq!(sys(&mut k, SyscallNumber::Lock, u32::from(RESOURCE)), 1);

    k.on_tick();
    assert_eq!(reschedule(&mut k), high);
    assert_eq!(sys(&mut k, SyscallNumber::Lock, u32::from(RESOURCE)), 1);
    assert_eq!(k.tasks().get(slot).map(|t| t.state), Some(TaskState::BlockedOnMutex));

    k.on_tick();
    assert_eq!(k.task(low).map(|t| t.current_priority.as_raw()), Some(1));
    assert_eq!(reschedule(&mut k), low);

    assert_eq!(sys(&mut k, SyscallNumber::Unlock, u32::from(RESOURCE)), 1);
    assert_eq!(k.task(low).map(|t| t.current_priority.as_raw()), Some(5));
    assert_eq!(reschedule(&mut k), high);
}

#[test]
fn killing_an_owner_passes_the_mutex_on() {
    let (mut k, ids) = kernel(KernelConfig::default(), &[("a", 0), ("b", 0), ("c", 1)]);
    k.start().expect("start");
    sys(&mut k, SyscallNumber::Lock, u32::from(RESOURCE));
    reschedule(&mut k);
    sys(&mut k, SyscallNumber::Lock, u32::from(RESOURCE));
    assert_eq!(reschedule(&mut k), ids[0]);

    let mut mem = Memory { names: vec![(0x10, "a")], ..Default::default() };
    assert_eq!(k.syscall(SyscallNumber::KillByName.as_raw(), &Args::new(0x10, 1), &mut mem), 1);
    assert_eq!(k.task(ids[0]).map(|t| t.state), Some(TaskState::Killed));
    assert_eq!(k.task(ids[1]).map(|t| t.state), Some(TaskState::Ready));
    assert_eq!(reschedule(&mut k), ids[1]);

    let owner = k.ipc().mutexes().next().and_then(|m| m.owner());
    assert_eq!(owner, k.tasks().find_id(ids[1]));

    let fresh = k.syscall(SyscallNumber::RunByName.as_raw(), &Args::new(0x10, 1), &mut mem);
    let fresh = TaskId::from_raw(fresh).expect("restarted");
    assert_eq!(fresh.slot(), ids[0].slot());
    assert_ne!(fresh, ids[0]);
}

#[test]
fn process_snapshot_reports_cpu_share() {
    let (mut k, ids) = kernel(KernelConfig::default(), &[("a", 0), ("b", 0)]);
    k.start().expect("start");
    k.board_mut().cycles_per_lap = 300;
    reschedule(&mut k);
    k.board_mut().cycles_per_lap = 100;
    reschedule(&mut k);

    let mut mem = Memory::default();
    assert_eq!(k.syscall(SyscallNumber::Ps.as_raw(), &Args::new(0x2000_0400, 0), &mut mem), 1);
    let ps = mem.ps.expect("snapshot");
    assert_eq!(ps.tasks[0].id, ids[0].as_raw());
    assert_eq!(ps.tasks[0].cpu, 7500);
    assert_eq!(ps.tasks[1].cpu, 2500);
    assert_eq!(ps.tasks[2].state(), TaskState::Invalid);
}

#[test]
fn zero_capacity_literal_still_admits_one_waiter() {
    let config = KernelConfig { wait_queue_capacity: 0, ..KernelConfig::default() };
    let (mut k, ids) = kernel(config, &[("a", 0), ("b", 0)]);
    k.start().expect("start");
    assert_eq!(sys(&mut k, SyscallNumber::Wait, u32::from(KEY_PRESSED)), 1);
    assert_eq!(k.task(ids[0]).map(|t| t.state), Some(TaskState::BlockedOnSemaphore));
    assert_eq!(reschedule(&mut k), ids[1]);
    assert_eq!(sys(&mut k, SyscallNumber::Wait, u32::from(KEY_PRESSED)), 0);
}
