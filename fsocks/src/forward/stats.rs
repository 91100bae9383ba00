/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::atomic::{AtomicIsize, AtomicU8, AtomicU64, Ordering};

use super::TerminateReason;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerState {
    Running,
    Draining,
    Terminated,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerState::Running,
            1 => WorkerState::Draining,
            _ => WorkerState::Terminated,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            WorkerState::Running => 0,
            WorkerState::Draining => 1,
            WorkerState::Terminated => 2,
        }
    }
}

/// Why a session left the active list of a worker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ReclaimCause {
    ClientInactive,
    RemoteInactive,
    Terminated(TerminateReason),
    Shutdown,
}

#[derive(Default)]
struct ReclaimStats {
    client_inactive: AtomicU64,
    remote_inactive: AtomicU64,
    terminated: AtomicU64,
    shutdown: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReclaimSnapshot {
    pub client_inactive: u64,
    pub remote_inactive: u64,
    pub terminated: u64,
    pub shutdown: u64,
}

impl ReclaimSnapshot {
    pub fn total(&self) -> u64 {
        self.client_inactive + self.remote_inactive + self.terminated + self.shutdown
    }
}

pub struct ForwardWorkerStats {
    id: usize,
    state: AtomicU8,

    published: AtomicU64,
    admitted: AtomicU64,
    alive: AtomicIsize,
    reclaimed: ReclaimStats,

    buf_forwarded: AtomicU64,
    byte_forwarded: AtomicU64,
    buf_released: AtomicU64,
    flush: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ForwardWorkerSnapshot {
    pub published: u64,
    pub admitted: u64,
    pub alive: isize,
    pub reclaimed: ReclaimSnapshot,
    pub buf_forwarded: u64,
    pub byte_forwarded: u64,
    pub buf_released: u64,
    pub flush: u64,
}

impl ForwardWorkerStats {
    pub(crate) fn new(id: usize) -> Self {
        ForwardWorkerStats {
            id,
            state: AtomicU8::new(WorkerState::Running.as_u8()),
            published: AtomicU64::new(0),
            admitted: AtomicU64::new(0),
            alive: AtomicIsize::new(0),
            reclaimed: ReclaimStats::default(),
            buf_forwarded: AtomicU64::new(0),
            byte_forwarded: AtomicU64::new(0),
            buf_released: AtomicU64::new(0),
            flush: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn worker_id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    pub(crate) fn add_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
        self.alive.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_reclaimed(&self, cause: ReclaimCause) {
        let counter = match cause {
            ReclaimCause::ClientInactive => &self.reclaimed.client_inactive,
            ReclaimCause::RemoteInactive => &self.reclaimed.remote_inactive,
            ReclaimCause::Terminated(_) => &self.reclaimed.terminated,
            ReclaimCause::Shutdown => &self.reclaimed.shutdown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dec_alive(&self) {
        self.alive.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn add_forwarded(&self, size: usize) {
        self.buf_forwarded.fetch_add(1, Ordering::Relaxed);
        self.byte_forwarded.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_released(&self, count: usize) {
        self.buf_released.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_flush(&self) {
        self.flush.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ForwardWorkerSnapshot {
        ForwardWorkerSnapshot {
            published: self.published.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            alive: self.alive.load(Ordering::Relaxed),
            reclaimed: ReclaimSnapshot {
                client_inactive: self.reclaimed.client_inactive.load(Ordering::Relaxed),
                remote_inactive: self.reclaimed.remote_inactive.load(Ordering::Relaxed),
                terminated: self.reclaimed.terminated.load(Ordering::Relaxed),
                shutdown: self.reclaimed.shutdown.load(Ordering::Relaxed),
            },
            buf_forwarded: self.buf_forwarded.load(Ordering::Relaxed),
            byte_forwarded: self.byte_forwarded.load(Ordering::Relaxed),
            buf_released: self.buf_released.load(Ordering::Relaxed),
            flush: self.flush.load(Ordering::Relaxed),
        }
    }
}
