/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod session;
pub use session::{
    ConnectionLiveness, DestinationChannel, DirectSession, SessionContext, SessionHandle,
    SetDestinationError, TerminateReason, TerminationMark,
};

mod stats;
pub use stats::{ForwardWorkerSnapshot, ForwardWorkerStats, ReclaimSnapshot, WorkerState};

pub mod cleanup;

mod worker;
pub use worker::{ForwardWorker, WorkerInterrupted};

mod dispatch;
pub use dispatch::{DirectForwarder, ForwardWorkersGuard, shard_index};
