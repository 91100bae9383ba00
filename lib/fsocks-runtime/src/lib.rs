/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod worker;
pub use worker::{WorkerRuntimeConfig, WorkersGuard};
