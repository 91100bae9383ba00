/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::atomic::{AtomicBool, Ordering};

use crate::forward::ConnectionLiveness;

/// Liveness flag of a connection, cleared by whichever task sees it die first.
#[derive(Debug)]
pub struct ConnectionFlag {
    active: AtomicBool,
}

impl Default for ConnectionFlag {
    fn default() -> Self {
        ConnectionFlag {
            active: AtomicBool::new(true),
        }
    }
}

impl ConnectionFlag {
    pub fn set_inactive(&self) {
        self.active.store(false, Ordering::Relaxed);
    }
}

impl ConnectionLiveness for ConnectionFlag {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}
