/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod net;
mod primary;

pub use net::as_sockaddr;
pub use primary::{as_list, as_nonzero_usize, as_string, as_usize};
