/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod destination;
pub use destination::{DEFAULT_WRITE_BUFFER_SIZE, StreamDestination};

mod liveness;
pub use liveness::ConnectionFlag;

mod reader;
pub use reader::{DEFAULT_READ_BUFFER_SIZE, feed_session};
