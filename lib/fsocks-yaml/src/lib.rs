/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod doc;
mod hash;

pub mod humanize;
pub mod value;

pub use doc::{foreach_doc, load_doc};
pub use hash::foreach_kv;
