/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::anyhow;
use yaml_rust::Yaml;

pub fn as_sockaddr(v: &Yaml) -> anyhow::Result<SocketAddr> {
    match v {
        Yaml::String(s) => {
            SocketAddr::from_str(s).map_err(|e| anyhow!("invalid socket address {s}: {e}"))
        }
        _ => Err(anyhow!(
            "yaml value type for 'SocketAddr' should be 'string'"
        )),
    }
}
