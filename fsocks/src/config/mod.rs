/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::HashSet;
use std::path::Path;

use anyhow::anyhow;
use yaml_rust::{Yaml, yaml};

mod forward;
pub use forward::DirectForwardConfig;

mod runtime;
pub use runtime::MainRuntimeConfig;

mod server;
pub use server::{DirectTcpServerConfig, UpstreamAddr};

#[derive(Clone, Debug, Default)]
pub struct FsocksConfig {
    pub runtime: MainRuntimeConfig,
    pub direct_forward: DirectForwardConfig,
    pub servers: Vec<DirectTcpServerConfig>,
}

impl FsocksConfig {
    fn load_doc(&mut self, map: &yaml::Hash) -> anyhow::Result<()> {
        fsocks_yaml::foreach_kv(map, |k, v| match k {
            "runtime" => {
                self.runtime = MainRuntimeConfig::parse_yaml(v)?;
                Ok(())
            }
            "direct_forward" | "forward" => {
                self.direct_forward = DirectForwardConfig::parse_yaml(v)?;
                Ok(())
            }
            "server" => {
                let servers = server::load_all(v)?;
                self.servers.extend(servers);
                Ok(())
            }
            _ => Err(anyhow!("invalid key {k} in main conf")),
        })
    }

    fn check(&self) -> anyhow::Result<()> {
        let mut names = HashSet::new();
        for server in &self.servers {
            if !names.insert(server.name.as_str()) {
                return Err(anyhow!("duplicate server name {}", server.name));
            }
        }
        Ok(())
    }

    pub fn parse_docs(docs: &[Yaml]) -> anyhow::Result<Self> {
        let mut config = FsocksConfig::default();
        for (i, doc) in docs.iter().enumerate() {
            match doc {
                Yaml::Hash(map) => config.load_doc(map)?,
                _ => return Err(anyhow!("yaml doc #{i} root should be hash")),
            }
        }
        config.check()?;
        Ok(config)
    }
}

pub fn load(config_file: &Path) -> anyhow::Result<FsocksConfig> {
    let mut config = FsocksConfig::default();
    // allow multiple docs, and treat them as the same
    fsocks_yaml::foreach_doc(config_file, |_, doc| match doc {
        Yaml::Hash(map) => config.load_doc(map),
        _ => Err(anyhow!("yaml doc root should be hash")),
    })?;
    config.check()?;
    Ok(config)
}
