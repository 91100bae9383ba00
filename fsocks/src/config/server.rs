/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use yaml_rust::{Yaml, yaml};

const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// A `host:port` pair, the host may be a domain name or an ip address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UpstreamAddr {
    host: String,
    port: u16,
}

impl UpstreamAddr {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for UpstreamAddr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = if let Some(v6) = s.strip_prefix('[') {
            let (ip, port) = v6
                .split_once("]:")
                .ok_or_else(|| anyhow!("invalid bracketed ipv6 address"))?;
            let ip = IpAddr::from_str(ip).map_err(|e| anyhow!("invalid ipv6 address: {e}"))?;
            (ip.to_string(), port)
        } else {
            let (host, port) = s.rsplit_once(':').ok_or_else(|| anyhow!("no port found"))?;
            if host.is_empty() || host.contains(':') {
                return Err(anyhow!("invalid host {host}"));
            }
            (host.to_string(), port)
        };
        let port = u16::from_str(port).map_err(|e| anyhow!("invalid port {port}: {e}"))?;
        if port == 0 {
            return Err(anyhow!("port should not be zero"));
        }
        Ok(UpstreamAddr { host, port })
    }
}

impl fmt::Display for UpstreamAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A listening port whose clients are all forwarded directly to a fixed upstream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DirectTcpServerConfig {
    pub name: String,
    pub listen: SocketAddr,
    pub upstream: UpstreamAddr,
    pub connect_timeout: Duration,
    pub tcp_read_buffer_size: usize,
    pub tcp_write_buffer_size: usize,
}

#[derive(Default)]
struct ServerConfigBuilder {
    name: Option<String>,
    listen: Option<SocketAddr>,
    upstream: Option<UpstreamAddr>,
    connect_timeout: Option<Duration>,
    tcp_read_buffer_size: Option<usize>,
    tcp_write_buffer_size: Option<usize>,
}

impl ServerConfigBuilder {
    fn set(&mut self, k: &str, v: &Yaml) -> anyhow::Result<()> {
        match k {
            "name" => {
                self.name = Some(fsocks_yaml::value::as_string(v)?);
                Ok(())
            }
            "listen" => {
                let addr = fsocks_yaml::value::as_sockaddr(v)
                    .context(format!("invalid socket address value for key {k}"))?;
                self.listen = Some(addr);
                Ok(())
            }
            "upstream" => {
                let s = fsocks_yaml::value::as_string(v)?;
                let addr = UpstreamAddr::from_str(&s)
                    .context(format!("invalid upstream address value for key {k}"))?;
                self.upstream = Some(addr);
                Ok(())
            }
            "connect_timeout" => {
                let timeout = fsocks_yaml::humanize::as_duration(v)
                    .context(format!("invalid humanize duration value for key {k}"))?;
                self.connect_timeout = Some(timeout);
                Ok(())
            }
            "tcp_read_buffer_size" | "read_buffer_size" => {
                let size = fsocks_yaml::humanize::as_usize(v)
                    .context(format!("invalid humanize usize value for key {k}"))?;
                self.tcp_read_buffer_size = Some(size);
                Ok(())
            }
            "tcp_write_buffer_size" | "write_buffer_size" => {
                let size = fsocks_yaml::humanize::as_usize(v)
                    .context(format!("invalid humanize usize value for key {k}"))?;
                self.tcp_write_buffer_size = Some(size);
                Ok(())
            }
            _ => Err(anyhow!("invalid key {k}")),
        }
    }

    fn build(self) -> anyhow::Result<DirectTcpServerConfig> {
        let name = self.name.ok_or_else(|| anyhow!("name is not set"))?;
        if name.is_empty() {
            return Err(anyhow!("name should not be empty"));
        }
        let listen = self
            .listen
            .ok_or_else(|| anyhow!("listen address is not set for server {name}"))?;
        let upstream = self
            .upstream
            .ok_or_else(|| anyhow!("upstream address is not set for server {name}"))?;

        let tcp_read_buffer_size = self.tcp_read_buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        if tcp_read_buffer_size == 0 {
            return Err(anyhow!("tcp read buffer size should not be zero"));
        }
        let tcp_write_buffer_size = self.tcp_write_buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);

        Ok(DirectTcpServerConfig {
            name,
            listen,
            upstream,
            connect_timeout: self.connect_timeout.unwrap_or(Duration::from_secs(10)),
            tcp_read_buffer_size,
            tcp_write_buffer_size,
        })
    }
}

impl DirectTcpServerConfig {
    pub(crate) fn parse(map: &yaml::Hash) -> anyhow::Result<Self> {
        let mut builder = ServerConfigBuilder::default();
        fsocks_yaml::foreach_kv(map, |k, v| builder.set(k, v))?;
        builder.build()
    }
}

/// Load a single server or a list of servers.
pub(crate) fn load_all(v: &Yaml) -> anyhow::Result<Vec<DirectTcpServerConfig>> {
    fsocks_yaml::value::as_list(v, |v| {
        if let Yaml::Hash(map) = v {
            DirectTcpServerConfig::parse(map)
        } else {
            Err(anyhow!("yaml value type for 'server config' should be 'map'"))
        }
    })
}
