/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use anyhow::Context;
use log::{info, warn};
use tokio::sync::watch;

use crate::config::FsocksConfig;
use crate::forward::DirectForwarder;

mod direct_tcp;
pub use direct_tcp::DirectTcpServer;

/// Start the forward workers and all servers, then run until ctrl-c is received.
pub async fn run(config: &FsocksConfig) -> anyhow::Result<()> {
    let (forwarder, workers) = DirectForwarder::start(&config.direct_forward)?;

    let (quit_sender, quit_receiver) = watch::channel(());
    let mut servers = Vec::with_capacity(config.servers.len());
    for server_config in &config.servers {
        let server = DirectTcpServer::bind(Arc::new(server_config.clone()), forwarder.clone())
            .await
            .context(format!(
                "failed to bind server {} to {}",
                server_config.name, server_config.listen
            ))?;
        servers.push(tokio::spawn(server.run(quit_receiver.clone())));
    }
    if servers.is_empty() {
        warn!("no server configured");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for ctrl-c signal")?;
    info!("quit signal received, stopping all servers");

    let _ = quit_sender.send(());
    for server in servers {
        if let Err(e) = server.await {
            warn!("server task exited abnormally: {e}");
        }
    }
    workers.shutdown().await;
    Ok(())
}
