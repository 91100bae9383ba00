/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::Context;
use log::{error, info};

fn main() -> anyhow::Result<()> {
    let Some(proc_args) = fsocks::opts::parse_clap().context("failed to parse command line")?
    else {
        return Ok(());
    };

    let _log_guard = fsocks::log::setup(proc_args.verbose_level)
        .context("failed to setup process logger")?;

    let config = match fsocks::config::load(&proc_args.config_file) {
        Ok(c) => c,
        Err(e) => {
            let e = e.context(format!(
                "failed to load config file {}",
                proc_args.config_file.display()
            ));
            error!("{e:?}");
            return Err(e);
        }
    };
    if proc_args.test_config {
        info!("the format of the config file is ok");
        return Ok(());
    }
    info!(
        "loaded config from {}, {} servers",
        proc_args.config_file.display(),
        config.servers.len()
    );

    let rt = config
        .runtime
        .start()
        .context("failed to start main runtime")?;
    let ret = rt.block_on(fsocks::serve::run(&config));
    if let Err(e) = &ret {
        error!("{e:?}");
    }
    info!("exit");
    ret
}
