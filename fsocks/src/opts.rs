/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{Arg, ArgAction, ArgMatches, Command, ValueHint, value_parser};
use clap_complete::Shell;

const PKG_NAME: &str = env!("CARGO_PKG_NAME");
const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

const ARGS_COMPLETION: &str = "completion";
const ARGS_VERSION: &str = "version";
const ARGS_VERBOSE: &str = "verbose";
const ARGS_TEST_CONFIG: &str = "test-config";
const ARGS_CONFIG_FILE: &str = "config-file";

#[derive(Debug)]
pub struct ProcArgs {
    pub config_file: PathBuf,
    pub verbose_level: u8,
    pub test_config: bool,
}

fn build_cli_args() -> Command {
    Command::new(PKG_NAME)
        .disable_version_flag(true)
        .arg(
            Arg::new(ARGS_COMPLETION)
                .num_args(1)
                .value_name("SHELL")
                .long("completion")
                .value_parser(value_parser!(Shell))
                .exclusive(true),
        )
        .arg(
            Arg::new(ARGS_VERSION)
                .help("Show version")
                .action(ArgAction::SetTrue)
                .short('V')
                .long(ARGS_VERSION),
        )
        .arg(
            Arg::new(ARGS_VERBOSE)
                .help("Show verbose output")
                .num_args(0)
                .action(ArgAction::Count)
                .short('v')
                .long(ARGS_VERBOSE),
        )
        .arg(
            Arg::new(ARGS_TEST_CONFIG)
                .help("Test the format of config file and exit")
                .action(ArgAction::SetTrue)
                .short('t')
                .long(ARGS_TEST_CONFIG),
        )
        .arg(
            Arg::new(ARGS_CONFIG_FILE)
                .help("Config file path")
                .num_args(1)
                .value_name("CONFIG FILE")
                .value_hint(ValueHint::FilePath)
                .value_parser(value_parser!(PathBuf))
                .required_unless_present_any([ARGS_COMPLETION, ARGS_VERSION])
                .short('c')
                .long(ARGS_CONFIG_FILE),
        )
}

fn parse_matches(args: &ArgMatches) -> anyhow::Result<Option<ProcArgs>> {
    if let Some(target) = args.get_one::<Shell>(ARGS_COMPLETION) {
        let mut app = build_cli_args();
        let bin_name = app.get_name().to_string();
        clap_complete::generate(*target, &mut app, bin_name, &mut io::stdout());
        return Ok(None);
    }

    let verbose_level = args.get_one::<u8>(ARGS_VERBOSE).copied().unwrap_or(0);
    if args.get_flag(ARGS_VERSION) {
        println!("{PKG_NAME} {PKG_VERSION}");
        return Ok(None);
    }

    let Some(config_file) = args.get_one::<PathBuf>(ARGS_CONFIG_FILE) else {
        return Err(anyhow!("no config file given"));
    };
    if !config_file.is_file() {
        return Err(anyhow!(
            "config file {} is not an existing regular file",
            config_file.display()
        ));
    }

    Ok(Some(ProcArgs {
        config_file: config_file.clone(),
        verbose_level,
        test_config: args.get_flag(ARGS_TEST_CONFIG),
    }))
}

pub fn parse_clap() -> anyhow::Result<Option<ProcArgs>> {
    let args = build_cli_args().get_matches();
    parse_matches(&args)
}
