// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Keylime Authors

//! # elcheckctl
//!
//! Command-line checker for TPM boot event logs. A named policy is
//! compiled from its parameter file and applied to the binary event log,
//! optionally comparing the log's implied PCR contents against quoted
//! ones. Prints `AOK` and exits 0 on approval; prints the reason and
//! exits 1 on rejection.

use clap::Parser;
use elcheckctl::policies::{self, VerifyRequest, POLICY_NAMES};
use log::debug;
use std::path::PathBuf;
use std::process;

/// Check a boot event log against a named policy
#[derive(Parser)]
#[command(
    name = "elcheckctl",
    version,
    about = "Check a TPM boot event log against a named policy",
    long_about = "elcheckctl compiles a named policy from its JSON \
                  parameter file and applies it to a binary TCG event \
                  log. The nextgen2 policy also compares the PCR \
                  contents the log implies against quoted ones."
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress log output
    #[arg(short, long)]
    quiet: bool,

    /// Policy to apply: accept-all, nextgen2, or nextgen2-ignore-pcrs
    #[arg(value_name = "POLICY")]
    policy: String,

    /// <params-json> [<pcrs-json>] <eventlog-binary>
    #[arg(value_name = "FILE", num_args = 2..=3, required = true)]
    files: Vec<PathBuf>,
}

fn init_logging(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    let log_level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    pretty_env_logger::formatted_builder()
        .filter_level(log_level)
        .target(pretty_env_logger::env_logger::Target::Stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);

    let (params, pcrs, eventlog) = match cli.files.as_slice() {
        [params, eventlog] => (params, None, eventlog),
        [params, pcrs, eventlog] => (params, Some(pcrs.as_path()), eventlog),
        _ => unreachable!("clap enforces 2 or 3 file arguments"),
    };

    debug!(
        "applying policy {} (known: {POLICY_NAMES:?})",
        cli.policy
    );
    let request = VerifyRequest {
        policy_name: &cli.policy,
        params,
        pcrs,
        eventlog,
    };

    match policies::verify(&request) {
        Ok(()) => {
            println!("AOK");
        }
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    }
}
