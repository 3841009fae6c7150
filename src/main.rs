#![allow(clippy::redundant_static_lifetimes)]
#![allow(clippy::redundant_field_names)]

extern crate clap;
extern crate libc;
extern crate nix;
extern crate sc;
#[macro_use]
extern crate lazy_static;
extern crate byteorder;

mod bootstrap;
mod cli;
mod errors;
mod handler;
mod handlers;
mod mapper;
mod register;
mod registry;
mod sigactions;
mod supervisor;
mod tracee;
mod wire;

#[cfg(test)]
mod testutil;
#[cfg(test)]
mod e2e_tests;

use crate::registry::CLOCK_EPOCH;
use crate::supervisor::Supervisor;
use std::process::exit;

fn main() {
    // step 1: CLI parsing
    let config = cli::parse_config();

    env_logger::Builder::new()
        .filter_level(config.level_filter())
        .parse_env("RUST_LOG")
        .init();

    // step 2: signal dispositions for the tracer itself
    sigactions::install();

    // step 3: fork and stop the root tracee right before its exec
    let root_pid = match bootstrap::spawn_traced(&config.command, &config.args) {
        Ok(pid) => pid,
        Err(error) => {
            eprintln!("failed to launch {:?}: {}", config.command, error);
            exit(126);
        }
    };

    // step 4: attach and run the event loop to completion
    let kernel_has_seccomp_pre_event = supervisor::detect_kernel_seccomp_support();
    let mut supervisor = Supervisor::new(kernel_has_seccomp_pre_event);
    if let Some(clock_base) = config.clock_base {
        supervisor.registry.set_logical_clock(clock_base);
    } else {
        debug_assert_eq!(supervisor.registry.logical_time(), CLOCK_EPOCH);
    }

    if let Err(error) = supervisor.attach_root(root_pid) {
        eprintln!("failed to attach to the root tracee: {}", error);
        exit(126);
    }

    let status = supervisor.run();
    exit(status);
}
