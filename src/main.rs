// This file is part of Pond, a log-record broker.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

use base::Error;
use bpaf::Bpaf;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

mod client;
mod cmds;
mod connection;
mod frame;
mod query;
mod server;
mod sitewriter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Pond: a specialized log-record broker for HTTP access-log datagrams.
#[derive(Bpaf, Debug)]
#[bpaf(options, version(VERSION))]
enum Args {
    // See docstrings of `cmds::*::Args` structs for a description of the respective subcommands.
    Serve(#[bpaf(external(cmds::serve::args))] cmds::serve::Args),
    Query(#[bpaf(external(cmds::query::args))] cmds::query::Args),
}

impl Args {
    fn run(self) -> Result<i32, Error> {
        match self {
            Args::Serve(a) => cmds::serve::run(a),
            Args::Query(a) => cmds::query::run(a),
        }
    }
}

fn main() {
    base::tracing_setup::install();

    // Get the program name from the OS (e.g. if invoked as `target/debug/pond`: `pond`),
    // falling back to the crate name if conversion to a path/UTF-8 string fails.
    let progname = std::env::args_os().next().map(PathBuf::from);
    let progname = progname
        .as_deref()
        .and_then(Path::file_name)
        .and_then(OsStr::to_str)
        .unwrap_or(env!("CARGO_PKG_NAME"));

    let args = match args()
        .fallback_to_usage()
        .run_inner(bpaf::Args::current_args().set_name(progname))
    {
        Ok(a) => a,
        Err(e) => std::process::exit(e.exit_code()),
    };
    tracing::trace!("parsed command-line arguments: {args:#?}");

    match args.run() {
        Err(e) => {
            error!(err = %e.chain(), "exiting due to error");
            std::process::exit(1);
        }
        Ok(rv) => {
            debug!("exiting with status {}", rv);
            std::process::exit(rv)
        }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn bpaf_invariants() {
        super::args().check_invariants(false);
    }
}
