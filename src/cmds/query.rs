// This file is part of Pond, a log-record broker.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! `pond query`: the bundled CLI client's argument surface. The protocol
//! work itself lives in `crate::client`, which this just calls into.

use base::Error;
use bpaf::Bpaf;

/// Opens a query against a running `pond serve` and prints matching log
/// datagrams to stdout, one per line, until the server sends `END`.
#[derive(Bpaf, Debug)]
#[bpaf(command("query"))]
pub struct Args {
    /// Server address, e.g. `localhost` or `localhost:5480`. Defaults to
    /// port 5480 if no port is given.
    #[bpaf(positional("SERVER"))]
    pub server: String,

    /// Stay connected and print new matching records as they arrive,
    /// instead of exiting once history is exhausted.
    #[bpaf(long, switch)]
    pub follow: bool,

    /// Filter terms of the form `site=VALUE`, `host=VALUE`, or
    /// `uri=VALUE`. May be repeated; an empty list matches everything.
    #[bpaf(positional("FILTER"))]
    pub filters: Vec<String>,
}

pub fn run(args: Args) -> Result<i32, Error> {
    crate::client::run(args)
}
