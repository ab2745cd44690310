// This file is part of Pond, a log-record broker.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! `pond serve`: runs the listener that accepts producer and consumer
//! connections.
//!
//! The runtime is deliberately `new_current_thread` rather than the
//! multi-threaded runtime this codebase otherwise defaults to for its other
//! subcommands: the core (`Database`, `Cursor`, `Selection`, `Query`,
//! `Connection`) is `!Send` by construction, so there is exactly one OS
//! thread driving the reactor and every connection task is `spawn_local`'d
//! onto a single `LocalSet` (see `crate::server`).

use crate::server;
use base::{Error, ErrorKind};
use bpaf::Bpaf;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

const DEFAULT_LISTEN: &str = "0.0.0.0:5480";

/// A few hundred thousand small access-log datagrams keeps resident memory
/// in the tens of megabytes; operators with heavier traffic can raise this.
const DEFAULT_CAPACITY: &str = "200K";

/// Runs the log-record broker: accepts producer and consumer connections on
/// one TCP listener.
#[derive(Bpaf, Debug)]
#[bpaf(command("serve"))]
pub struct Args {
    /// Address (and optional port, default 5480) to listen on.
    #[bpaf(long, argument("ADDR"), fallback(DEFAULT_LISTEN.to_string()))]
    listen: String,

    /// Ring capacity, in records. Accepts human-readable size suffixes
    /// (`K`, `M`, `G`, `T`).
    #[bpaf(long, argument("SIZE"), fallback(DEFAULT_CAPACITY.to_string()))]
    capacity: String,

    /// Writes one append-only file per site under this directory. A record
    /// with no parsed site is silently dropped.
    #[bpaf(long, argument("PATH"))]
    append_dir: Option<PathBuf>,
}

pub fn run(args: Args) -> Result<i32, Error> {
    let listen: SocketAddr = args.listen.parse().map_err(|e| {
        Error::new(
            ErrorKind::Other,
            format!("invalid --listen {:?}: {e}", args.listen),
        )
    })?;
    let capacity = base::strutil::decode_size(&args.capacity)
        .map_err(|()| Error::new(ErrorKind::Other, format!("invalid --capacity {:?}", args.capacity)))?;
    let capacity = usize::try_from(capacity)
        .map_err(|_| Error::new(ErrorKind::Other, "--capacity must not be negative"))?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();
    local.block_on(
        &rt,
        async_run(server::Config {
            listen,
            capacity,
            append_dir: args.append_dir,
        }),
    )
}

/// Mirrors this codebase's double-signal shutdown convention: the first
/// SIGINT/SIGTERM drops the shutdown sender, which lets in-flight
/// connections and the listener wind down gracefully; a second one aborts
/// immediately rather than waiting.
async fn async_run(config: server::Config) -> Result<i32, Error> {
    let (shutdown_tx, shutdown_rx) = base::shutdown::channel();
    let mut shutdown_tx = Some(shutdown_tx);
    let mut term = signal(SignalKind::terminate())?;

    tokio::pin! {
        let serving = server::run(config, shutdown_rx);
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT; shutting down gracefully (send again to force)");
            shutdown_tx.take();
        }
        _ = term.recv() => {
            info!("received SIGTERM; shutting down gracefully (send again to force)");
            shutdown_tx.take();
        }
        result = &mut serving => return result.map(|()| 0),
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => Err(Error::new(ErrorKind::Other, "immediate shutdown due to second SIGINT")),
        _ = term.recv() => Err(Error::new(ErrorKind::Other, "immediate shutdown due to second SIGTERM")),
        result = &mut serving => result.map(|()| 0),
    }
}
