// This file is part of Pond, a log-record broker.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The listener shell: owns the process-wide [`Database`] singleton and the
//! optional per-site append sink, accepts connections, and spawns one local
//! task per connection.
//!
//! Everything below this module is `!Send` (the core runs single-threaded,
//! with no locking), so connections are spawned onto the current task's
//! [`tokio::task::LocalSet`] with [`tokio::task::spawn_local`] rather than
//! [`tokio::spawn`]; the caller (`cmds::serve`) is responsible for running
//! this future inside one.

use crate::connection;
use crate::sitewriter::SiteWriters;
use base::Error;
use db::Database;
use std::cell::RefCell;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::rc::Rc;
use tokio::net::TcpListener;

pub struct Config {
    pub listen: SocketAddr,
    pub capacity: usize,
    pub append_dir: Option<PathBuf>,
}

/// Binds the listener and accepts connections until `shutdown` fires.
/// Returns once shutdown is requested; in-flight connections are left to
/// drain on their own (each also watches `shutdown`, see
/// [`connection::run`]), so this returning doesn't imply they've all closed.
pub async fn run(config: Config, shutdown: base::shutdown::Receiver) -> Result<(), Error> {
    let db = Database::new(config.capacity);
    let site_writer = config
        .append_dir
        .map(|dir| Rc::new(RefCell::new(SiteWriters::new(dir))));
    let listener = TcpListener::bind(config.listen).await?;
    tracing::info!(addr = %config.listen, capacity = config.capacity, "listening");
    notify_systemd_ready();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.as_future() => {
                tracing::info!("shutdown requested, no longer accepting connections");
                return Ok(());
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let db = db.clone();
                        let site_writer = site_writer.clone();
                        let shutdown = shutdown.clone();
                        tokio::task::spawn_local(async move {
                            tracing::debug!(%peer, "connection accepted");
                            if let Err(e) = connection::run(stream, db, site_writer, shutdown).await {
                                tracing::warn!(%peer, err = %e.chain(), "connection error");
                            } else {
                                tracing::debug!(%peer, "connection closed");
                            }
                        });
                    }
                    Err(e) => tracing::warn!(err = %e, "accept failed"),
                }
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn notify_systemd_ready() {
    use libsystemd::daemon::{notify, NotifyState};
    // Best-effort: outside a systemd unit this is a harmless no-op error.
    let _ = notify(false, &[NotifyState::Ready]);
}

#[cfg(not(target_os = "linux"))]
fn notify_systemd_ready() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn logs_listen_address_and_stops_on_shutdown() {
        let (tx, rx) = base::shutdown::channel();
        let config = Config {
            listen: "127.0.0.1:0".parse().unwrap(),
            capacity: 4,
            append_dir: None,
        };
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let handle = tokio::task::spawn_local(run(config, rx));
                tokio::task::yield_now().await;
                drop(tx);
                handle.await.unwrap().unwrap();
            })
            .await;
        assert!(tracing_test::logs_contain("listening"));
    }
}
