// This file is part of Pond, a log-record broker.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Per-connection state: the in-flight query table, the shared outbound
//! frame buffer, and the read/drain loop that ties them together.
//!
//! One [`Connection`] runs entirely on the task that accepted it; nothing
//! here is `Send`. The one thing shared beyond this task is each [`Query`]
//! registered as a follow-mode append listener — those can fire from
//! whichever connection's task happens to be running `Database::emplace`,
//! which is why the outbox and its wake signal are `Rc`-shared rather than
//! owned outright.

use crate::frame::{self, Command, Header};
use crate::query::{Query, StreamStep};
use crate::sitewriter::SiteWriters;
use base::{Error, ErrorKind};
use bytes::{Bytes, BytesMut};
use db::Database;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;

/// Frames stop draining into the outbox once it holds this many bytes,
/// until a socket write shrinks it back down. Keeps a slow reader from
/// growing server memory without bound while a fast producer (or a large
/// historical backlog) keeps feeding matching records in.
///
/// Shared with [`crate::query::Query::on_append`]: a follow-mode listener
/// fires synchronously from whichever connection's task happens to be
/// running `Database::emplace`, so it has to observe the same mark to avoid
/// growing this connection's outbox past it while its own task is parked.
pub(crate) const HIGH_WATER_MARK: usize = 256 * 1024;

/// The three kinds that tear down the whole connection; everything else is
/// reported back as a per-query `ERROR` frame and the connection stays up.
fn is_connection_fatal(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::MalformedFrame | ErrorKind::Io | ErrorKind::Overflow)
}

/// Encodes one frame into `outbox` and wakes whatever's waiting to drain
/// it. Shared by [`Connection`] (its own `ERROR`/`END`/history frames) and
/// [`Query`] (live `LOG_RECORD` frames delivered via the append listener).
pub(crate) fn push_frame(
    outbox: &Rc<RefCell<BytesMut>>,
    notify: &Notify,
    id: u16,
    command: Command,
    payload: &[u8],
) -> Result<(), Error> {
    frame::encode(&mut outbox.borrow_mut(), id, command, payload)?;
    notify.notify_one();
    Ok(())
}

struct Connection {
    db: Database,
    site_writer: Option<Rc<RefCell<SiteWriters>>>,
    queries: HashMap<u16, Rc<RefCell<Query>>>,
    outbox: Rc<RefCell<BytesMut>>,
    notify: Rc<Notify>,
}

impl Connection {
    fn new(db: Database, site_writer: Option<Rc<RefCell<SiteWriters>>>) -> Self {
        Connection {
            db,
            site_writer,
            queries: HashMap::new(),
            outbox: Rc::new(RefCell::new(BytesMut::new())),
            notify: Rc::new(Notify::new()),
        }
    }

    fn outbox_len(&self) -> usize {
        self.outbox.borrow().len()
    }

    fn enqueue(&self, id: u16, command: Command, payload: &[u8]) -> Result<(), Error> {
        push_frame(&self.outbox, &self.notify, id, command, payload)
    }

    /// Drains one streaming query until it blocks (empty selection, not
    /// following), transitions (selection empty, following), finishes
    /// (selection empty, not following: sends `END`), or the outbox fills.
    fn drain_one(&mut self, id: u16) -> Result<(), Error> {
        let Some(q) = self.queries.get(&id).cloned() else {
            return Ok(());
        };
        loop {
            if self.outbox_len() >= HIGH_WATER_MARK {
                return Ok(());
            }
            let step = q.borrow_mut().next_streaming_record();
            match step {
                StreamStep::Record(raw) => self.enqueue(id, Command::LogRecord, &raw)?,
                StreamStep::Follow => {
                    q.borrow_mut().begin_following();
                    return Ok(());
                }
                StreamStep::Done => {
                    self.enqueue(id, Command::End, &[])?;
                    self.queries.remove(&id);
                    return Ok(());
                }
                StreamStep::NotStreaming => return Ok(()),
            }
        }
    }

    /// One round of fairness across every currently-streaming query: each
    /// gets a turn before any gets a second, bounded overall by the
    /// high-water mark.
    fn drain_streaming(&mut self) -> Result<(), Error> {
        let ids: Vec<u16> = self
            .queries
            .iter()
            .filter(|(_, q)| q.borrow().is_streaming())
            .map(|(&id, _)| id)
            .collect();
        for id in ids {
            if self.outbox_len() >= HIGH_WATER_MARK {
                break;
            }
            self.drain_one(id)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, hdr: Header, payload: &[u8]) -> Result<(), Error> {
        match hdr.command {
            Command::Query => self.cmd_query(hdr.id),
            Command::FilterSite => self.cmd_filter(hdr.id, payload, Query::filter_site),
            Command::FilterHost => self.cmd_filter(hdr.id, payload, Query::filter_host),
            Command::FilterUri => self.cmd_filter(hdr.id, payload, Query::filter_uri),
            Command::Follow => self.cmd_follow(hdr.id),
            Command::Commit => self.cmd_commit(hdr.id),
            Command::Cancel => self.cmd_cancel(hdr.id),
            Command::InjectLogRecord => self.cmd_inject(hdr.id, payload),
            Command::Nop | Command::Error | Command::LogRecord | Command::End => Err(
                Error::protocol_violation(format!("{:?} is a server-to-client command", hdr.command)),
            ),
        }
    }

    fn cmd_query(&mut self, id: u16) -> Result<(), Error> {
        if self.queries.contains_key(&id) {
            return Err(Error::protocol_violation("duplicate id"));
        }
        self.queries.insert(
            id,
            Query::new(id, self.db.clone(), self.outbox.clone(), self.notify.clone()),
        );
        Ok(())
    }

    fn cmd_filter(
        &mut self,
        id: u16,
        payload: &[u8],
        apply: impl FnOnce(&mut Query, &str) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let q = self
            .queries
            .get(&id)
            .ok_or_else(|| Error::protocol_violation("unknown query id"))?;
        let value = std::str::from_utf8(payload)
            .map_err(|e| Error::new(ErrorKind::Other, format!("invalid utf-8 filter value: {e}")))?;
        apply(&mut q.borrow_mut(), value)
    }

    fn cmd_follow(&mut self, id: u16) -> Result<(), Error> {
        let q = self
            .queries
            .get(&id)
            .ok_or_else(|| Error::protocol_violation("unknown query id"))?;
        q.borrow_mut().set_follow()
    }

    fn cmd_commit(&mut self, id: u16) -> Result<(), Error> {
        let q = self
            .queries
            .get(&id)
            .ok_or_else(|| Error::protocol_violation("unknown query id"))?;
        q.borrow_mut().commit()?;
        self.drain_one(id)
    }

    fn cmd_cancel(&mut self, id: u16) -> Result<(), Error> {
        if let Some(q) = self.queries.remove(&id) {
            q.borrow_mut().cancel();
            self.enqueue(id, Command::End, &[])?;
        }
        Ok(())
    }

    fn cmd_inject(&mut self, id: u16, payload: &[u8]) -> Result<(), Error> {
        let rid = self.db.emplace(Bytes::copy_from_slice(payload))?;
        if let Some(writer) = &self.site_writer {
            if let Some(rec) = self.db.find(rid) {
                let parsed = rec.parsed().clone();
                let raw = rec.raw().to_vec();
                drop(rec);
                if let Err(e) = writer.borrow_mut().append(&parsed, &raw) {
                    tracing::warn!(err = %e, site = ?parsed.site, "per-site append failed");
                }
            }
        }
        Ok(())
    }

    /// Runs one frame to completion. Connection-fatal errors propagate to
    /// the caller (which tears the connection down); everything else is
    /// reported back as an `ERROR` frame under the offending id and the
    /// connection stays up.
    fn handle_frame(&mut self, hdr: Header, payload: Vec<u8>) -> Result<(), Error> {
        match self.dispatch(hdr, &payload) {
            Ok(()) => Ok(()),
            Err(e) if is_connection_fatal(e.kind()) => Err(e),
            Err(e) => {
                self.enqueue(hdr.id, Command::Error, e.to_string().as_bytes())?;
                Ok(())
            }
        }
    }
}

/// Drives one accepted connection to completion: reads commands, drains
/// matching history and live follows into the shared outbox, and flushes
/// the outbox back out to the socket. Returns once the peer disconnects, a
/// connection-fatal error occurs, or `shutdown` fires.
///
/// This module is the "Connection / Query state machine" of the broker:
/// each connection owns a table of queries keyed by client-chosen id, each
/// independently building, streaming, or following.
pub async fn run(
    stream: TcpStream,
    db: Database,
    site_writer: Option<Rc<RefCell<SiteWriters>>>,
    shutdown: base::shutdown::Receiver,
) -> Result<(), Error> {
    let _ = stream.set_nodelay(true);
    let (mut rd, mut wr) = stream.into_split();
    let mut conn = Connection::new(db, site_writer);
    let mut pending = BytesMut::new();

    loop {
        conn.drain_streaming()?;
        {
            let mut out = conn.outbox.borrow_mut();
            if !out.is_empty() {
                pending.unsplit(std::mem::take(&mut *out));
            }
        }
        if !pending.is_empty() {
            wr.write_all(&pending).await?;
            pending.clear();
            continue;
        }

        let mut header = [0u8; frame::HEADER_LEN];
        tokio::select! {
            biased;
            _ = shutdown.as_future() => return Ok(()),
            res = rd.read_exact(&mut header) => {
                match res {
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                    Err(e) => return Err(e.into()),
                }
                let hdr = Header::decode(&header)?;
                let mut payload = vec![0u8; hdr.size as usize];
                rd.read_exact(&mut payload).await?;
                conn.handle_frame(hdr, payload)?;
            }
            _ = conn.notify.notified() => {}
        }
    }
}

/// End-to-end tests over a real socket: a `TcpListener` accepting exactly
/// one connection via [`run`], driven by a raw `TcpStream` client that
/// speaks [`frame::encode`]/[`Header::decode`] directly. Everything here is
/// `!Send`, so each test drives its own `LocalSet`.
#[cfg(test)]
mod tests {
    use super::*;
    use db::Database;
    use tokio::net::TcpListener;

    fn datagram(site: &str) -> String {
        format!("{site}\thost\tGET\t/\tref\tua\t200\t10\t1\t2024-01-01T00:00:00Z\t127.0.0.1")
    }

    async fn send(stream: &mut TcpStream, id: u16, command: Command, payload: &[u8]) {
        let mut buf = BytesMut::new();
        frame::encode(&mut buf, id, command, payload).unwrap();
        stream.write_all(&buf).await.unwrap();
    }

    async fn recv(stream: &mut TcpStream) -> (Header, Vec<u8>) {
        let mut header = [0u8; frame::HEADER_LEN];
        stream.read_exact(&mut header).await.unwrap();
        let hdr = Header::decode(&header).unwrap();
        let mut payload = vec![0u8; hdr.size as usize];
        stream.read_exact(&mut payload).await.unwrap();
        (hdr, payload)
    }

    /// Starts a listener backed by a fresh `Database` of `capacity`, accepts
    /// one connection, and returns the client-side stream plus the join
    /// handle for the connection task (so callers can shut it down and
    /// observe a clean exit).
    async fn start(capacity: usize) -> (TcpStream, tokio::task::JoinHandle<Result<(), Error>>, base::shutdown::Sender) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let db = Database::new(capacity);
        let (shutdown_tx, shutdown_rx) = base::shutdown::channel();
        let handle = tokio::task::spawn_local(async move {
            let (stream, _) = listener.accept().await.unwrap();
            run(stream, db, None, shutdown_rx).await
        });
        let client = TcpStream::connect(addr).await.unwrap();
        (client, handle, shutdown_tx)
    }

    #[tokio::test]
    async fn basic_history_is_filtered_and_ends() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let (mut client, handle, shutdown) = start(100).await;

                for site in ["a", "b", "a"] {
                    send(&mut client, 0, Command::InjectLogRecord, datagram(site).as_bytes()).await;
                }
                send(&mut client, 1, Command::Query, &[]).await;
                send(&mut client, 1, Command::FilterSite, b"a").await;
                send(&mut client, 1, Command::Commit, &[]).await;

                let (hdr, payload) = recv(&mut client).await;
                assert_eq!(hdr.command, Command::LogRecord);
                assert!(std::str::from_utf8(&payload).unwrap().starts_with("a\t"));

                let (hdr, payload) = recv(&mut client).await;
                assert_eq!(hdr.command, Command::LogRecord);
                assert!(std::str::from_utf8(&payload).unwrap().starts_with("a\t"));

                let (hdr, _) = recv(&mut client).await;
                assert_eq!(hdr.command, Command::End);

                drop(client);
                drop(shutdown);
                handle.await.unwrap().unwrap();
            })
            .await;
    }

    #[tokio::test]
    async fn follow_delivers_only_newly_matching_records() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let (mut client, handle, shutdown) = start(100).await;

                send(&mut client, 0, Command::InjectLogRecord, datagram("x").as_bytes()).await;
                send(&mut client, 7, Command::Query, &[]).await;
                send(&mut client, 7, Command::FilterSite, b"x").await;
                send(&mut client, 7, Command::Follow, &[]).await;
                send(&mut client, 7, Command::Commit, &[]).await;

                let (hdr, payload) = recv(&mut client).await;
                assert_eq!(hdr.command, Command::LogRecord);
                assert!(std::str::from_utf8(&payload).unwrap().starts_with("x\t"));

                send(&mut client, 0, Command::InjectLogRecord, datagram("y").as_bytes()).await;
                send(&mut client, 0, Command::InjectLogRecord, datagram("x").as_bytes()).await;

                let (hdr, payload) = recv(&mut client).await;
                assert_eq!(hdr.command, Command::LogRecord);
                assert!(std::str::from_utf8(&payload).unwrap().starts_with("x\t"));

                send(&mut client, 7, Command::Cancel, &[]).await;
                let (hdr, _) = recv(&mut client).await;
                assert_eq!(hdr.command, Command::End);

                drop(client);
                drop(shutdown);
                handle.await.unwrap().unwrap();
            })
            .await;
    }

    #[tokio::test]
    async fn duplicate_query_id_errors_without_disturbing_the_first() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let (mut client, handle, shutdown) = start(100).await;

                send(&mut client, 5, Command::Query, &[]).await;
                send(&mut client, 5, Command::Query, &[]).await;
                let (hdr, payload) = recv(&mut client).await;
                assert_eq!(hdr.command, Command::Error);
                assert!(std::str::from_utf8(&payload).unwrap().contains("duplicate"));

                send(&mut client, 5, Command::Commit, &[]).await;
                let (hdr, _) = recv(&mut client).await;
                assert_eq!(hdr.command, Command::End);

                drop(client);
                drop(shutdown);
                handle.await.unwrap().unwrap();
            })
            .await;
    }
}
