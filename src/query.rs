// This file is part of Pond, a log-record broker.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! [`Query`]: the per-id protocol state machine layered on top of
//! [`db::Selection`] — building, streaming, following, ended.
//!
//! This is the layer the `db` crate's [`db::Cursor`] docs point to as "one
//! layer up": a `Query` is the thing actually wrapped in `Rc<RefCell<_>>`
//! and handed to [`db::Database::add_append_listener`] as a `Weak`, because
//! only the `Rc` owner can produce a `Weak` to itself.

use crate::connection::push_frame;
use crate::frame::{self, Command};
use bytes::BytesMut;
use db::{Filter, Selection, UriMatch};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tokio::sync::Notify;

enum QueryState {
    Building { filter: Filter, follow: bool },
    Streaming { selection: Selection, follow: bool },
    Following { selection: Selection, handle: db::ListenerHandle },
    Ended,
}

/// What [`Query::next_streaming_record`] found.
pub enum StreamStep {
    /// A matching record, ready to send as a `LOG_RECORD` frame.
    Record(Vec<u8>),
    /// The selection is exhausted and this query asked to follow: the
    /// caller should call [`Query::begin_following`].
    Follow,
    /// The selection is exhausted and this query did not ask to follow:
    /// the caller should send `END` and drop the query.
    Done,
    /// Not in the streaming state; nothing to do.
    NotStreaming,
}

pub struct Query {
    id: u16,
    db: db::Database,
    outbox: Rc<RefCell<BytesMut>>,
    notify: Rc<Notify>,
    self_weak: Weak<RefCell<Query>>,
    state: QueryState,
}

impl Query {
    /// Creates a query in the *building* state and returns it already
    /// wrapped in the `Rc<RefCell<_>>` every other method assumes — the
    /// constructor needs that handle itself, to stash a `Weak` back-pointer
    /// for the follow-mode re-registration dance (see [`Query::link`]).
    pub fn new(id: u16, db: db::Database, outbox: Rc<RefCell<BytesMut>>, notify: Rc<Notify>) -> Rc<RefCell<Query>> {
        let q = Rc::new(RefCell::new(Query {
            id,
            db,
            outbox,
            notify,
            self_weak: Weak::new(),
            state: QueryState::Building {
                filter: Filter::new(),
                follow: false,
            },
        }));
        q.borrow_mut().self_weak = Rc::downgrade(&q);
        q
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.state, QueryState::Streaming { .. })
    }

    fn with_building_filter(&mut self, mutate: impl FnOnce(&mut Filter)) -> Result<(), base::Error> {
        match &mut self.state {
            QueryState::Building { filter, .. } => {
                mutate(filter);
                Ok(())
            }
            _ => Err(base::Error::protocol_violation(
                "filter command outside the building state",
            )),
        }
    }

    pub fn filter_site(&mut self, value: &str) -> Result<(), base::Error> {
        self.with_building_filter(|f| f.set_site(value))
    }

    pub fn filter_host(&mut self, value: &str) -> Result<(), base::Error> {
        self.with_building_filter(|f| f.set_host(value))
    }

    /// `FILTER_URI` matches by substring; the wire taxonomy doesn't
    /// distinguish substring from prefix matching, so this is the plain
    /// default.
    pub fn filter_uri(&mut self, value: &str) -> Result<(), base::Error> {
        self.with_building_filter(|f| f.set_uri(UriMatch::Substring(value.to_string())))
    }

    pub fn set_follow(&mut self) -> Result<(), base::Error> {
        match &mut self.state {
            QueryState::Building { follow, .. } => {
                *follow = true;
                Ok(())
            }
            _ => Err(base::Error::protocol_violation(
                "FOLLOW outside the building state",
            )),
        }
    }

    pub fn commit(&mut self) -> Result<(), base::Error> {
        let (filter, follow) = match &self.state {
            QueryState::Building { filter, follow } => (filter.clone(), *follow),
            _ => {
                return Err(base::Error::protocol_violation(
                    "COMMIT outside the building state",
                ))
            }
        };
        let mut selection = Selection::new(self.db.clone(), filter);
        selection.rewind();
        self.state = QueryState::Streaming { selection, follow };
        Ok(())
    }

    /// Pulls the next matching record out of a streaming selection,
    /// repairing eviction races via `fix_deleted` along the way. Leaves the
    /// query in the streaming state either way; the transition out of it
    /// (to following or ended) is the caller's job once it sees
    /// [`StreamStep::Follow`] or [`StreamStep::Done`].
    pub fn next_streaming_record(&mut self) -> StreamStep {
        let QueryState::Streaming { selection, follow } = &mut self.state else {
            return StreamStep::NotStreaming;
        };
        if !selection.is_positioned() {
            selection.fix_deleted();
        }
        if let Some(rec) = selection.current() {
            let raw = rec.raw().to_vec();
            drop(rec);
            selection.advance();
            return StreamStep::Record(raw);
        }
        if *follow {
            StreamStep::Follow
        } else {
            StreamStep::Done
        }
    }

    /// Transitions a drained, follow-requested streaming query into
    /// following: registers this query itself as the database's append
    /// listener.
    pub fn begin_following(&mut self) {
        let selection = match std::mem::replace(&mut self.state, QueryState::Ended) {
            QueryState::Streaming { selection, follow: true } => selection,
            other => {
                self.state = other;
                return;
            }
        };
        self.link(selection);
    }

    /// Registers `selection` (already positioned at "nothing yet") as an
    /// append listener under a freshly obtained `Weak` to this query.
    fn link(&mut self, selection: Selection) {
        let Some(strong) = self.self_weak.upgrade() else {
            return;
        };
        let sink: Rc<RefCell<dyn db::AppendSink>> = strong;
        let handle = self.db.add_append_listener(Rc::downgrade(&sink));
        self.state = QueryState::Following { selection, handle };
    }

    /// Unlinks (if following) and ends the query. Idempotent.
    pub fn cancel(&mut self) {
        if let QueryState::Following { handle, .. } = &self.state {
            self.db.remove_append_listener(*handle);
        }
        self.state = QueryState::Ended;
    }

    fn enqueue(&self, command: Command, payload: &[u8]) -> Result<(), base::Error> {
        push_frame(&self.outbox, &self.notify, self.id, command, payload)
    }

    /// Whether this connection's shared outbox is already at or past the
    /// backpressure mark. Checked from [`Query::on_append`], which can fire
    /// synchronously from a different connection's task mid-`emplace`, so it
    /// must not keep feeding this connection's outbox past the mark just
    /// because its own task isn't currently running to drain it.
    fn outbox_full(&self) -> bool {
        self.outbox.borrow().len() >= crate::connection::HIGH_WATER_MARK
    }
}

impl db::AppendSink for Query {
    /// Fires once, synchronously, the next time the database appends a
    /// record while this query is following. Whatever the outcome, the
    /// registration that led here was already consumed by the database
    /// (see `db::Database::emplace`'s notify pass), so this always ends by
    /// either re-registering (still following), holding (outbox is past the
    /// backpressure mark: stay positioned on the match, drop back to
    /// streaming so the owning connection's drain loop picks it up once it
    /// makes progress), or leaving the query ended (cancelled out from under
    /// the firing, which `cancel` already handled by clearing the handle —
    /// `link` simply finds no query left to arm).
    fn on_append(&mut self, record: &db::Record) -> bool {
        let matched = match &mut self.state {
            QueryState::Following { selection, .. } => selection.on_append(record),
            _ => return false,
        };
        if matched && self.outbox_full() {
            // Held: the matching record stays put in the selection's
            // cursor. Fall back to streaming instead of re-linking, so a
            // fast producer can't keep growing this connection's outbox
            // while its task is parked elsewhere.
            if let QueryState::Following { selection, .. } =
                std::mem::replace(&mut self.state, QueryState::Ended)
            {
                self.state = QueryState::Streaming { selection, follow: true };
            }
            return matched;
        }
        if matched {
            let _ = self.enqueue(Command::LogRecord, record.raw());
        }
        let selection = match std::mem::replace(&mut self.state, QueryState::Ended) {
            QueryState::Following { selection, .. } => selection,
            other => {
                self.state = other;
                return matched;
            }
        };
        self.link(selection);
        matched
    }
}
