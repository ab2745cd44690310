// This file is part of Pond, a log-record broker.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! [`Database`]: the append-only, capacity-bounded ring of [`Record`]s.
//!
//! A `Database` is a cheap `Rc`-backed handle; cloning it shares the same
//! underlying ring. This crate is single-threaded by design — one event
//! loop drives all appends, cursor advancement, and listener notification —
//! so interior mutability is `RefCell`, not a lock.

use crate::parse;
use crate::record::{Id, Record};
use bytes::Bytes;
use jiff::Timestamp;
use std::cell::{Ref, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::num::NonZeroU64;
use std::rc::{Rc, Weak};

/// A sink notified exactly once, synchronously, the next time the database
/// it's registered with appends a record.
///
/// Rather than a stored closure, the thing registered with the database
/// (wrapped in `Rc<RefCell<_>>` so a `Weak` handle can be kept without
/// extending its lifetime) implements this trait directly. In this crate
/// that's `Selection` at the `db` layer, and the owning `Query` one layer
/// up wraps *that*.
pub trait AppendSink {
    /// Called with the just-appended record. Returns whether the sink
    /// accepted it (became positioned on it); the caller uses this to
    /// decide whether to re-register for the next append.
    fn on_append(&mut self, record: &Record) -> bool;
}

/// An opaque handle for [`Database::remove_append_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(usize);

struct Inner {
    capacity: usize,
    records: VecDeque<Record>,
    next_id: u64,
    time_index: BTreeMap<(Timestamp, Id), ()>,
    listeners: slab::Slab<Weak<RefCell<dyn AppendSink>>>,
}

impl Inner {
    fn first_id(&self) -> Option<Id> {
        self.records.front().map(Record::id)
    }

    fn last_id(&self) -> Option<Id> {
        self.records.back().map(Record::id)
    }
}

/// An append-only, capacity-bounded ring of [`Record`]s ordered by id.
///
/// Cheaply cloneable; all clones share the same ring (it's an `Rc` handle,
/// not a deep copy). Ids are strictly increasing in arrival order and the
/// live set is always a contiguous `[min_id, max_id]` interval, so looking
/// up a live id is an O(1) offset into the ring rather than a hash lookup.
#[derive(Clone)]
pub struct Database(Rc<RefCell<Inner>>);

impl Database {
    /// Creates an empty database that evicts its oldest record once more
    /// than `capacity` records have been appended. `capacity` of zero means
    /// every append immediately evicts the record it just inserted.
    pub fn new(capacity: usize) -> Self {
        Database(Rc::new(RefCell::new(Inner {
            capacity,
            records: VecDeque::new(),
            next_id: 0,
            time_index: BTreeMap::new(),
            listeners: slab::Slab::new(),
        })))
    }

    /// Parses `raw` and appends the result, evicting the oldest record if
    /// the database is at capacity. Notifies append listeners, in
    /// registration order, each exactly once, after the mutation is
    /// complete (so a listener's reaction — e.g. re-registering, or reading
    /// the database) never reenters this method's borrow).
    pub fn emplace(&self, raw: impl Into<Bytes>) -> Result<Id, base::Error> {
        let raw = raw.into();
        let parsed =
            parse::parse(&raw).map_err(|e| base::Error::malformed_record(e.to_string()))?;

        let (appended, listeners) = {
            let mut inner = self.0.borrow_mut();
            if inner.capacity == 0 {
                // Degenerate but legal: nothing is ever live.
                inner.next_id += 1;
                let listeners = std::mem::take(&mut inner.listeners);
                let id = NonZeroU64::new(inner.next_id).expect("next_id starts at 1");
                drop(inner);
                let record = Record::new(id, raw, parsed);
                return Ok(notify(record, listeners).id());
            }
            if inner.records.len() >= inner.capacity {
                if let Some(evicted) = inner.records.pop_front() {
                    if let Some(ts) = evicted.parsed().timestamp {
                        inner.time_index.remove(&(ts, evicted.id()));
                    }
                }
            }
            inner.next_id += 1;
            let id = NonZeroU64::new(inner.next_id).expect("next_id starts at 1");
            let record = Record::new(id, raw, parsed);
            if let Some(ts) = record.parsed().timestamp {
                inner.time_index.insert((ts, id), ());
            }
            inner.records.push_back(record);
            let appended_ref = inner.records.back().expect("just pushed");
            let appended = clone_record(appended_ref);
            let listeners = std::mem::take(&mut inner.listeners);
            (appended, listeners)
        };
        Ok(notify(appended, listeners).id())
    }

    pub fn find(&self, id: Id) -> Option<Ref<'_, Record>> {
        let inner = self.0.borrow();
        let min = inner.first_id()?;
        let max = inner.last_id()?;
        if id < min || id > max {
            return None;
        }
        let idx = (id.get() - min.get()) as usize;
        Some(Ref::map(inner, |inner| &inner.records[idx]))
    }

    pub fn first(&self) -> Option<Ref<'_, Record>> {
        let id = self.0.borrow().first_id()?;
        self.find(id)
    }

    pub fn last(&self) -> Option<Ref<'_, Record>> {
        let id = self.0.borrow().last_id()?;
        self.find(id)
    }

    pub fn first_id(&self) -> Option<Id> {
        self.0.borrow().first_id()
    }

    pub fn last_id(&self) -> Option<Id> {
        self.0.borrow().last_id()
    }

    pub fn contains(&self, id: Id) -> bool {
        let inner = self.0.borrow();
        matches!((inner.first_id(), inner.last_id()), (Some(min), Some(max)) if id >= min && id <= max)
    }

    /// The smallest live id strictly greater than `id`, or `None` if there
    /// is none (either the database has nothing live past `id`, or nothing
    /// live at all). Used for both plain advancement (where `id` is always
    /// itself live) and [`crate::LightCursor::fix_deleted`] (where it may
    /// have fallen below `min_id`).
    pub fn next_live_id_after(&self, id: Id) -> Option<Id> {
        let inner = self.0.borrow();
        let min = inner.first_id()?;
        let max = inner.last_id()?;
        if id >= max {
            return None;
        }
        if id < min {
            return Some(min);
        }
        NonZeroU64::new(id.get() + 1)
    }

    /// Returns the id-interval endpoints of records whose timestamp lies in
    /// `[since, until]`, or `(None, None)` if none match. `O(log n)` via the
    /// `(timestamp, id)`-keyed secondary index.
    pub fn time_range(&self, since: Timestamp, until: Timestamp) -> (Option<Id>, Option<Id>) {
        if since > until {
            return (None, None);
        }
        let inner = self.0.borrow();
        let lo = (since, Id::MIN);
        let hi = (until, Id::MAX);
        let first = inner.time_index.range(lo..=hi).next().map(|(&(_, id), ())| id);
        let last = inner
            .time_index
            .range(lo..=hi)
            .next_back()
            .map(|(&(_, id), ())| id);
        (first, last)
    }

    /// Links `sink` into the append broadcast list. Precondition (enforced
    /// by callers, not here): `sink` is not already linked.
    pub fn add_append_listener(&self, sink: Weak<RefCell<dyn AppendSink>>) -> ListenerHandle {
        ListenerHandle(self.0.borrow_mut().listeners.insert(sink))
    }

    /// Unlinks a listener before it fires, e.g. on query cancellation. A
    /// no-op if the handle is stale (already fired, or already removed) —
    /// see the note on [`ListenerHandle`] reuse in the module docs.
    pub fn remove_append_listener(&self, handle: ListenerHandle) {
        self.0.borrow_mut().listeners.try_remove(handle.0);
    }

    pub fn capacity(&self) -> usize {
        self.0.borrow().capacity
    }

    pub fn len(&self) -> usize {
        self.0.borrow().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn clone_record(r: &Record) -> Record {
    Record::new(r.id(), Bytes::copy_from_slice(r.raw()), r.parsed().clone())
}

/// Fires each listener at most once, in registration order, then drops the
/// (now-empty) slab. Listeners that no longer exist (the `Weak` failed to
/// upgrade) are silently skipped — their owner already dropped them.
fn notify(record: Record, listeners: slab::Slab<Weak<RefCell<dyn AppendSink>>>) -> Record {
    for (_, weak) in listeners {
        if let Some(sink) = weak.upgrade() {
            sink.borrow_mut().on_append(&record);
        }
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datagram(site: &str) -> String {
        format!("{site}\thost\tGET\t/\tref\tua\t200\t10\t1\t2024-01-01T00:00:00Z\t127.0.0.1")
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let db = Database::new(10);
        let a = db.emplace(datagram("a")).unwrap();
        let b = db.emplace(datagram("b")).unwrap();
        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 2);
    }

    #[test]
    fn eviction_keeps_contiguous_interval() {
        let db = Database::new(2);
        db.emplace(datagram("a")).unwrap();
        db.emplace(datagram("b")).unwrap();
        db.emplace(datagram("c")).unwrap();
        assert_eq!(db.first_id().unwrap().get(), 2);
        assert_eq!(db.last_id().unwrap().get(), 3);
        assert_eq!(db.len(), 2);
    }

    #[test]
    fn find_missing_returns_none() {
        let db = Database::new(2);
        db.emplace(datagram("a")).unwrap();
        let stale = Id::new(999).unwrap();
        assert!(db.find(stale).is_none());
    }

    #[test]
    fn malformed_record_is_rejected() {
        let db = Database::new(10);
        let err = db.emplace(vec![0xff, 0xfe]).unwrap_err();
        assert_eq!(err.kind(), base::ErrorKind::MalformedRecord);
        assert_eq!(db.len(), 0);
    }

    #[test]
    fn time_range_respects_since_after_until() {
        let db = Database::new(10);
        db.emplace(datagram("a")).unwrap();
        let (first, last) = db.time_range(Timestamp::MAX, Timestamp::MIN);
        assert!(first.is_none() && last.is_none());
    }
}
