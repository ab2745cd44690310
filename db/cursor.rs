// This file is part of Pond, a log-record broker.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! [`LightCursor`] and [`Cursor`]: stateful iteration into a [`Database`]
//! that survives eviction of the record currently pointed at.

use crate::database::Database;
use crate::record::{Id, Record};
use std::cell::Ref;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Position {
    Unpositioned,
    At(Id),
    End,
}

/// A raw, deletion-aware iterator over a [`Database`]. Doesn't survive
/// eviction on its own — that's what the persistent id in [`Cursor`] is
/// for — but advancing it always goes through the id index, never a raw
/// pointer, so a ring wrap never produces a gap or a repeat.
pub struct LightCursor {
    db: Database,
    position: Position,
}

impl LightCursor {
    pub fn new(db: Database) -> Self {
        LightCursor {
            db,
            position: Position::Unpositioned,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn is_positioned(&self) -> bool {
        matches!(self.position, Position::At(_))
    }

    pub fn current_id(&self) -> Option<Id> {
        match self.position {
            Position::At(id) => Some(id),
            _ => None,
        }
    }

    pub fn current(&self) -> Option<Ref<'_, Record>> {
        self.db.find(self.current_id()?)
    }

    /// Positions at the oldest live record, or `End` if the database is
    /// empty.
    pub fn rewind(&mut self) {
        self.position = match self.db.first_id() {
            Some(id) => Position::At(id),
            None => Position::End,
        };
    }

    /// Positions at a specific, assumed-live, record.
    pub fn set_next(&mut self, id: Id) {
        self.position = Position::At(id);
    }

    /// Forces `End` without requiring a live id (used when a time-range
    /// seek comes up empty).
    pub fn set_end(&mut self) {
        self.position = Position::End;
    }

    /// Advances to the next live record by id. Reaches `End` when no
    /// record with a greater id is live.
    pub fn advance(&mut self) {
        let Position::At(id) = self.position else {
            return;
        };
        self.position = match self.db.next_live_id_after(id) {
            Some(next) => Position::At(next),
            None => Position::End,
        };
    }

    /// If the record previously at `last_known` is no longer live,
    /// repositions to the smallest live record with id greater than it
    /// (or `End` if none). Returns whether a repositioning occurred.
    pub fn fix_deleted(&mut self, last_known: Id) -> bool {
        if self.db.contains(last_known) {
            return false;
        }
        self.position = match self.db.next_live_id_after(last_known) {
            Some(id) => Position::At(id),
            None => Position::End,
        };
        true
    }
}

/// [`LightCursor`] plus a persistent `id` that survives eviction of the
/// record it names, and a `linked` bit tracking whether this cursor is
/// conceptually registered as an append listener.
///
/// The actual `Weak` registration with the database is owned one layer up
/// (by whatever wraps a `Selection` in `Rc<RefCell<_>>`), since that's the
/// layer that can hand out a `Weak` to itself; see
/// [`crate::database::AppendSink`]. `linked` here is bookkeeping that lets
/// `Cursor` enforce and expose the "never positioned and linked
/// simultaneously" invariant regardless of where the registration lives.
pub struct Cursor {
    light: LightCursor,
    id: Option<Id>,
    linked: bool,
}

impl Cursor {
    pub fn new(db: Database) -> Self {
        Cursor {
            light: LightCursor::new(db),
            id: None,
            linked: false,
        }
    }

    pub fn db(&self) -> &Database {
        self.light.db()
    }

    pub fn is_positioned(&self) -> bool {
        self.light.is_positioned()
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// The persistent id: equal to the current record's id while
    /// positioned, or the last-known id between records (follow mode).
    /// `None` only if this cursor has never been positioned.
    pub fn id(&self) -> Option<Id> {
        self.id
    }

    pub fn current(&self) -> Option<Ref<'_, Record>> {
        self.light.current()
    }

    fn refresh_id(&mut self) {
        if let Some(id) = self.light.current_id() {
            self.id = Some(id);
        }
    }

    pub fn rewind(&mut self) {
        self.unlink();
        self.light.rewind();
        self.refresh_id();
    }

    pub fn set_next(&mut self, id: Id) {
        self.light.set_next(id);
        self.id = Some(id);
    }

    pub fn set_end(&mut self) {
        self.light.set_end();
    }

    /// Precondition: positioned.
    pub fn advance(&mut self) {
        self.light.advance();
        self.refresh_id();
    }

    /// Delegates to `LightCursor::fix_deleted` using the stored persistent
    /// id; on repositioning, unlinks (an append listener that was evicted
    /// out from under it was never actually following anything live) and
    /// refreshes `id` from the new position.
    pub fn fix_deleted(&mut self) -> bool {
        let Some(last_known) = self.id else {
            return false;
        };
        if self.light.fix_deleted(last_known) {
            self.linked = false;
            self.refresh_id();
            true
        } else {
            false
        }
    }

    /// If not currently positioned and not already linked, marks this
    /// cursor as a listener. Returns whether it actually transitioned (the
    /// caller uses this to decide whether to perform the real `Database`
    /// registration). A no-op (returns `false`) if already linked or
    /// currently positioned — matching the "re-following after drain is
    /// idempotent" property.
    pub fn follow(&mut self) -> bool {
        if self.is_positioned() || self.linked {
            return false;
        }
        self.linked = true;
        true
    }

    /// Clears the linked bit without touching position or id. Called when
    /// the real registration is torn down (cancellation) or consumed (an
    /// append fired).
    pub fn unlink(&mut self) {
        self.linked = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datagram(site: &str) -> String {
        format!("{site}\thost\tGET\t/\tref\tua\t200\t10\t1\t2024-01-01T00:00:00Z\t127.0.0.1")
    }

    #[test]
    fn rewind_on_empty_leaves_unpositioned() {
        let db = Database::new(10);
        let mut c = Cursor::new(db);
        c.rewind();
        assert!(!c.is_positioned());
    }

    #[test]
    fn ring_wrap_advances_with_no_gaps() {
        let db = Database::new(4);
        for site in ["a", "b", "c", "d", "e", "f"] {
            db.emplace(datagram(site)).unwrap();
        }
        // ids 1..6 appended, capacity 4 evicts 1 and 2; live is [3,6].
        let mut c = Cursor::new(db);
        c.set_next(Id::new(3).unwrap());
        let mut seen = vec![];
        while c.is_positioned() {
            seen.push(c.id().unwrap().get());
            c.advance();
        }
        assert_eq!(seen, vec![3, 4, 5, 6]);
    }

    #[test]
    fn fix_deleted_skips_past_eviction() {
        let db = Database::new(2);
        db.emplace(datagram("a")).unwrap();
        db.emplace(datagram("b")).unwrap();
        let mut c = Cursor::new(db.clone());
        c.rewind();
        assert_eq!(c.id().unwrap().get(), 1);
        db.emplace(datagram("c")).unwrap(); // evicts id 1
        db.emplace(datagram("d")).unwrap(); // evicts id 2
        assert!(c.fix_deleted());
        assert_eq!(c.id().unwrap().get(), 3);
    }

    #[test]
    fn fix_deleted_is_noop_when_still_live() {
        let db = Database::new(10);
        db.emplace(datagram("a")).unwrap();
        db.emplace(datagram("b")).unwrap();
        let mut c = Cursor::new(db);
        c.rewind();
        assert!(!c.fix_deleted());
    }

    #[test]
    fn follow_is_idempotent() {
        let db = Database::new(10);
        let mut c = Cursor::new(db);
        assert!(c.follow());
        assert!(!c.follow());
    }

    #[test]
    fn follow_refuses_while_positioned() {
        let db = Database::new(10);
        db.emplace(datagram("a")).unwrap();
        let mut c = Cursor::new(db);
        c.rewind();
        assert!(!c.follow());
    }
}
