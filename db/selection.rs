// This file is part of Pond, a log-record broker.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! [`Selection`]: a [`Cursor`] plus a [`Filter`], transparently skipping
//! records the filter rejects.

use crate::cursor::Cursor;
use crate::database::{AppendSink, Database};
use crate::filter::Filter;
use crate::record::{Id, Record};
use std::cell::Ref;

/// A `Cursor` + `Filter`, optionally bounded by an `end_id` upper bound
/// (set when the filter's time range has a finite `until`). Iterates only
/// records the filter accepts whose id is `<= end_id`, always in ascending
/// id order.
pub struct Selection {
    cursor: Cursor,
    filter: Filter,
    end_id: u64,
}

impl Selection {
    pub fn new(db: Database, filter: Filter) -> Self {
        Selection {
            cursor: Cursor::new(db),
            filter,
            end_id: u64::MAX,
        }
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn is_linked(&self) -> bool {
        self.cursor.is_linked()
    }

    /// Seeds the cursor (via a time-range seek if the filter carries one,
    /// else a plain rewind-to-oldest) and skips forward to the first
    /// matching record, if any.
    pub fn rewind(&mut self) {
        self.cursor.unlink();
        if self.filter.has_time_range() {
            let (first, last) = self
                .cursor
                .db()
                .time_range(self.filter.since(), self.filter.until());
            match (first, last) {
                (Some(first_id), Some(last_id)) => {
                    self.cursor.set_next(first_id);
                    // Only a finite `until` bounds this selection going
                    // forward; a `since`-only filter must stay open to
                    // later-appended matching records, not clamp to
                    // whatever was newest at seek time.
                    self.end_id = if self.filter.has_finite_until() {
                        last_id.get()
                    } else {
                        u64::MAX
                    };
                }
                _ => {
                    self.cursor.set_end();
                    self.end_id = 0;
                    return;
                }
            }
        } else {
            self.cursor.rewind();
            self.end_id = u64::MAX;
        }
        self.skip_mismatches();
    }

    fn skip_mismatches(&mut self) {
        while self.cursor.is_positioned() {
            let accepted = {
                let rec = self.cursor.current().expect("positioned");
                self.filter.accepts(rec.parsed())
            };
            if accepted {
                break;
            }
            self.cursor.advance();
        }
    }

    pub fn advance(&mut self) {
        self.cursor.advance();
        self.skip_mismatches();
    }

    /// Delegates to the cursor; on repositioning, re-runs `skip_mismatches`
    /// since the repaired head may not itself match.
    pub fn fix_deleted(&mut self) -> bool {
        if self.cursor.fix_deleted() {
            self.skip_mismatches();
            true
        } else {
            false
        }
    }

    /// Whether this selection is positioned AND within its `end_id` bound.
    pub fn is_positioned(&self) -> bool {
        self.cursor.is_positioned()
            && self.cursor.id().is_some_and(|id| id.get() <= self.end_id)
    }

    pub fn current(&self) -> Option<Ref<'_, Record>> {
        if !self.is_positioned() {
            return None;
        }
        self.cursor.current()
    }

    pub fn current_id(&self) -> Option<Id> {
        if self.is_positioned() {
            self.cursor.id()
        } else {
            None
        }
    }

    /// Marks this selection as wanting to follow (pure bookkeeping on the
    /// contained cursor; the real `Database` registration is the caller's
    /// job once it knows this returned `true` — see the module docs on
    /// [`AppendSink`]).
    pub fn mark_follow(&mut self) -> bool {
        self.cursor.follow()
    }

    pub fn mark_unlinked(&mut self) {
        self.cursor.unlink();
    }
}

impl AppendSink for Selection {
    fn on_append(&mut self, record: &Record) -> bool {
        // Whatever the outcome, this firing consumes the registration: the
        // real listener slot was already removed by `Database::emplace`
        // before calling us, so the bookkeeping bit must follow suit.
        self.cursor.unlink();
        if self.filter.accepts(record.parsed()) && record.id().get() <= self.end_id {
            self.cursor.set_next(record.id());
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::UriMatch;
    use jiff::Timestamp;

    fn datagram_at(site: &str, ts: &str) -> String {
        format!("{site}\thost\tGET\t/\tref\tua\t200\t10\t1\t{ts}\t127.0.0.1")
    }

    #[test]
    fn basic_history_filters_by_site() {
        let db = Database::new(10);
        db.emplace(datagram_at("a", "2024-01-01T00:00:00Z")).unwrap();
        db.emplace(datagram_at("b", "2024-01-01T00:00:01Z")).unwrap();
        db.emplace(datagram_at("a", "2024-01-01T00:00:02Z")).unwrap();

        let mut sel = Selection::new(db, Filter::new().with_site("a"));
        sel.rewind();
        let mut ids = vec![];
        while let Some(id) = sel.current_id() {
            ids.push(id.get());
            sel.advance();
        }
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn time_range_seek_bounds_end_id() {
        let db = Database::new(10);
        db.emplace(datagram_at("a", "2024-01-01T00:00:00Z")).unwrap();
        db.emplace(datagram_at("a", "2024-01-01T00:00:01Z")).unwrap();
        db.emplace(datagram_at("a", "2024-01-01T00:00:02Z")).unwrap();
        db.emplace(datagram_at("a", "2024-01-01T00:00:03Z")).unwrap();

        let since = "2024-01-01T00:00:01Z".parse::<Timestamp>().unwrap();
        let until = "2024-01-01T00:00:02Z".parse::<Timestamp>().unwrap();
        let mut sel = Selection::new(db, Filter::new().with_time_range(Some(since), Some(until)));
        sel.rewind();
        let mut ids = vec![];
        while let Some(id) = sel.current_id() {
            ids.push(id.get());
            sel.advance();
        }
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn empty_time_range_yields_empty_selection() {
        let db = Database::new(10);
        db.emplace(datagram_at("a", "2024-01-01T00:00:00Z")).unwrap();
        let since = "2024-01-01T00:00:01Z".parse::<Timestamp>().unwrap();
        let until = "2024-01-01T00:00:02Z".parse::<Timestamp>().unwrap();
        let mut sel = Selection::new(db, Filter::new().with_time_range(Some(since), Some(until)));
        sel.rewind();
        assert!(sel.current_id().is_none());
    }

    #[test]
    fn since_only_filter_stays_open_to_later_appends() {
        let db = Database::new(10);
        db.emplace(datagram_at("a", "2024-01-01T00:00:00Z")).unwrap();

        let since = "2024-01-01T00:00:00Z".parse::<Timestamp>().unwrap();
        let mut sel = Selection::new(db.clone(), Filter::new().with_time_range(Some(since), None));
        sel.rewind();
        assert_eq!(sel.current_id().unwrap().get(), 1);
        sel.advance();
        assert!(sel.current_id().is_none());

        let id = db.emplace(datagram_at("a", "2024-01-01T00:00:01Z")).unwrap();
        let record = db.find(id).unwrap();
        assert!(sel.on_append(&record));
        drop(record);
        assert_eq!(sel.current_id().unwrap(), id);
    }

    #[test]
    fn eviction_race_skips_stale_but_not_live() {
        let db = Database::new(2);
        db.emplace(datagram_at("a", "2024-01-01T00:00:00Z")).unwrap();
        db.emplace(datagram_at("a", "2024-01-01T00:00:01Z")).unwrap();

        let mut sel = Selection::new(db.clone(), Filter::new());
        sel.rewind();
        assert_eq!(sel.current_id().unwrap().get(), 1);

        db.emplace(datagram_at("a", "2024-01-01T00:00:02Z")).unwrap(); // evicts 1
        db.emplace(datagram_at("a", "2024-01-01T00:00:03Z")).unwrap(); // evicts 2

        assert!(sel.fix_deleted());
        let mut ids = vec![sel.current_id().unwrap().get()];
        sel.advance();
        while let Some(id) = sel.current_id() {
            ids.push(id.get());
            sel.advance();
        }
        assert_eq!(ids, vec![3, 4]);
    }

    #[test]
    fn follow_then_append_delivers_exactly_one_match() {
        let db = Database::new(10);
        let mut sel = Selection::new(db.clone(), Filter::new().with_uri(UriMatch::Prefix("/".into())));
        sel.rewind();
        assert!(sel.current_id().is_none());
        assert!(sel.mark_follow());
        assert!(!sel.mark_follow());

        let id = db.emplace(datagram_at("x", "2024-01-01T00:00:00Z")).unwrap();
        let record = db.find(id).unwrap();
        assert!(sel.on_append(&record));
        drop(record);
        assert_eq!(sel.current_id().unwrap(), id);
        assert!(!sel.is_linked());
    }
}
