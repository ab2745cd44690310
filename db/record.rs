// This file is part of Pond, a log-record broker.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! [`Record`]: the immutable value the rest of the crate indexes, filters,
//! and streams. Ownership follows the data model: the [`crate::Database`]
//! is the only thing that creates or drops a `Record`; everyone else holds
//! it by shared reference for as long as it's live, or remembers its `id`
//! across eviction (see [`crate::Cursor::fix_deleted`]).

use bytes::Bytes;
use jiff::Timestamp;
use std::num::NonZeroU64;
use std::time::Duration;

/// A monotonically assigned record id. Never zero, never reused.
pub type Id = NonZeroU64;

/// The fields an access-log datagram parses into. Every field is optional:
/// a datagram that's missing (or can't parse) a given field simply leaves
/// it `None`, and [`crate::Filter`] treats an absent field as a non-match
/// for any filter that inspects it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parsed {
    pub site: Option<Box<str>>,
    pub host: Option<Box<str>>,
    pub method: Option<Box<str>>,
    pub uri: Option<Box<str>>,
    pub referer: Option<Box<str>>,
    pub user_agent: Option<Box<str>>,
    pub status: Option<u16>,
    pub length: Option<u64>,
    pub duration: Option<Duration>,
    pub timestamp: Option<Timestamp>,
    pub remote_host: Option<Box<str>>,
}

/// An immutable parsed + raw log datagram with an assigned id.
///
/// Created by [`crate::Database::emplace`]; destroyed only when the
/// database evicts it to make room for a new one. No other component owns
/// a `Record` — external holders keep a [`crate::Cursor`], which survives
/// eviction of the record it currently points at.
#[derive(Debug)]
pub struct Record {
    id: Id,
    raw: Bytes,
    parsed: Parsed,
}

impl Record {
    pub(crate) fn new(id: Id, raw: Bytes, parsed: Parsed) -> Self {
        Record { id, raw, parsed }
    }

    #[inline]
    pub fn id(&self) -> Id {
        self.id
    }

    /// The raw datagram bytes, exactly as `emplace` received them. Opaque
    /// to everything in this crate except the parser that produced `parsed`.
    #[inline]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    #[inline]
    pub fn parsed(&self) -> &Parsed {
        &self.parsed
    }
}
