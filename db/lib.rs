// This file is part of Pond, a log-record broker.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The query engine and subscription core: an append-only, capacity-bounded
//! store of log [`Record`]s, the cursor/selection machinery that lets a
//! query survive eviction mid-scan, and the append-listener mechanism that
//! lets a follow-mode query resume without polling.
//!
//! Single-threaded by design: [`Database`] is an `Rc`-backed handle and the
//! whole module tree is `!Send`. Everything above this crate (the wire
//! protocol, the connection/query state machine, the server shell) lives in
//! the top-level binary crate.

mod cursor;
mod database;
mod filter;
pub mod parse;
mod record;
mod selection;

pub use crate::cursor::{Cursor, LightCursor};
pub use crate::database::{AppendSink, Database, ListenerHandle};
pub use crate::filter::{Filter, StatusMatch, UriMatch};
pub use crate::record::{Id, Parsed, Record};
pub use crate::selection::Selection;
