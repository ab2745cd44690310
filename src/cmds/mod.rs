// This file is part of Pond, a log-record broker.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The two subcommands this binary exposes: `serve` (the broker itself)
//! and `query` (the thin CLI client). See each module's `Args` docstring
//! for its usage.

pub mod query;
pub mod serve;
