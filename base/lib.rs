// This file is part of Pond, a log-record broker.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

mod error;
pub mod shutdown;
pub mod strutil;
pub mod sync;
pub mod tracing_setup;

pub use crate::error::{Error, ErrorKind, ResultExt};
pub type Result<T> = std::result::Result<T, Error>;
