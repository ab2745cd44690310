// This file is part of Pond, a log-record broker.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Crate-wide error type.
//!
//! The taxonomy is deliberately small: each [`ErrorKind`] maps to one of the
//! propagation policies a caller needs to pick between (per-query `ERROR`
//! frame vs. tearing down the whole connection).

use std::fmt;
use thiserror::Error as ThisError;

/// The five error kinds a caller needs to distinguish, plus an escape hatch.
#[derive(Copy, Clone, Eq, PartialEq, Debug, ThisError)]
#[non_exhaustive]
pub enum ErrorKind {
    #[error("malformed frame")]
    MalformedFrame,
    /// The datagram parser rejected a record's bytes.
    #[error("malformed record")]
    MalformedRecord,
    /// A command arrived in a state that doesn't accept it (bad command,
    /// duplicate query id, ...).
    #[error("protocol violation")]
    ProtocolViolation,
    /// A socket read or write failed.
    #[error("I/O error")]
    Io,
    /// A payload would not fit in the 16-bit size field.
    #[error("overflow")]
    Overflow,
    /// Anything else.
    #[error("other error")]
    Other,
}

/// The crate-wide error type.
///
/// Carries an [`ErrorKind`] so callers can decide per-query vs. per-connection
/// propagation without downcasting, plus an optional message and source error
/// for diagnostics.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: Option<String>,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Error {
            kind,
            msg: Some(msg.into()),
            source: None,
        }
    }

    pub fn malformed_frame(msg: impl Into<String>) -> Self {
        Error::new(ErrorKind::MalformedFrame, msg)
    }

    pub fn malformed_record(msg: impl Into<String>) -> Self {
        Error::new(ErrorKind::MalformedRecord, msg)
    }

    pub fn protocol_violation(msg: impl Into<String>) -> Self {
        Error::new(ErrorKind::ProtocolViolation, msg)
    }

    pub fn overflow(msg: impl Into<String>) -> Self {
        Error::new(ErrorKind::Overflow, msg)
    }

    /// Returns the kind, for deciding per-query vs. per-connection propagation.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Attaches a source error, for use in a builder-style chain.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Renders this error and its full cause chain, one cause per line.
    /// Intended for CLI/stderr output; log lines should use `tracing`'s
    /// structured fields instead.
    pub fn chain(&self) -> String {
        use std::fmt::Write;
        let mut out = self.to_string();
        let mut cause = self.source.as_deref().map(|e| e as &dyn std::error::Error);
        while let Some(c) = cause {
            write!(&mut out, "\ncaused by: {c}").unwrap();
            cause = c.source();
        }
        out
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.msg {
            Some(m) => write!(f, "{}: {}", self.kind, m),
            None => fmt::Display::fmt(&self.kind, f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as _)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Io,
            msg: None,
            source: Some(Box::new(e)),
        }
    }
}

/// Extension methods for attaching an [`ErrorKind`] to a foreign error,
/// mirroring `ResultExt::err_kind` from the earlier `failure`-based version
/// of this crate.
pub trait ResultExt<T> {
    fn err_kind(self, kind: ErrorKind) -> Result<T, Error>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn err_kind(self, kind: ErrorKind) -> Result<T, Error> {
        self.map_err(|e| Error {
            kind,
            msg: None,
            source: Some(Box::new(e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_message() {
        let e = Error::new(ErrorKind::Io, "");
        assert_eq!(e.kind(), ErrorKind::Io);
    }

    #[test]
    fn chain_includes_source() {
        let io = std::io::Error::other("disk on fire");
        let e: Error = io.into();
        assert!(e.chain().contains("disk on fire"));
    }

    #[test]
    fn protocol_violation_kind() {
        let e = Error::protocol_violation("duplicate id");
        assert_eq!(e.kind(), ErrorKind::ProtocolViolation);
        assert_eq!(e.to_string(), "protocol violation: duplicate id");
    }
}
