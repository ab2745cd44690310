// This file is part of Pond, a log-record broker.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Wire framing: a fixed 6-byte, big-endian header followed by `size` bytes
//! of opaque payload.
//!
//! ```text
//! offset 0  uint16  id
//! offset 2  uint16  command
//! offset 4  uint16  size   (max 65535)
//! ```
//!
//! The numeric command values below are this implementation's choice, not
//! part of the wire contract the way the header layout is; the taxonomy
//! (which commands exist, client→server vs. server→client) is what's fixed.

use base::{Error, ErrorKind};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::{BufMut, BytesMut};
use std::io::Cursor;

pub const HEADER_LEN: usize = 6;
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Command {
    // Server -> client.
    Nop = 0,
    Error = 9,
    LogRecord = 10,
    End = 11,

    // Client -> server.
    Query = 1,
    Commit = 2,
    Cancel = 3,
    FilterSite = 4,
    FilterHost = 5,
    FilterUri = 6,
    Follow = 7,
    InjectLogRecord = 8,
}

impl TryFrom<u16> for Command {
    type Error = Error;

    fn try_from(v: u16) -> Result<Self, Error> {
        Ok(match v {
            0 => Command::Nop,
            1 => Command::Query,
            2 => Command::Commit,
            3 => Command::Cancel,
            4 => Command::FilterSite,
            5 => Command::FilterHost,
            6 => Command::FilterUri,
            7 => Command::Follow,
            8 => Command::InjectLogRecord,
            9 => Command::Error,
            10 => Command::LogRecord,
            11 => Command::End,
            other => {
                return Err(Error::new(
                    ErrorKind::MalformedFrame,
                    format!("unknown command {other}"),
                ))
            }
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub id: u16,
    pub command: Command,
    pub size: u16,
}

impl Header {
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self, Error> {
        let mut c = Cursor::new(&buf[..]);
        let id = c
            .read_u16::<BigEndian>()
            .map_err(|e| Error::malformed_frame(e.to_string()))?;
        let raw_command = c
            .read_u16::<BigEndian>()
            .map_err(|e| Error::malformed_frame(e.to_string()))?;
        let size = c
            .read_u16::<BigEndian>()
            .map_err(|e| Error::malformed_frame(e.to_string()))?;
        Ok(Header {
            id,
            command: Command::try_from(raw_command)?,
            size,
        })
    }
}

/// Appends one complete frame (header + payload) to `out`.
///
/// Fails with `Overflow` if `payload` exceeds [`MAX_PAYLOAD_LEN`].
pub fn encode(out: &mut BytesMut, id: u16, command: Command, payload: &[u8]) -> Result<(), Error> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(Error::overflow(format!(
            "payload of {} bytes exceeds the 16-bit size field",
            payload.len()
        )));
    }
    out.reserve(HEADER_LEN + payload.len());
    out.put_u16(id);
    out.put_u16(command as u16);
    out.put_u16(payload.len() as u16);
    out.put_slice(payload);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header() {
        let mut buf = BytesMut::new();
        encode(&mut buf, 42, Command::LogRecord, b"hello").unwrap();
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&buf[..HEADER_LEN]);
        let h = Header::decode(&header).unwrap();
        assert_eq!(h.id, 42);
        assert_eq!(h.command, Command::LogRecord);
        assert_eq!(h.size, 5);
        assert_eq!(&buf[HEADER_LEN..], b"hello");
    }

    #[test]
    fn unknown_command_is_malformed_frame() {
        let header = [0, 1, 0, 200, 0, 0];
        let err = Header::decode(&header).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedFrame);
    }

    #[test]
    fn oversized_payload_is_overflow() {
        let mut buf = BytesMut::new();
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        let err = encode(&mut buf, 1, Command::LogRecord, &payload).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Overflow);
    }
}
