// This file is part of Pond, a log-record broker.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The thin CLI client: speaks the wire protocol directly over a blocking
//! `std::net::TcpStream`. The core spec treats this as an external
//! collaborator — no event loop, no `Database`, just frames in and out.

use crate::cmds::query::Args;
use crate::frame::{self, Command, Header};
use base::{Error, ErrorKind};
use bytes::BytesMut;
use std::io::{Read, Write};
use std::net::TcpStream;

const QUERY_ID: u16 = 1;
const DEFAULT_PORT: u16 = 5480;

pub fn run(args: Args) -> Result<i32, Error> {
    let addr = resolve(&args.server);
    let mut stream = TcpStream::connect(&addr)?;

    let mut out = BytesMut::new();
    frame::encode(&mut out, QUERY_ID, Command::Query, &[])?;
    for filter in &args.filters {
        let (key, value) = filter.split_once('=').ok_or_else(|| {
            Error::new(
                ErrorKind::Other,
                format!("malformed filter {filter:?}, expected key=value"),
            )
        })?;
        let command = match key {
            "site" => Command::FilterSite,
            "host" => Command::FilterHost,
            "uri" => Command::FilterUri,
            other => {
                return Err(Error::new(
                    ErrorKind::Other,
                    format!("unknown filter key {other:?}"),
                ))
            }
        };
        frame::encode(&mut out, QUERY_ID, command, value.as_bytes())?;
    }
    if args.follow {
        frame::encode(&mut out, QUERY_ID, Command::Follow, &[])?;
    }
    frame::encode(&mut out, QUERY_ID, Command::Commit, &[])?;
    stream.write_all(&out)?;

    loop {
        let mut header = [0u8; frame::HEADER_LEN];
        if read_exact_or_eof(&mut stream, &mut header)? {
            eprintln!("server closed the connection without END");
            return Ok(1);
        }
        let hdr = Header::decode(&header)?;
        let mut payload = vec![0u8; hdr.size as usize];
        stream.read_exact(&mut payload)?;
        match hdr.command {
            Command::LogRecord => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(&payload)?;
                stdout.write_all(b"\n")?;
            }
            Command::Error => {
                eprintln!("server error: {}", String::from_utf8_lossy(&payload));
                return Ok(1);
            }
            Command::End => return Ok(0),
            Command::Nop => {}
            other => {
                eprintln!("unexpected command from server: {other:?}");
                return Ok(1);
            }
        }
    }
}

/// Reads exactly `buf.len()` bytes, or reports a clean EOF (returns `true`)
/// if the peer closed before sending anything at all.
fn read_exact_or_eof(stream: &mut TcpStream, buf: &mut [u8]) -> Result<bool, Error> {
    let mut read = 0;
    while read < buf.len() {
        let n = stream.read(&mut buf[read..])?;
        if n == 0 {
            return if read == 0 {
                Ok(true)
            } else {
                Err(Error::new(ErrorKind::Io, "connection closed mid-frame"))
            };
        }
        read += n;
    }
    Ok(false)
}

/// Appends the default port if `server` doesn't already carry one.
fn resolve(server: &str) -> String {
    let has_port = server
        .rsplit_once(':')
        .is_some_and(|(_, p)| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if has_port {
        server.to_string()
    } else {
        format!("{server}:{DEFAULT_PORT}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_adds_default_port() {
        assert_eq!(resolve("example.com"), "example.com:5480");
        assert_eq!(resolve("example.com:9999"), "example.com:9999");
    }
}
