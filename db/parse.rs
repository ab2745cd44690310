// This file is part of Pond, a log-record broker.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The datagram wire parser.
//!
//! Out of the core's concern per the design (the core only needs "accepts a
//! byte slice, yields a structured record or a parse error"), but a runnable
//! crate needs *some* concrete parser wired up, so this module picks a plain
//! tab-separated wire datagram and parses it with `nom`, the way
//! [`base::strutil`] parses its own small grammars.
//!
//! Layout, one record per datagram, fields separated by `\t`:
//!
//! ```text
//! site  host  method  uri  referer  user-agent  status  length  duration_ms  timestamp  remote-host
//! ```
//!
//! A field left empty (two adjacent tabs, or end of input) parses as `None`.
//! Trailing fields may be omitted entirely. `status`, `length`, and
//! `duration_ms` must be decimal integers when present; `timestamp` must be
//! RFC 3339 when present. Any other malformed field fails the whole parse.

use crate::record::Parsed;
use jiff::Timestamp;
use nom::bytes::complete::{is_not, tag};
use nom::combinator::{all_consuming, map_res, opt};
use nom::sequence::preceded;
use nom::IResult;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[error("malformed log datagram: {0}")]
pub struct ParseError(pub(crate) String);

fn field(input: &str) -> IResult<&str, Option<&str>> {
    opt(is_not("\t"))(input)
}

fn tab_field<'a>(input: &'a str) -> IResult<&'a str, Option<&'a str>> {
    preceded(opt(tag("\t")), field)(input)
}

fn non_empty(s: Option<&str>) -> Option<Box<str>> {
    s.filter(|s| !s.is_empty()).map(Box::from)
}

fn parse_fields(input: &str) -> IResult<&str, Parsed> {
    let (input, site) = field(input)?;
    let (input, host) = tab_field(input)?;
    let (input, method) = tab_field(input)?;
    let (input, uri) = tab_field(input)?;
    let (input, referer) = tab_field(input)?;
    let (input, user_agent) = tab_field(input)?;
    let (input, status) = preceded(
        opt(tag("\t")),
        opt(map_res(is_not("\t"), |s: &str| s.parse::<u16>())),
    )(input)?;
    let (input, length) = preceded(
        opt(tag("\t")),
        opt(map_res(is_not("\t"), |s: &str| s.parse::<u64>())),
    )(input)?;
    let (input, duration_ms) = preceded(
        opt(tag("\t")),
        opt(map_res(is_not("\t"), |s: &str| s.parse::<u64>())),
    )(input)?;
    let (input, timestamp) = preceded(
        opt(tag("\t")),
        opt(map_res(is_not("\t"), |s: &str| s.parse::<Timestamp>())),
    )(input)?;
    let (input, remote_host) = tab_field(input)?;

    Ok((
        input,
        Parsed {
            site: non_empty(site),
            host: non_empty(host),
            method: non_empty(method),
            uri: non_empty(uri),
            referer: non_empty(referer),
            user_agent: non_empty(user_agent),
            status,
            length,
            duration: duration_ms.map(Duration::from_millis),
            timestamp,
            remote_host: non_empty(remote_host),
        },
    ))
}

/// Parses one datagram into its structured view.
///
/// `raw` must be valid UTF-8; non-UTF-8 input is a parse error, same as any
/// other malformed datagram.
pub fn parse(raw: &[u8]) -> Result<Parsed, ParseError> {
    let text =
        std::str::from_utf8(raw).map_err(|e| ParseError(format!("invalid utf-8: {e}")))?;
    let text = text.trim_end_matches(['\r', '\n']);
    all_consuming(parse_fields)(text)
        .map(|(_, parsed)| parsed)
        .map_err(|e| ParseError(format!("{e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_record() {
        let raw = b"example.com\thost1\tGET\t/index.html\thttp://ref\tMozilla\t200\t1234\t15\t2024-01-02T03:04:05Z\t10.0.0.1";
        let p = parse(raw).unwrap();
        assert_eq!(p.site.as_deref(), Some("example.com"));
        assert_eq!(p.host.as_deref(), Some("host1"));
        assert_eq!(p.method.as_deref(), Some("GET"));
        assert_eq!(p.uri.as_deref(), Some("/index.html"));
        assert_eq!(p.status, Some(200));
        assert_eq!(p.length, Some(1234));
        assert_eq!(p.duration, Some(Duration::from_millis(15)));
        assert!(p.timestamp.is_some());
        assert_eq!(p.remote_host.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn missing_trailing_fields_are_none() {
        let p = parse(b"sitea").unwrap();
        assert_eq!(p.site.as_deref(), Some("sitea"));
        assert_eq!(p.host, None);
        assert_eq!(p.status, None);
        assert_eq!(p.timestamp, None);
    }

    #[test]
    fn empty_fields_are_none() {
        let p = parse(b"\t\t\t\t\t\t\t\t\t\t").unwrap();
        assert_eq!(p.site, None);
        assert_eq!(p.remote_host, None);
    }

    #[test]
    fn bad_status_is_error() {
        assert!(parse(b"sitea\thost\tGET\t/\tref\tua\tnotanumber").is_err());
    }

    #[test]
    fn non_utf8_is_error() {
        assert!(parse(&[0xff, 0xfe]).is_err());
    }
}
