// This file is part of Pond, a log-record broker.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! [`Filter`]: a pure predicate over a [`Parsed`] record. No I/O, no
//! allocation beyond what building the filter itself required.

use crate::record::Parsed;
use jiff::Timestamp;

/// HTTP status match: either an exact code or a class (`2` meaning "2xx").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMatch {
    Exact(u16),
    /// First digit of the three-digit status code, 1..=5.
    Class(u8),
}

impl StatusMatch {
    fn matches(self, status: u16) -> bool {
        match self {
            StatusMatch::Exact(want) => status == want,
            StatusMatch::Class(class) => status / 100 == u16::from(class),
        }
    }
}

/// URI match: substring search or prefix match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UriMatch {
    Substring(String),
    Prefix(String),
}

impl UriMatch {
    fn matches(&self, uri: &str) -> bool {
        match self {
            UriMatch::Substring(s) => uri.contains(s.as_str()),
            UriMatch::Prefix(s) => uri.starts_with(s.as_str()),
        }
    }
}

/// A predicate over a [`Parsed`] record: site (exact), host (exact), URI
/// substring/prefix, HTTP status class or exact value, and a time range.
///
/// Every field defaults to "matches everything". `since`/`until` default to
/// [`Timestamp::MIN`]/[`Timestamp::MAX`], i.e. the representable min/max
/// timepoints, matching the data model's description of the open ends.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    site: Option<Box<str>>,
    host: Option<Box<str>>,
    uri: Option<UriMatch>,
    status: Option<StatusMatch>,
    since: Option<Timestamp>,
    until: Option<Timestamp>,
}

impl Filter {
    pub fn new() -> Self {
        Filter::default()
    }

    pub fn with_site(mut self, site: impl Into<Box<str>>) -> Self {
        self.site = Some(site.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<Box<str>>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_uri(mut self, uri: UriMatch) -> Self {
        self.uri = Some(uri);
        self
    }

    pub fn with_status(mut self, status: StatusMatch) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_time_range(mut self, since: Option<Timestamp>, until: Option<Timestamp>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    pub fn set_site(&mut self, site: impl Into<Box<str>>) {
        self.site = Some(site.into());
    }

    pub fn set_host(&mut self, host: impl Into<Box<str>>) {
        self.host = Some(host.into());
    }

    pub fn set_uri(&mut self, uri: UriMatch) {
        self.uri = Some(uri);
    }

    pub fn set_status(&mut self, status: StatusMatch) {
        self.status = Some(status);
    }

    /// The effective lower time bound: `since` if set, else the
    /// representable minimum.
    pub fn since(&self) -> Timestamp {
        self.since.unwrap_or(Timestamp::MIN)
    }

    /// The effective upper time bound: `until` if set, else the
    /// representable maximum.
    pub fn until(&self) -> Timestamp {
        self.until.unwrap_or(Timestamp::MAX)
    }

    /// Whether this filter carries a non-default time range (used by
    /// [`crate::Selection::rewind`] to decide whether a time-range seek is
    /// worthwhile versus a plain rewind-to-oldest).
    pub fn has_time_range(&self) -> bool {
        self.since.is_some() || self.until.is_some()
    }

    /// Whether `until` was explicitly set, as opposed to defaulting to the
    /// representable maximum. A `since`-only filter has no finite upper
    /// bound: [`crate::Selection::rewind`] must not clamp `end_id` to
    /// whatever happens to be the newest matching record at seek time, or a
    /// later-appended matching record would be rejected by its own
    /// `end_id` bound.
    pub fn has_finite_until(&self) -> bool {
        self.until.is_some()
    }

    pub fn accepts(&self, parsed: &Parsed) -> bool {
        if let Some(want) = &self.site {
            if parsed.site.as_deref() != Some(want.as_ref()) {
                return false;
            }
        }
        if let Some(want) = &self.host {
            if parsed.host.as_deref() != Some(want.as_ref()) {
                return false;
            }
        }
        if let Some(want) = &self.uri {
            match &parsed.uri {
                Some(uri) if want.matches(uri) => {}
                _ => return false,
            }
        }
        if let Some(want) = &self.status {
            match parsed.status {
                Some(status) if want.matches(status) => {}
                _ => return false,
            }
        }
        if self.since.is_some() || self.until.is_some() {
            match parsed.timestamp {
                Some(ts) => {
                    if ts < self.since() || ts > self.until() {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(site: &str, status: u16, uri: &str) -> Parsed {
        Parsed {
            site: Some(site.into()),
            uri: Some(uri.into()),
            status: Some(status),
            ..Default::default()
        }
    }

    #[test]
    fn default_matches_everything() {
        let f = Filter::new();
        assert!(f.accepts(&Parsed::default()));
    }

    #[test]
    fn site_exact() {
        let f = Filter::new().with_site("a");
        assert!(f.accepts(&parsed("a", 200, "/")));
        assert!(!f.accepts(&parsed("b", 200, "/")));
    }

    #[test]
    fn status_class() {
        let f = Filter::new().with_status(StatusMatch::Class(4));
        assert!(f.accepts(&parsed("a", 404, "/")));
        assert!(!f.accepts(&parsed("a", 200, "/")));
    }

    #[test]
    fn uri_prefix() {
        let f = Filter::new().with_uri(UriMatch::Prefix("/api/".into()));
        assert!(f.accepts(&parsed("a", 200, "/api/v1")));
        assert!(!f.accepts(&parsed("a", 200, "/other")));
    }

    #[test]
    fn time_range_rejects_missing_timestamp() {
        let f = Filter::new().with_time_range(Some(Timestamp::UNIX_EPOCH), None);
        assert!(!f.accepts(&Parsed::default()));
    }

    #[test]
    fn since_after_until_never_matches_but_is_representable() {
        let f = Filter::new().with_time_range(Some(Timestamp::MAX), Some(Timestamp::MIN));
        let mut p = Parsed::default();
        p.timestamp = Some(Timestamp::UNIX_EPOCH);
        assert!(!f.accepts(&p));
    }
}
