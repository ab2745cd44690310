// This file is part of Pond, a log-record broker.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The optional per-site append-mode sink (`--append-dir`): one
//! append-only file per sanitized site name, opened once and kept open for
//! the life of the process.
//!
//! A record whose site is unknown is silently dropped rather than routed to
//! a configurable fallback sink.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

use db::Parsed;

pub struct SiteWriters {
    dir: PathBuf,
    open: HashMap<String, File>,
}

impl SiteWriters {
    pub fn new(dir: PathBuf) -> Self {
        SiteWriters {
            dir,
            open: HashMap::new(),
        }
    }

    /// Appends `raw` to the file for `parsed.site`, opening it on first
    /// use. A record with no site is dropped (see the module docs).
    pub fn append(&mut self, parsed: &Parsed, raw: &[u8]) -> io::Result<()> {
        let Some(site) = parsed.site.as_deref() else {
            return Ok(());
        };
        let name = sanitize(site);
        let file = match self.open.get_mut(&name) {
            Some(f) => f,
            None => {
                let path = self.dir.join(&name);
                let f = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .custom_flags(libc::O_NOFOLLOW)
                    .open(&path)?;
                self.open.entry(name.clone()).or_insert(f)
            }
        };
        file.write_all(raw)?;
        file.write_all(b"\n")
    }
}

/// Maps a site name to a safe filename: `[A-Za-z0-9]+` characters pass
/// through, everything else becomes `_`.
fn sanitize(site: &str) -> String {
    let s: String = site
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if s.is_empty() {
        "_".to_string()
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_non_alphanumeric() {
        assert_eq!(sanitize("example.com"), "example_com");
        assert_eq!(sanitize(""), "_");
        assert_eq!(sanitize("a/b"), "a_b");
    }

    #[test]
    fn appends_to_one_file_per_site() {
        let dir = std::env::temp_dir().join(format!("pond-sitewriter-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut w = SiteWriters::new(dir.clone());
        let mut p = Parsed::default();
        p.site = Some("a".into());
        w.append(&p, b"rec1").unwrap();
        w.append(&p, b"rec2").unwrap();
        let contents = std::fs::read_to_string(dir.join("a")).unwrap();
        assert_eq!(contents, "rec1\nrec2\n");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_site_is_dropped() {
        let dir = std::env::temp_dir().join(format!("pond-sitewriter-test-none-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut w = SiteWriters::new(dir.clone());
        w.append(&Parsed::default(), b"rec").unwrap();
        assert!(std::fs::read_dir(&dir).unwrap().next().is_none());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
