use dashmap::DashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

use crate::error::Result;

pub mod parser;

/// How blocked queries are answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockingMode {
    /// Return NXDOMAIN for blocked domains.
    #[default]
    NxDomain,
    /// Return an A record pointing at 0.0.0.0.
    NullIp,
}

impl BlockingMode {
    pub fn parse_str(mode: &str) -> Self {
        match mode.to_lowercase().as_str() {
            "null" => BlockingMode::NullIp,
            _ => BlockingMode::NxDomain,
        }
    }
}

/// Normalize a domain for membership checks: lowercase, surrounding
/// whitespace trimmed, trailing dot removed.
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_lowercase()
}

/// Set of blocked domains with suffix-aligned ancestor matching.
///
/// Blocking `ads.com` also blocks `tracker.ads.com` and `a.b.ads.com`,
/// but never `adsnotblocked.com`.
#[derive(Debug, Default)]
pub struct FilterList {
    domains: DashMap<String, ()>,
}

impl FilterList {
    pub fn new() -> Self {
        Self {
            domains: DashMap::new(),
        }
    }

    pub fn add(&self, domain: &str) {
        self.domains.insert(normalize_domain(domain), ());
    }

    /// Check the domain itself, then every ancestor at a label boundary.
    pub fn is_blocked(&self, domain: &str) -> bool {
        let domain = normalize_domain(domain);

        if self.domains.contains_key(&domain) {
            return true;
        }

        for (dot, _) in domain.match_indices('.') {
            if self.domains.contains_key(&domain[dot + 1..]) {
                return true;
            }
        }

        false
    }

    /// Number of unique blocked domains.
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Load an AdBlock-format blocklist file, adding every `||domain^`
    /// rule to the set.
    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        let before = self.domains.len();
        for line in reader.lines() {
            let line = line?;
            if let Some(domain) = parser::parse_line(&line) {
                self.add(domain);
            }
        }

        info!(
            path = %path.display(),
            loaded = self.domains.len() - before,
            "loaded blocklist"
        );
        Ok(())
    }
}
