// src/version.rs

//! Dot-numeric version comparison
//!
//! Package versions are dot-separated base-10 segments ("1.2.10"). The
//! shorter side is zero-extended before lexicographic comparison, so
//! "1.2" == "1.2.0" and "1.10" > "1.9". The packaging tools never emit
//! non-numeric segments; anything else ("1.0-rc1", "2.0+git") is a hard
//! error rather than a guessed ordering.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;

/// A parsed dot-numeric version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    segments: Vec<u64>,
}

impl Version {
    /// Parse a dot-separated numeric version string
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidVersion(s.to_string()));
        }

        let segments = s
            .split('.')
            .map(|seg| {
                seg.parse::<u64>()
                    .map_err(|_| Error::InvalidVersion(s.to_string()))
            })
            .collect::<Result<Vec<u64>>>()?;

        Ok(Self { segments })
    }

    /// Compare with zero-extension of the shorter side
    pub fn compare(&self, other: &Version) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        for i in 0..len {
            let a = self.segments.get(i).copied().unwrap_or(0);
            let b = other.segments.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.segments.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

/// Compare two version strings, parsing both
pub fn compare(a: &str, b: &str) -> Result<Ordering> {
    Ok(Version::parse(a)?.compare(&Version::parse(b)?))
}
