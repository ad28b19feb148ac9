//! Semantic versions used for migration ordering and backend compatibility.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A `major.minor.patch` version.
///
/// Ordering is numeric per component, so `2.10.0` sorts after `2.9.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

/// A version string that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version '{input}': expected major.minor.patch")]
pub struct VersionParseError {
    /// The rejected input.
    pub input: String,
}

impl Version {
    /// Create a version from its components.
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a version string. A leading `v` is accepted.
    pub fn parse(input: &str) -> Result<Self, VersionParseError> {
        let err = || VersionParseError {
            input: input.to_string(),
        };
        let trimmed = input.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);

        let mut parts = trimmed.split('.');
        let mut next = || -> Result<u64, VersionParseError> {
            parts.next().ok_or_else(err)?.parse().map_err(|_| err())
        };
        let major = next()?;
        let minor = next()?;
        let patch = next()?;
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(Self::new(major, minor, patch))
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Half-open version interval `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    /// Inclusive lower bound.
    pub min: Version,
    /// Exclusive upper bound.
    pub max: Version,
}

impl VersionRange {
    /// Create a range covering `[min, max)`.
    pub const fn new(min: Version, max: Version) -> Self {
        Self { min, max }
    }

    /// Check whether `version` falls inside the range.
    pub fn contains(&self, version: &Version) -> bool {
        *version >= self.min && *version < self.max
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(Version::parse("2.12.5").unwrap(), Version::new(2, 12, 5));
        assert_eq!(Version::parse("v3.0.0").unwrap(), Version::new(3, 0, 0));
        assert_eq!(Version::parse(" 1.4.0 ").unwrap(), Version::new(1, 4, 0));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Version::parse("2.0").is_err());
        assert!(Version::parse("2.0.0.1").is_err());
        assert!(Version::parse("two.0.0").is_err());
        assert!(Version::parse("").is_err());
        assert!(Version::parse("2.0.-1").is_err());
    }

    #[test]
    fn test_numeric_ordering() {
        let a = Version::parse("2.9.0").unwrap();
        let b = Version::parse("2.10.0").unwrap();
        assert!(a < b);
        assert!(Version::new(1, 9, 9) < Version::new(2, 0, 0));
    }

    #[test]
    fn test_range_is_half_open() {
        let range = VersionRange::new(Version::new(1, 0, 0), Version::new(3, 0, 0));
        assert!(range.contains(&Version::new(1, 0, 0)));
        assert!(range.contains(&Version::new(2, 99, 0)));
        assert!(!range.contains(&Version::new(3, 0, 0)));
        assert!(!range.contains(&Version::new(0, 9, 0)));
        assert_eq!(range.to_string(), "[1.0.0, 3.0.0)");
    }
}
