//! Version types
//!
//! Plugins and the host are versioned with a plain `major.minor.patch`
//! triple. Pre-release and build metadata are not accepted.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Semantic version triple with total ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

/// Reason a version string was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct VersionParseError(String);

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = semver::Version::parse(s.trim())
            .map_err(|e| VersionParseError(e.to_string()))?;

        if !parsed.pre.is_empty() || !parsed.build.is_empty() {
            return Err(VersionParseError(
                "pre-release and build metadata are not supported".to_string(),
            ));
        }

        Ok(Self::new(parsed.major, parsed.minor, parsed.patch))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Inclusive host-compatibility range; `max` absent means unbounded above
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionRange {
    pub min: Version,
    pub max: Option<Version>,
}

impl VersionRange {
    pub fn new(min: Version, max: Option<Version>) -> Self {
        Self { min, max }
    }

    /// Range with only a lower bound
    pub fn at_least(min: Version) -> Self {
        Self { min, max: None }
    }

    /// `min <= version <= max`
    ///
    /// # Examples
    ///
    /// ```
    /// use sdk::{Version, VersionRange};
    ///
    /// let range = VersionRange::new(Version::new(1, 0, 0), Some(Version::new(2, 0, 0)));
    /// assert!(range.contains(&Version::new(1, 4, 2)));
    /// assert!(range.contains(&Version::new(2, 0, 0)));
    /// assert!(!range.contains(&Version::new(2, 0, 1)));
    /// ```
    pub fn contains(&self, version: &Version) -> bool {
        self.min <= *version && self.max.map_or(true, |max| *version <= max)
    }

    /// A range whose maximum sits below its minimum admits nothing
    pub fn is_empty(&self) -> bool {
        self.max.is_some_and(|max| max < self.min)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, ">={}, <={}", self.min, max),
            None => write!(f, ">={}", self.min),
        }
    }
}
