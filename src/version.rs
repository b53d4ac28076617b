//! Semantic version numbers for dataset versions and the bump rule.

use std::{fmt, str::FromStr};

use anyhow::{Context, Error, Result, ensure};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// A `major.minor.patch` dataset version number.
///
/// Serialized as the dotted string form so persisted documents stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionNumber {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// Inputs to the version bump decision: mapping completeness per dimension
/// type plus the deletion flags for the dimensions that cannot be manually
/// remapped (any removal there is unconditionally breaking).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingSummary {
    pub locations_complete: bool,
    pub filters_complete: bool,
    pub deleted_indicators: bool,
    pub deleted_geographic_levels: bool,
    pub deleted_time_periods: bool,
}

impl MappingSummary {
    /// A new version is breaking when any mapping is incomplete or any
    /// non-remappable dimension lost an item.
    pub fn is_breaking(&self) -> bool {
        !self.locations_complete
            || !self.filters_complete
            || self.deleted_indicators
            || self.deleted_geographic_levels
            || self.deleted_time_periods
    }
}

impl VersionNumber {
    pub const FIRST: VersionNumber = VersionNumber {
        major: 1,
        minor: 0,
        patch: 0,
    };

    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        VersionNumber {
            major,
            minor,
            patch,
        }
    }

    /// Computes the next version number from this one. Pure; must be re-run
    /// whenever mapping state changes, since mapping edits are not atomic
    /// with version-number assignment.
    pub fn next(&self, summary: &MappingSummary) -> VersionNumber {
        if summary.is_breaking() {
            VersionNumber::new(self.major + 1, 0, 0)
        } else {
            VersionNumber::new(self.major, self.minor + 1, 0)
        }
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for VersionNumber {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let parts: Vec<&str> = value.split('.').collect();
        ensure!(
            parts.len() == 3,
            "Version '{value}' must have the form major.minor.patch"
        );
        let parse = |part: &str, name: &str| -> Result<u32> {
            part.parse::<u32>()
                .with_context(|| format!("Parsing {name} component of version '{value}'"))
        };
        Ok(VersionNumber {
            major: parse(parts[0], "major")?,
            minor: parse(parts[1], "minor")?,
            patch: parse(parts[2], "patch")?,
        })
    }
}

impl Serialize for VersionNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VersionNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}
