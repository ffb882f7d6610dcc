use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::GovernanceError;

/// A `major.minor.patch` schema version label, ordered numerically.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SchemaVersion {
    /// Implicit version of every collection without a version marker.
    pub const INITIAL: Self = Self::new(0, 0, 0);

    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Parse a dotted version label such as `1.10.0`.
    ///
    /// # Errors
    /// Returns [`GovernanceError::Validation`] unless the label has exactly three
    /// numeric components.
    pub fn parse(value: &str) -> Result<Self, GovernanceError> {
        let invalid =
            || GovernanceError::Validation(format!("invalid version label `{value}`"));
        let mut parts = value.trim().split('.');
        let mut next = || -> Result<u32, GovernanceError> {
            parts.next().and_then(|part| part.parse::<u32>().ok()).ok_or_else(invalid)
        };
        let version = Self::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl Default for SchemaVersion {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl Display for SchemaVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SchemaVersion {
    type Err = GovernanceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for SchemaVersion {
    type Error = GovernanceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SchemaVersion> for String {
    fn from(value: SchemaVersion) -> Self {
        value.to_string()
    }
}
