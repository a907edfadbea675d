//! Domain kinds: the categories of subordinate simulation work.
//!
//! Every domain has its own tick queue, job queue and outcome queue, and
//! its own controller and worker processes. The coordinator requires at
//! least one live controller of each configured domain before it will
//! emit a tick.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// A category of per-tick simulation work.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// City-side simulation: one job per building.
    City,
    /// Traffic-side simulation: one job per travelling person.
    Traffic,
}

impl Domain {
    /// Every domain known to the simulation, in stable order.
    pub const ALL: [Self; 2] = [Self::City, Self::Traffic];

    /// The lowercase wire name of the domain.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::City => "city",
            Self::Traffic => "traffic",
        }
    }
}

impl core::fmt::Display for Domain {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a known domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDomain(pub String);

impl core::fmt::Display for UnknownDomain {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "unknown domain: {}", self.0)
    }
}

impl std::error::Error for UnknownDomain {}

impl core::str::FromStr for Domain {
    type Err = UnknownDomain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "city" => Ok(Self::City),
            "traffic" => Ok(Self::Traffic),
            other => Err(UnknownDomain(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("City".parse::<Domain>(), Ok(Domain::City));
        assert_eq!(" traffic ".parse::<Domain>(), Ok(Domain::Traffic));
        assert!("harbour".parse::<Domain>().is_err());
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&Domain::Traffic).unwrap_or_default();
        assert_eq!(json, "\"traffic\"");
    }
}
