//! World settings: the versioned configuration blob broadcast with every tick.
//!
//! Settings are loaded once by the coordinator from the world store (or
//! defaulted and inserted when the store has none), held as read-mostly
//! state, and copied by value into every [`TickMessage`] so domain
//! controllers and workers never fetch them separately.
//!
//! [`TickMessage`]: crate::messages::TickMessage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Current schema version written by this build.
pub const SETTINGS_VERSION: u32 = 1;

/// A speed limit that applies to one kind of location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SpeedLimit {
    /// Location kind, e.g. `city` or `noncity`.
    pub location: String,
    /// Limit in distance units per simulated second.
    pub value: u32,
}

/// An entry of the disease table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Disease {
    /// Disease name.
    pub name: String,
    /// Days before the disease is detected.
    pub days_detected: u32,
    /// Average number of days a person stays ill.
    pub avg_days_ill: u32,
    /// Probability that an infection is fatal.
    pub lethality_rate: f64,
    /// Whether the disease spreads between people.
    pub infectious: bool,
    /// Probability of infection per contact.
    pub infection_chance: f64,
    /// Severity factor applied to health.
    pub severity: f64,
}

/// A named world trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Trigger {
    /// Trigger name.
    pub name: String,
    /// Free-form trigger value.
    pub value: String,
}

/// World-wide simulation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WorldSettings {
    /// Schema version of this blob.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Violent crimes per person per tick.
    pub violent_crime_rate: f64,
    /// Murders per person per tick.
    pub murder_rate: f64,
    /// Fatal car accidents per traveller per tick.
    pub car_accident_fatality_rate: f64,
    /// Known diseases.
    #[serde(default)]
    pub diseases: Vec<Disease>,
    /// Wall-clock budget for one tick in milliseconds; slower ticks are
    /// reported as slow-tick warnings.
    pub world_speed_ms: u64,
    /// Simulated time of the last persisted checkpoint.
    pub last_time: DateTime<Utc>,
    /// Named world triggers.
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    /// Per-location speed limits.
    #[serde(default)]
    pub speed_limits: Vec<SpeedLimit>,
}

const fn default_version() -> u32 {
    SETTINGS_VERSION
}

impl WorldSettings {
    /// Build the default settings used when the store has none.
    pub fn defaults_at(last_time: DateTime<Utc>) -> Self {
        Self {
            version: SETTINGS_VERSION,
            violent_crime_rate: 0.003_81,
            murder_rate: 0.000_053,
            car_accident_fatality_rate: 0.000_115_9,
            diseases: Vec::new(),
            world_speed_ms: 5000,
            last_time,
            triggers: Vec::new(),
            speed_limits: vec![
                SpeedLimit {
                    location: String::from("city"),
                    value: 35,
                },
                SpeedLimit {
                    location: String::from("noncity"),
                    value: 70,
                },
            ],
        }
    }

    /// Look up the speed limit for a location kind.
    pub fn speed_limit(&self, location: &str) -> Option<u32> {
        self.speed_limits
            .iter()
            .find(|limit| limit.location == location)
            .map(|limit| limit.value)
    }

    /// The tick-duration budget as a [`std::time::Duration`].
    pub const fn tick_budget(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.world_speed_ms)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_world_constants() {
        let settings = WorldSettings::defaults_at(Utc::now());
        assert_eq!(settings.speed_limit("city"), Some(35));
        assert_eq!(settings.speed_limit("noncity"), Some(70));
        assert_eq!(settings.speed_limit("harbour"), None);
        assert_eq!(settings.tick_budget().as_millis(), 5000);
        assert!(settings.diseases.is_empty());
    }

    #[test]
    fn missing_version_defaults_to_current() {
        let json = serde_json::json!({
            "violent_crime_rate": 0.1,
            "murder_rate": 0.2,
            "car_accident_fatality_rate": 0.3,
            "world_speed_ms": 100,
            "last_time": "2020-01-01T00:00:00Z"
        });
        let settings: WorldSettings = serde_json::from_value(json).unwrap();
        assert_eq!(settings.version, SETTINGS_VERSION);
        assert!(settings.speed_limits.is_empty());
    }
}
