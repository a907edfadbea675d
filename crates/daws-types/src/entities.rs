//! Persisted world entities.
//!
//! These are the documents stored behind the world store. The core tick
//! protocol only ever handles their [`EntityId`]s; the per-entity steps run
//! by workers load, mutate and save the full documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::domain::Domain;
use crate::ids::EntityId;

/// A point on the world grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Point {
    /// Horizontal coordinate.
    pub x: i64,
    /// Vertical coordinate.
    pub y: i64,
}

impl Point {
    /// Create a point.
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// Move up to `max_step` units towards `target` along each axis,
    /// x first. Returns the new position.
    pub fn step_towards(self, target: Self, max_step: u32) -> Self {
        let mut budget = i64::from(max_step);
        let dx = target.x.saturating_sub(self.x);
        let move_x = dx.clamp(budget.saturating_neg(), budget);
        budget = budget.saturating_sub(move_x.saturating_abs());
        let dy = target.y.saturating_sub(self.y);
        let move_y = dy.clamp(budget.saturating_neg(), budget);
        Self {
            x: self.x.saturating_add(move_x),
            y: self.y.saturating_add(move_y),
        }
    }
}

/// A city: a named rectangle of the world holding buildings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct City {
    /// City identifier.
    pub id: EntityId,
    /// City name.
    pub name: String,
    /// Top-left corner.
    pub top_left: Point,
    /// Bottom-right corner.
    pub bottom_right: Point,
    /// Buildings inside the city.
    pub building_ids: Vec<EntityId>,
    /// Simulated founding date.
    pub established: DateTime<Utc>,
}

/// Kind of a building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum BuildingKind {
    /// Single-family house.
    House,
    /// Apartment block.
    Apartment,
    /// School.
    School,
    /// Office building.
    Office,
    /// Warehouse.
    Warehouse,
    /// Retail store.
    Retail,
    /// Entertainment venue.
    Entertainment,
    /// Hospital.
    Hospital,
    /// Police station.
    Police,
}

impl BuildingKind {
    /// Every building kind.
    pub const ALL: [Self; 9] = [
        Self::House,
        Self::Apartment,
        Self::School,
        Self::Office,
        Self::Warehouse,
        Self::Retail,
        Self::Entertainment,
        Self::Hospital,
        Self::Police,
    ];

    /// Whether people live in this kind of building.
    pub const fn is_residential(self) -> bool {
        matches!(self, Self::House | Self::Apartment)
    }
}

/// A building inside a city.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Building {
    /// Building identifier.
    pub id: EntityId,
    /// City the building belongs to.
    pub city_id: EntityId,
    /// Display name.
    pub name: String,
    /// Top-left corner.
    pub top_left: Point,
    /// Bottom-right corner.
    pub bottom_right: Point,
    /// Simulated construction date.
    pub build_date: DateTime<Utc>,
    /// Building kind.
    pub kind: BuildingKind,
    /// Number of floors.
    pub floors: u32,
    /// Maximum number of occupants.
    pub max_occupancy: u32,
    /// Current number of occupants.
    #[serde(default)]
    pub occupants: u32,
    /// Structural condition, 0..=100.
    #[serde(default = "full_condition")]
    pub condition: u8,
    /// Simulated time of the last update by a worker.
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

const fn full_condition() -> u8 {
    100
}

/// How a person died.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum DeathCause {
    /// Old age.
    Natural,
    /// Traffic or other accident.
    Accident,
    /// Killed by another person.
    Murder,
    /// Disease.
    Illness,
}

/// A person living in the world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Person {
    /// Person identifier.
    pub id: EntityId,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Simulated birth date.
    pub birthdate: DateTime<Utc>,
    /// Home building.
    pub home_building: Option<EntityId>,
    /// Work building.
    pub work_building: Option<EntityId>,
    /// Building the person is currently in, if any.
    pub current_building: Option<EntityId>,
    /// Current position.
    pub position: Point,
    /// Where the person is travelling to.
    pub destination: Option<Point>,
    /// Building at the destination.
    #[serde(default)]
    pub destination_building: Option<EntityId>,
    /// Whether the person is on the road this tick.
    pub traveling: bool,
    /// Health, 0..=100.
    pub health: u8,
    /// Happiness, 0..=100.
    pub happiness: u8,
    /// Simulated date of death.
    #[serde(default)]
    pub death_date: Option<DateTime<Utc>>,
    /// Cause of death.
    #[serde(default)]
    pub cause_of_death: Option<DeathCause>,
}

impl Person {
    /// Whether the person is still alive.
    pub const fn is_alive(&self) -> bool {
        self.death_date.is_none()
    }
}

/// Any persisted entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum Entity {
    /// A city.
    City(City),
    /// A building.
    Building(Building),
    /// A person.
    Person(Person),
}

impl Entity {
    /// Identifier of the wrapped entity.
    pub const fn id(&self) -> EntityId {
        match self {
            Self::City(city) => city.id,
            Self::Building(building) => building.id,
            Self::Person(person) => person.id,
        }
    }

    /// Domain whose workers process this entity each tick, if any.
    pub const fn domain(&self) -> Option<Domain> {
        match self {
            Self::City(_) => None,
            Self::Building(_) => Some(Domain::City),
            Self::Person(_) => Some(Domain::Traffic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_spends_budget_on_x_first() {
        let start = Point::new(0, 0);
        let moved = start.step_towards(Point::new(10, 10), 4);
        assert_eq!(moved, Point::new(4, 0));
        let moved = Point::new(8, 0).step_towards(Point::new(10, 10), 5);
        assert_eq!(moved, Point::new(10, 3));
    }

    #[test]
    fn step_does_not_overshoot() {
        let moved = Point::new(5, 5).step_towards(Point::new(3, 6), 70);
        assert_eq!(moved, Point::new(3, 6));
    }

    #[test]
    fn buildings_belong_to_the_city_domain() {
        let building = Building {
            id: EntityId::new(),
            city_id: EntityId::new(),
            name: String::from("Depot"),
            top_left: Point::new(0, 0),
            bottom_right: Point::new(2, 2),
            build_date: Utc::now(),
            kind: BuildingKind::Warehouse,
            floors: 1,
            max_occupancy: 10,
            occupants: 0,
            condition: 100,
            last_updated: None,
        };
        let entity = Entity::Building(building);
        assert_eq!(entity.domain(), Some(Domain::City));
    }
}
