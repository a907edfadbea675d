//! Starting-world generation.
//!
//! When the coordinator finds an empty store it seeds a small world: the four
//! starting cities, a handful of buildings in each, and residents who live in
//! one building and work in another. A share of the residents start out on
//! their way to work so the `traffic` domain has something to step.

use chrono::{DateTime, TimeDelta, Utc};
use daws_types::{Building, BuildingKind, City, Entity, EntityId, Person, Point};
use rand::rngs::StdRng;
use rand::seq::{IndexedMutRandom, IndexedRandom};
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::error::StoreError;
use crate::store::{EntityCounts, WorldStore};

/// Names of the starting cities, west to east on the world grid.
pub const STARTING_CITIES: [&str; 4] = ["Orlando", "Green Bay", "Chicago", "Seattle"];

/// Width and height of each city's square.
const CITY_SIZE: i64 = 500;

/// Gap between neighbouring cities; travel between them is `noncity`.
const CITY_SPACING: i64 = 1000;

const FIRST_NAMES: [&str; 12] = [
    "Ada", "Ben", "Cora", "Dev", "Eli", "Fay", "Gus", "Hana", "Ivan", "June", "Kai", "Lena",
];

const LAST_NAMES: [&str; 10] = [
    "Adams", "Baker", "Clark", "Diaz", "Evans", "Foster", "Garcia", "Hughes", "Ito", "Jones",
];

/// How large a world to seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedPlan {
    /// Buildings per city, at least two.
    pub buildings_per_city: u32,
    /// People per city.
    pub people_per_city: u32,
    /// Percentage of people travelling at the start, 0..=100.
    pub traveling_percent: u8,
}

impl Default for SeedPlan {
    fn default() -> Self {
        Self {
            buildings_per_city: 12,
            people_per_city: 40,
            traveling_percent: 25,
        }
    }
}

fn days_before(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    TimeDelta::try_days(days)
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(now)
}

fn random_building(
    rng: &mut StdRng,
    city: &City,
    kind: BuildingKind,
    ordinal: u32,
    now: DateTime<Utc>,
) -> Building {
    let span = CITY_SIZE.saturating_sub(20);
    let x = city.top_left.x.saturating_add(rng.random_range(0..=span));
    let y = city.top_left.y.saturating_add(rng.random_range(0..=span));
    let width = rng.random_range(2..=20);
    let floors = rng.random_range(1..=30);
    let per_floor = if kind.is_residential() { 4 } else { 25 };
    Building {
        id: EntityId::new(),
        city_id: city.id,
        name: format!("{} {kind:?} {ordinal}", city.name),
        top_left: Point::new(x, y),
        bottom_right: Point::new(x.saturating_add(width), y.saturating_add(width)),
        build_date: days_before(now, rng.random_range(30..=36_500)),
        kind,
        floors,
        max_occupancy: floors.saturating_mul(per_floor),
        occupants: 0,
        condition: rng.random_range(60..=100),
        last_updated: None,
    }
}

/// Generate a starting world without touching any store.
pub fn build_world(rng: &mut StdRng, plan: &SeedPlan, now: DateTime<Utc>) -> Vec<Entity> {
    let mut entities = Vec::new();
    let buildings_per_city = plan.buildings_per_city.max(2);
    for (index, name) in STARTING_CITIES.iter().enumerate() {
        let offset = i64::try_from(index)
            .unwrap_or(0)
            .saturating_mul(CITY_SPACING);
        let mut city = City {
            id: EntityId::new(),
            name: (*name).to_owned(),
            top_left: Point::new(offset, 0),
            bottom_right: Point::new(offset.saturating_add(CITY_SIZE), CITY_SIZE),
            building_ids: Vec::new(),
            established: days_before(now, rng.random_range(36_500..=73_000)),
        };

        let mut homes = Vec::new();
        let mut workplaces = Vec::new();
        for ordinal in 0..buildings_per_city {
            // Alternate homes and workplaces so both lists are non-empty.
            let kind = if ordinal & 1 == 0 {
                *[BuildingKind::House, BuildingKind::Apartment]
                    .choose(rng)
                    .unwrap_or(&BuildingKind::House)
            } else {
                *BuildingKind::ALL
                    .iter()
                    .filter(|kind| !kind.is_residential())
                    .collect::<Vec<_>>()
                    .choose(rng)
                    .copied()
                    .unwrap_or(&BuildingKind::Office)
            };
            let building = random_building(rng, &city, kind, ordinal, now);
            city.building_ids.push(building.id);
            if kind.is_residential() {
                homes.push(building);
            } else {
                workplaces.push(building);
            }
        }

        for _ in 0..plan.people_per_city {
            let (Some(home), Some(work)) = (homes.choose_mut(rng), workplaces.choose(rng)) else {
                continue;
            };
            home.occupants = home.occupants.saturating_add(1);
            let traveling = rng.random_range(0..100_u8) < plan.traveling_percent;
            let person = Person {
                id: EntityId::new(),
                first_name: (*FIRST_NAMES.choose(rng).unwrap_or(&"Alex")).to_owned(),
                last_name: (*LAST_NAMES.choose(rng).unwrap_or(&"Smith")).to_owned(),
                birthdate: days_before(now, rng.random_range(6_570..=29_200)),
                home_building: Some(home.id),
                work_building: Some(work.id),
                current_building: if traveling { None } else { Some(home.id) },
                position: home.top_left,
                destination: traveling.then_some(work.top_left),
                destination_building: traveling.then_some(work.id),
                traveling,
                health: rng.random_range(70..=100),
                happiness: rng.random_range(40..=100),
                death_date: None,
                cause_of_death: None,
            };
            if traveling {
                home.occupants = home.occupants.saturating_sub(1);
            }
            entities.push(Entity::Person(person));
        }

        entities.extend(homes.into_iter().map(Entity::Building));
        entities.extend(workplaces.into_iter().map(Entity::Building));
        entities.push(Entity::City(city));
    }
    entities
}

/// Seed the store with a starting world if it holds none.
///
/// Returns the entity counts after seeding, or the existing counts when the
/// store already had a world.
///
/// # Errors
///
/// Returns [`StoreError`] if any read or write fails.
pub async fn seed_world(
    store: &dyn WorldStore,
    plan: &SeedPlan,
    seed: Option<u64>,
    now: DateTime<Utc>,
) -> Result<EntityCounts, StoreError> {
    let existing = store.entity_counts().await?;
    if !existing.is_empty() {
        info!(
            cities = existing.cities,
            buildings = existing.buildings,
            people = existing.people,
            "world already seeded"
        );
        return Ok(existing);
    }

    let entities = {
        let mut rng = seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        build_world(&mut rng, plan, now)
    };
    for entity in &entities {
        store.create_entity(entity).await?;
    }

    let counts = store.entity_counts().await?;
    info!(
        cities = counts.cities,
        buildings = counts.buildings,
        people = counts.people,
        travelers = counts.travelers,
        "seeded starting world"
    );
    Ok(counts)
}
