//! Per-entity updates run by workers.
//!
//! Each domain has one [`EntityStep`]. A step loads the entity named by the
//! job, advances it by one tick and writes it back. Steps are collaborators
//! of the tick protocol; the worker only cares whether a step completed,
//! failed permanently, or may succeed on retry.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Datelike;
use daws_store::SharedStore;
use daws_types::{Building, DeathCause, Domain, Entity, JobMessage, Person, Point};
use rand::Rng;
use tracing::debug;

use crate::error::StepError;

/// Shared handle to a step implementation.
pub type SharedStep = Arc<dyn EntityStep>;

/// One tick of work for one entity.
#[async_trait]
pub trait EntityStep: Send + Sync + 'static {
    /// Domain whose jobs this step handles.
    fn domain(&self) -> Domain;

    /// Advance the job's entity by one tick.
    async fn step(&self, job: &JobMessage) -> Result<(), StepError>;
}

/// The built-in step for `domain`.
pub fn step_for(domain: Domain, store: SharedStore) -> SharedStep {
    match domain {
        Domain::City => Arc::new(CityStep::new(store)),
        Domain::Traffic => Arc::new(TrafficStep::new(store)),
    }
}

/// Ages buildings and keeps their occupancy within capacity.
#[derive(Clone)]
pub struct CityStep {
    store: SharedStore,
}

impl CityStep {
    /// Create a city step over `store`.
    pub const fn new(store: SharedStore) -> Self {
        Self { store }
    }
}

impl std::fmt::Debug for CityStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CityStep").finish_non_exhaustive()
    }
}

/// Apply one tick to a building.
///
/// Condition drops by one point the first time a building is stepped on a
/// new simulated day. Occupancy is clamped to capacity.
pub fn age_building(building: &mut Building, job: &JobMessage) {
    let new_day = building
        .last_updated
        .is_none_or(|last| last.date_naive() != job.sim_time.date_naive());
    if new_day && building.last_updated.is_some() {
        building.condition = building.condition.saturating_sub(1);
    }
    if building.occupants > building.max_occupancy {
        building.occupants = building.max_occupancy;
    }
    building.last_updated = Some(job.sim_time);
}

#[async_trait]
impl EntityStep for CityStep {
    fn domain(&self) -> Domain {
        Domain::City
    }

    async fn step(&self, job: &JobMessage) -> Result<(), StepError> {
        let Some(entity) = self.store.get_entity(job.entity).await? else {
            return Err(StepError::Permanent(format!("entity {} missing", job.entity)));
        };
        let Entity::Building(mut building) = entity else {
            return Err(StepError::Permanent(format!(
                "entity {} is not a building",
                job.entity
            )));
        };
        age_building(&mut building, job);
        debug!(
            entity = %building.id,
            condition = building.condition,
            weekday = %job.sim_time.weekday(),
            "stepped building"
        );
        self.store.update_entity(&Entity::Building(building)).await?;
        Ok(())
    }
}

/// Moves travelling people towards their destination.
#[derive(Clone)]
pub struct TrafficStep {
    store: SharedStore,
}

impl TrafficStep {
    /// Create a traffic step over `store`.
    pub const fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Speed limit that applies at `position`: the `city` limit inside the
    /// destination's city, the `noncity` limit elsewhere.
    async fn speed_limit(&self, person: &Person, job: &JobMessage) -> Result<u32, StepError> {
        let city_limit = job.settings.speed_limit("city").unwrap_or(35);
        let open_limit = job.settings.speed_limit("noncity").unwrap_or(city_limit);
        let Some(building_id) = person.destination_building else {
            return Ok(open_limit);
        };
        let Some(Entity::Building(building)) = self.store.get_entity(building_id).await? else {
            return Ok(open_limit);
        };
        let Some(Entity::City(city)) = self.store.get_entity(building.city_id).await? else {
            return Ok(open_limit);
        };
        let inside = (city.top_left.x..=city.bottom_right.x).contains(&person.position.x)
            && (city.top_left.y..=city.bottom_right.y).contains(&person.position.y);
        Ok(if inside { city_limit } else { open_limit })
    }
}

impl std::fmt::Debug for TrafficStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficStep").finish_non_exhaustive()
    }
}

/// Move `person` up to `max_step` towards the destination, ending the trip
/// on arrival. Returns `true` if the person arrived.
pub fn travel(person: &mut Person, destination: Point, max_step: u32) -> bool {
    person.position = person.position.step_towards(destination, max_step);
    if person.position != destination {
        return false;
    }
    person.traveling = false;
    person.current_building = person.destination_building.take();
    person.destination = None;
    true
}

#[async_trait]
impl EntityStep for TrafficStep {
    fn domain(&self) -> Domain {
        Domain::Traffic
    }

    async fn step(&self, job: &JobMessage) -> Result<(), StepError> {
        let Some(entity) = self.store.get_entity(job.entity).await? else {
            return Err(StepError::Permanent(format!("entity {} missing", job.entity)));
        };
        let Entity::Person(mut person) = entity else {
            return Err(StepError::Permanent(format!(
                "entity {} is not a person",
                job.entity
            )));
        };
        if !person.traveling || !person.is_alive() {
            return Ok(());
        }
        let Some(destination) = person.destination else {
            person.traveling = false;
            self.store.update_entity(&Entity::Person(person)).await?;
            return Ok(());
        };

        let rate = job.settings.car_accident_fatality_rate;
        let fatal = rate > 0.0 && rand::rng().random_bool(rate.min(1.0));
        if fatal {
            person.traveling = false;
            person.destination = None;
            person.destination_building = None;
            person.death_date = Some(job.sim_time);
            person.cause_of_death = Some(DeathCause::Accident);
            debug!(entity = %person.id, "traveller died in an accident");
        } else {
            let limit = self.speed_limit(&person, job).await?;
            if travel(&mut person, destination, limit) {
                debug!(entity = %person.id, "traveller arrived");
            }
        }
        self.store.update_entity(&Entity::Person(person)).await?;
        Ok(())
    }
}
