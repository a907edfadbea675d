//! In-process world store.
//!
//! Holds every document in a map behind a lock. Used by the test suites and
//! single-process demos. An outage switch makes every call fail with
//! [`StoreError::Unavailable`] so data-layer failure paths can be driven.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use daws_types::{Domain, Entity, EntityId, WorldSettings};

use crate::error::StoreError;
use crate::store::{ClockCheckpoint, EntityCounts, EntityFilter, WorldStore};

/// In-memory [`WorldStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    outage: AtomicBool,
}

#[derive(Debug, Default)]
struct State {
    settings: Option<WorldSettings>,
    checkpoint: Option<ClockCheckpoint>,
    entities: HashMap<EntityId, Entity>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (`true`) or succeed again (`false`).
    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    /// Remove an entity, leaving jobs that reference it dangling.
    pub fn remove_entity(&self, id: EntityId) -> Result<Option<Entity>, StoreError> {
        Ok(self.lock()?.entities.remove(&id))
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(String::from(
                "memory store outage switched on",
            )));
        }
        self.state
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("memory store lock poisoned: {e}")))
    }
}

fn is_listed(entity: &Entity, domain: Domain, filter: EntityFilter) -> bool {
    match (entity, domain) {
        (Entity::Building(_), Domain::City) => true,
        (Entity::Person(person), Domain::Traffic) => {
            filter == EntityFilter::All || (person.traveling && person.is_alive())
        }
        _ => false,
    }
}

#[async_trait]
impl WorldStore for MemoryStore {
    async fn load_settings(&self) -> Result<Option<WorldSettings>, StoreError> {
        Ok(self.lock()?.settings.clone())
    }

    async fn save_settings(&self, settings: &WorldSettings) -> Result<(), StoreError> {
        self.lock()?.settings = Some(settings.clone());
        Ok(())
    }

    async fn list_entity_ids(
        &self,
        domain: Domain,
        filter: EntityFilter,
    ) -> Result<Vec<EntityId>, StoreError> {
        let state = self.lock()?;
        let mut ids: Vec<EntityId> = state
            .entities
            .values()
            .filter(|entity| is_listed(entity, domain, filter))
            .map(Entity::id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn create_entity(&self, entity: &Entity) -> Result<(), StoreError> {
        self.lock()?.entities.insert(entity.id(), entity.clone());
        Ok(())
    }

    async fn update_entity(&self, entity: &Entity) -> Result<(), StoreError> {
        self.lock()?.entities.insert(entity.id(), entity.clone());
        Ok(())
    }

    async fn get_entity(&self, id: EntityId) -> Result<Option<Entity>, StoreError> {
        Ok(self.lock()?.entities.get(&id).cloned())
    }

    async fn save_checkpoint(&self, checkpoint: &ClockCheckpoint) -> Result<(), StoreError> {
        self.lock()?.checkpoint = Some(*checkpoint);
        Ok(())
    }

    async fn load_checkpoint(&self) -> Result<Option<ClockCheckpoint>, StoreError> {
        Ok(self.lock()?.checkpoint)
    }

    async fn entity_counts(&self) -> Result<EntityCounts, StoreError> {
        let state = self.lock()?;
        let mut counts = EntityCounts::default();
        for entity in state.entities.values() {
            match entity {
                Entity::City(_) => counts.cities = counts.cities.saturating_add(1),
                Entity::Building(_) => counts.buildings = counts.buildings.saturating_add(1),
                Entity::Person(person) => {
                    counts.people = counts.people.saturating_add(1);
                    if person.traveling && person.is_alive() {
                        counts.travelers = counts.travelers.saturating_add(1);
                    }
                }
            }
        }
        Ok(counts)
    }
}
