//! The narrow data-access interface used by the tick protocol.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use daws_types::{Domain, Entity, EntityId, WorldSettings};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Shared handle to a store implementation.
pub type SharedStore = Arc<dyn WorldStore>;

/// Which entities of a domain to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntityFilter {
    /// Every entity of the domain.
    All,
    /// Entities that need a step this tick: every building for `city`,
    /// travelling people for `traffic`.
    #[default]
    Active,
}

/// Persisted position of the simulated clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockCheckpoint {
    /// Ticks emitted so far.
    pub ticks_emitted: u64,
    /// Simulated time after the last emitted tick.
    pub sim_time: DateTime<Utc>,
    /// Wall-clock time the checkpoint was written.
    pub saved_at: DateTime<Utc>,
}

/// Number of stored entities by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntityCounts {
    /// Cities.
    pub cities: u64,
    /// Buildings.
    pub buildings: u64,
    /// People.
    pub people: u64,
    /// People currently travelling.
    pub travelers: u64,
}

impl EntityCounts {
    /// Whether the store holds no world at all.
    pub const fn is_empty(&self) -> bool {
        self.cities == 0 && self.buildings == 0 && self.people == 0
    }
}

/// World persistence consumed by the coordinator, controllers and workers.
#[async_trait]
pub trait WorldStore: Send + Sync + 'static {
    /// Load the settings blob, if one was ever saved.
    async fn load_settings(&self) -> Result<Option<WorldSettings>, StoreError>;

    /// Insert or replace the settings blob.
    async fn save_settings(&self, settings: &WorldSettings) -> Result<(), StoreError>;

    /// Ids of the entities `domain` steps, sorted.
    async fn list_entity_ids(
        &self,
        domain: Domain,
        filter: EntityFilter,
    ) -> Result<Vec<EntityId>, StoreError>;

    /// Store a new entity and index it.
    async fn create_entity(&self, entity: &Entity) -> Result<(), StoreError>;

    /// Replace an entity and refresh its indexes.
    async fn update_entity(&self, entity: &Entity) -> Result<(), StoreError>;

    /// Fetch one entity.
    async fn get_entity(&self, id: EntityId) -> Result<Option<Entity>, StoreError>;

    /// Persist the clock position.
    async fn save_checkpoint(&self, checkpoint: &ClockCheckpoint) -> Result<(), StoreError>;

    /// Load the last persisted clock position.
    async fn load_checkpoint(&self) -> Result<Option<ClockCheckpoint>, StoreError>;

    /// Count stored entities by kind.
    async fn entity_counts(&self) -> Result<EntityCounts, StoreError>;
}
