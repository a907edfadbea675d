//! `Dragonfly` (Redis-compatible) world store.
//!
//! # Key Patterns
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `world:settings` | JSON | Current [`WorldSettings`] |
//! | `world:clock` | JSON | Last [`ClockCheckpoint`] |
//! | `entity:{id}` | JSON | Full [`Entity`] document |
//! | `index:cities` | Set | City ids |
//! | `index:buildings` | Set | Building ids |
//! | `index:people` | Set | Person ids |
//! | `index:travelers` | Set | Ids of people currently travelling |

use async_trait::async_trait;
use daws_types::{Domain, Entity, EntityId, WorldSettings};
use fred::prelude::*;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;
use crate::store::{ClockCheckpoint, EntityCounts, EntityFilter, WorldStore};

const SETTINGS_KEY: &str = "world:settings";
const CLOCK_KEY: &str = "world:clock";
const CITIES_KEY: &str = "index:cities";
const BUILDINGS_KEY: &str = "index:buildings";
const PEOPLE_KEY: &str = "index:people";
const TRAVELERS_KEY: &str = "index:travelers";

fn entity_key(id: EntityId) -> String {
    format!("entity:{id}")
}

const fn index_key(entity: &Entity) -> &'static str {
    match entity {
        Entity::City(_) => CITIES_KEY,
        Entity::Building(_) => BUILDINGS_KEY,
        Entity::Person(_) => PEOPLE_KEY,
    }
}

/// Connection handle to a `Dragonfly` instance.
#[derive(Clone)]
pub struct DragonflyStore {
    client: Client,
}

impl DragonflyStore {
    /// Connect to `Dragonfly` at the given URL.
    ///
    /// The URL follows the Redis scheme: `redis://host:port` or
    /// `redis://host:port/db`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the URL cannot be parsed.
    /// Returns [`StoreError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let config = Config::from_url(url)
            .map_err(|e| StoreError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!("Connected to Dragonfly");
        Ok(Self { client })
    }

    async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string(value)?;
        let _: () = self.client.set(key, json.as_str(), None, None, false).await?;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let value: Option<String> = self.client.get(key).await?;
        value
            .map(|s| serde_json::from_str(&s).map_err(StoreError::from))
            .transpose()
    }

    async fn members(&self, key: &str) -> Result<Vec<EntityId>, StoreError> {
        let raw: Vec<String> = self.client.smembers(key).await?;
        let mut ids = raw
            .iter()
            .map(|member| {
                member.parse::<EntityId>().map_err(|e| StoreError::Corrupt {
                    key: key.to_owned(),
                    detail: format!("member {member} is not an entity id: {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        ids.sort_unstable();
        Ok(ids)
    }

    async fn count(&self, key: &str) -> Result<u64, StoreError> {
        let count: u64 = self.client.scard(key).await?;
        Ok(count)
    }

    async fn refresh_travel_index(&self, entity: &Entity) -> Result<(), StoreError> {
        if let Entity::Person(person) = entity {
            let member = person.id.to_string();
            if person.traveling && person.is_alive() {
                let _: u32 = self.client.sadd(TRAVELERS_KEY, member.as_str()).await?;
            } else {
                let _: u32 = self.client.srem(TRAVELERS_KEY, member.as_str()).await?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for DragonflyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DragonflyStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl WorldStore for DragonflyStore {
    async fn load_settings(&self) -> Result<Option<WorldSettings>, StoreError> {
        self.get_json(SETTINGS_KEY).await
    }

    async fn save_settings(&self, settings: &WorldSettings) -> Result<(), StoreError> {
        self.set_json(SETTINGS_KEY, settings).await
    }

    async fn list_entity_ids(
        &self,
        domain: Domain,
        filter: EntityFilter,
    ) -> Result<Vec<EntityId>, StoreError> {
        let key = match (domain, filter) {
            (Domain::City, _) => BUILDINGS_KEY,
            (Domain::Traffic, EntityFilter::All) => PEOPLE_KEY,
            (Domain::Traffic, EntityFilter::Active) => TRAVELERS_KEY,
        };
        self.members(key).await
    }

    async fn create_entity(&self, entity: &Entity) -> Result<(), StoreError> {
        let id = entity.id();
        self.set_json(&entity_key(id), entity).await?;
        let _: u32 = self
            .client
            .sadd(index_key(entity), id.to_string().as_str())
            .await?;
        self.refresh_travel_index(entity).await
    }

    async fn update_entity(&self, entity: &Entity) -> Result<(), StoreError> {
        self.set_json(&entity_key(entity.id()), entity).await?;
        self.refresh_travel_index(entity).await
    }

    async fn get_entity(&self, id: EntityId) -> Result<Option<Entity>, StoreError> {
        self.get_json(&entity_key(id)).await
    }

    async fn save_checkpoint(&self, checkpoint: &ClockCheckpoint) -> Result<(), StoreError> {
        self.set_json(CLOCK_KEY, checkpoint).await
    }

    async fn load_checkpoint(&self) -> Result<Option<ClockCheckpoint>, StoreError> {
        self.get_json(CLOCK_KEY).await
    }

    async fn entity_counts(&self) -> Result<EntityCounts, StoreError> {
        Ok(EntityCounts {
            cities: self.count(CITIES_KEY).await?,
            buildings: self.count(BUILDINGS_KEY).await?,
            people: self.count(PEOPLE_KEY).await?,
            travelers: self.count(TRAVELERS_KEY).await?,
        })
    }
}
