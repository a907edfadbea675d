//! Integration tests for the `daws-store` world store.
//!
//! The `MemoryStore` tests run everywhere. The `Dragonfly` tests require a
//! live Dragonfly (or Redis) instance. Run them with:
//!
//! ```bash
//! docker run -d -p 6379:6379 docker.dragonflydb.io/dragonflydb/dragonfly
//! cargo test -p daws-store -- --ignored
//! ```

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic
)]

use chrono::Utc;
use daws_store::{
    ClockCheckpoint, DragonflyStore, EntityFilter, MemoryStore, SeedPlan, StoreError,
    WorldStore, seed_world,
};
use daws_types::{Domain, Entity, WorldSettings};

/// Dragonfly connection URL for the local Docker instance.
const DRAGONFLY_URL: &str = "redis://localhost:6379";

fn small_plan() -> SeedPlan {
    SeedPlan {
        buildings_per_city: 4,
        people_per_city: 6,
        traveling_percent: 50,
    }
}

// =============================================================================
// MemoryStore
// =============================================================================

#[tokio::test]
async fn seeding_is_skipped_when_a_world_exists() {
    let store = MemoryStore::new();
    let first = seed_world(&store, &small_plan(), Some(3), Utc::now())
        .await
        .unwrap();
    assert_eq!(first.cities, 4);
    assert_eq!(first.buildings, 16);
    assert_eq!(first.people, 24);

    let second = seed_world(&store, &small_plan(), Some(4), Utc::now())
        .await
        .unwrap();
    assert_eq!(second, first);
}

#[tokio::test]
async fn traffic_lists_only_travellers() {
    let store = MemoryStore::new();
    let counts = seed_world(&store, &small_plan(), Some(9), Utc::now())
        .await
        .unwrap();

    let active = store
        .list_entity_ids(Domain::Traffic, EntityFilter::Active)
        .await
        .unwrap();
    let all = store
        .list_entity_ids(Domain::Traffic, EntityFilter::All)
        .await
        .unwrap();
    assert_eq!(u64::try_from(active.len()).unwrap(), counts.travelers);
    assert_eq!(u64::try_from(all.len()).unwrap(), counts.people);

    for id in active {
        let entity = store.get_entity(id).await.unwrap().unwrap();
        assert!(matches!(entity, Entity::Person(ref p) if p.traveling));
    }
}

#[tokio::test]
async fn outage_switch_fails_calls() {
    let store = MemoryStore::new();
    store.set_outage(true);
    let err = store.load_settings().await.unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(_)));
    assert!(err.is_transient());
    store.set_outage(false);
    assert!(store.load_settings().await.unwrap().is_none());
}

// =============================================================================
// Dragonfly (live)
// =============================================================================

#[tokio::test]
#[ignore = "requires a live Dragonfly instance"]
async fn dragonfly_settings_and_checkpoint_round_trip() {
    let store = DragonflyStore::connect(DRAGONFLY_URL)
        .await
        .expect("Failed to connect to Dragonfly -- is Docker running?");

    let settings = WorldSettings::defaults_at(Utc::now());
    store.save_settings(&settings).await.unwrap();
    let loaded = store.load_settings().await.unwrap().unwrap();
    assert_eq!(loaded.world_speed_ms, settings.world_speed_ms);
    assert_eq!(loaded.speed_limits, settings.speed_limits);

    let checkpoint = ClockCheckpoint {
        ticks_emitted: 42,
        sim_time: Utc::now(),
        saved_at: Utc::now(),
    };
    store.save_checkpoint(&checkpoint).await.unwrap();
    assert_eq!(store.load_checkpoint().await.unwrap(), Some(checkpoint));
}

#[tokio::test]
#[ignore = "requires a live Dragonfly instance"]
async fn dragonfly_travel_index_follows_updates() {
    let store = DragonflyStore::connect(DRAGONFLY_URL)
        .await
        .expect("Failed to connect to Dragonfly -- is Docker running?");
    let mut rng = <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(5);
    let world = daws_store::build_world(&mut rng, &small_plan(), Utc::now());
    let Some(Entity::Person(mut person)) = world
        .into_iter()
        .find(|entity| matches!(entity, Entity::Person(p) if p.traveling))
    else {
        panic!("seeded world has no traveller");
    };

    store.create_entity(&Entity::Person(person.clone())).await.unwrap();
    let active = store
        .list_entity_ids(Domain::Traffic, EntityFilter::Active)
        .await
        .unwrap();
    assert!(active.contains(&person.id));

    person.traveling = false;
    store.update_entity(&Entity::Person(person.clone())).await.unwrap();
    let active = store
        .list_entity_ids(Domain::Traffic, EntityFilter::Active)
        .await
        .unwrap();
    assert!(!active.contains(&person.id));
}
