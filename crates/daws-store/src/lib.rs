//! World store for the DAWS world simulation.
//!
//! The tick protocol treats persistence as a collaborator reached through
//! the narrow [`WorldStore`] interface: settings, the clock checkpoint, and
//! the cities, buildings and people that workers step.
//!
//! # Backends
//!
//! - [`DragonflyStore`] -- `Dragonfly` (Redis-compatible) via `fred`
//! - [`MemoryStore`] -- in-process, for tests and demos
//!
//! [`seed_world`] creates the starting world when a store is empty.

pub mod dragonfly;
pub mod error;
pub mod memory;
pub mod seed;
pub mod store;

pub use dragonfly::DragonflyStore;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use seed::{STARTING_CITIES, SeedPlan, build_world, seed_world};
pub use store::{ClockCheckpoint, EntityCounts, EntityFilter, SharedStore, WorldStore};
