//! Shared type definitions for the DAWS world simulation.
//!
//! This crate is the single source of truth for every type that crosses a
//! process boundary: identifiers, domain kinds, world settings, the wire
//! messages of the tick protocol, persisted entities, and the status
//! projections served to operators. Types flow to `TypeScript` via `ts-rs`
//! for the status page.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers
//! - [`domain`] -- Domain kinds (`city`, `traffic`)
//! - [`settings`] -- Versioned world settings broadcast with every tick
//! - [`messages`] -- Tick, job, outcome and controller report messages
//! - [`entities`] -- Cities, buildings and people
//! - [`status`] -- Coordinator status projections

pub mod domain;
pub mod entities;
pub mod ids;
pub mod messages;
pub mod settings;
pub mod status;

// Re-export all public types at crate root for convenience.
pub use domain::{Domain, UnknownDomain};
pub use entities::{Building, BuildingKind, City, DeathCause, Entity, Person, Point};
pub use ids::{ControllerId, EntityId};
pub use messages::{ControllerReport, JobMessage, JobOutcome, JobStatus, Partition, TickMessage};
pub use settings::{Disease, SETTINGS_VERSION, SpeedLimit, Trigger, WorldSettings};
pub use status::{ControllerView, CoordinatorPhase, CoordinatorStatus, DomainCount};
