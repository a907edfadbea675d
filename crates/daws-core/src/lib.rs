//! Tick coordination for the DAWS world simulation.
//!
//! This crate owns the barrier that advances the simulated world: a
//! coordinator emits Tick(n + 1) on every domain's tick queue only once
//! every registered domain controller reported ready for Tick(n).
//!
//! # Modules
//!
//! - [`clock`] -- Simulated clock with checked advancement and checkpoints.
//! - [`config`] -- Configuration loading from `daws-config.yaml` into
//!   strongly-typed structs.
//! - [`registry`] -- Controller registry with the readiness computation.
//! - [`coordinator`] -- The coordinator state machine and its task.
//! - [`operator`] -- [`CoordinatorHandle`] used by the console and HTTP API.
//! - [`console`] -- Line-oriented operator console.
//! - [`runtime`] -- Logging setup and backend selection for the binaries.
//!
//! [`CoordinatorHandle`]: operator::CoordinatorHandle

pub mod clock;
pub mod config;
pub mod console;
pub mod coordinator;
pub mod operator;
pub mod registry;
pub mod runtime;

pub use clock::{ClockError, SimClock};
pub use config::{BusBackend, ConfigError, DawsConfig, LogFormat, StoreBackend};
pub use coordinator::{
    Coordinator, CoordinatorError, CoordinatorOptions, TaskOptions, bootstrap, spawn_coordinator,
};
pub use operator::{Command, CoordinatorHandle};
pub use registry::{ControllerRecord, ControllerRegistry, ReportEffect};
pub use runtime::{connect_bus, init_tracing, open_store};
