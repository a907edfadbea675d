//! Domain side of the DAWS tick protocol.
//!
//! For every domain (`city`, `traffic`) a set of [`DomainController`]s turns
//! each tick message into one job per active entity, and a [`WorkerPool`]
//! consumes those jobs and runs the domain's [`EntityStep`]. Controllers
//! report readiness to the coordinator once their jobs drain.
//!
//! # Modules
//!
//! - [`controller`] -- Fan-out and drain watch per controller.
//! - [`ledger`] -- Per-tick record of fanned-out jobs.
//! - [`worker`] -- Job consumers and their settlement rules.
//! - [`steps`] -- Per-entity updates for each domain.
//! - [`error`] -- Error types.

pub mod controller;
pub mod error;
pub mod ledger;
pub mod steps;
pub mod worker;

pub use controller::{ControllerOptions, DomainController};
pub use error::{ControllerError, StepError, WorkerError};
pub use ledger::{FanoutLedger, Registration};
pub use steps::{CityStep, EntityStep, SharedStep, TrafficStep, step_for};
pub use worker::{Settlement, Worker, WorkerOptions, WorkerPool};
