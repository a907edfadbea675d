//! HTTP API for the DAWS world coordinator.
//!
//! This crate provides an Axum server that exposes:
//!
//! - **Status page** (`GET /`) with the coordinator phase, tick count,
//!   simulated time and registered controllers
//! - **Status API** (`GET /api/status`) returning the full
//!   [`CoordinatorStatus`] as JSON
//! - **Control API** (`POST /api/trigger`, `POST /api/start`,
//!   `POST /api/stop`, and the legacy `GET /api/triggerNext`)
//!
//! # Architecture
//!
//! Handlers hold a [`CoordinatorHandle`] and never touch coordinator state
//! directly. Every request becomes a command processed inside the
//! coordinator task, so an HTTP trigger obeys the same barrier rules as
//! the console.
//!
//! [`CoordinatorStatus`]: daws_types::CoordinatorStatus
//! [`CoordinatorHandle`]: daws_core::CoordinatorHandle

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;

pub use error::ObserverError;
pub use router::build_router;
pub use server::{ServerConfig, ServerError, start_server};
pub use state::AppState;
