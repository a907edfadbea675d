//! Process setup shared by the binaries: logging and backend selection.

use std::sync::Arc;

use daws_bus::{BusError, JetStreamBus, MemoryBus, SharedBus, topology};
use daws_store::{DragonflyStore, MemoryStore, SharedStore, StoreError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{BusBackend, BusConfig, LogFormat, LoggingConfig, StoreBackend, StoreConfig};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match config.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Connect the configured bus and declare the protocol topology.
///
/// # Errors
///
/// Returns [`BusError::Unavailable`] once the connect retries run out, or
/// the first declaration failure.
pub async fn connect_bus(config: &BusConfig) -> Result<SharedBus, BusError> {
    let bus: SharedBus = match config.backend {
        BusBackend::Nats => Arc::new(
            JetStreamBus::connect(
                &config.url,
                &config.connect_policy(),
                config.jetstream_options(),
            )
            .await?,
        ),
        BusBackend::Memory => {
            warn!("using the in-memory bus; other processes cannot join");
            Arc::new(MemoryBus::new())
        }
    };
    let policy = config.connect_policy();
    let declared = bus.as_ref();
    policy
        .run("declare topology", move || topology::declare_topology(declared))
        .await?;
    info!(queues = topology::all_queues().len(), "bus topology declared");
    Ok(bus)
}

/// Open the configured world store.
///
/// # Errors
///
/// Returns the store's connection error.
pub async fn open_store(config: &StoreConfig) -> Result<SharedStore, StoreError> {
    match config.backend {
        StoreBackend::Dragonfly => Ok(Arc::new(DragonflyStore::connect(&config.url).await?)),
        StoreBackend::Memory => {
            warn!("using the in-memory store; world state is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
