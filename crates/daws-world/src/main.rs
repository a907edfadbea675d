//! World coordinator process for the DAWS simulation.
//!
//! Owns the simulated clock and the tick barrier. Controllers and workers
//! run as separate `daws-node` processes and reach the coordinator only
//! through the bus. With `bus.backend: memory` the process also hosts one
//! controller and one worker pool per domain, which gives a complete
//! single-process world for demos.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `daws-config.yaml` (path overridable as the
//!    first argument or through `DAWS_CONFIG`)
//! 2. Initialize structured logging
//! 3. Open the world store and connect to the bus
//! 4. Load settings, restore the clock checkpoint, seed the world
//! 5. Spawn the coordinator task, HTTP API and console
//! 6. Wait for `exit`, Ctrl-C, or a fatal coordinator error
//! 7. Persist settings and the clock checkpoint, then exit

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use daws_bus::SharedBus;
use daws_core::console::run_console;
use daws_core::{
    BusBackend, DawsConfig, TaskOptions, bootstrap, connect_bus, init_tracing, open_store,
    spawn_coordinator,
};
use daws_domain::{ControllerOptions, DomainController, WorkerOptions, WorkerPool, step_for};
use daws_observer::{AppState, ServerConfig, start_server};
use daws_store::SharedStore;
use daws_types::Domain;
use tokio::io::BufReader;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG: &str = "daws-config.yaml";

/// How long runtime shutdown waits for blocking work such as a pending
/// console read.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build the async runtime")?;
    let result = runtime.block_on(run());
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

#[allow(clippy::too_many_lines)]
async fn run() -> anyhow::Result<()> {
    let path = config_path();
    let config = DawsConfig::load_or_default(&path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    init_tracing(&config.logging);
    info!(
        config = %path.display(),
        required = ?config.world.required_domains,
        step_seconds = config.world.step_seconds,
        "daws-world starting"
    );

    let store = open_store(&config.store)
        .await
        .context("failed to open the world store")?;
    let bus = connect_bus(&config.bus)
        .await
        .context("failed to connect to the message bus")?;
    let coordinator = bootstrap(store.as_ref(), &config, Utc::now())
        .await
        .context("failed to restore world state")?;

    let cancel = CancellationToken::new();
    let (handle, mut coordinator_task) = spawn_coordinator(
        coordinator,
        Arc::clone(&bus),
        Arc::clone(&store),
        TaskOptions::from_config(&config),
        cancel.clone(),
    );

    let local = if config.bus.backend == BusBackend::Memory {
        spawn_local_domains(&config, &bus, &store, &cancel)
    } else {
        Vec::new()
    };

    let server = config.observer.enabled.then(|| {
        let server_config = ServerConfig::from(&config.observer);
        let state = AppState::new(handle.clone());
        let cancel = cancel.clone();
        tokio::spawn(async move { start_server(&server_config, state, cancel).await })
    });

    let console = {
        let handle = handle.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let input = BufReader::new(tokio::io::stdin());
            run_console(input, tokio::io::stdout(), &handle, &cancel).await
        })
    };

    let finished_early = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            info!("interrupt received, shutting down");
            None
        }
        () = cancel.cancelled() => {
            info!("shutdown requested");
            None
        }
        joined = &mut coordinator_task => Some(joined),
    };
    cancel.cancel();

    let joined = match finished_early {
        Some(joined) => joined,
        None => coordinator_task.await,
    };
    for (name, task) in local {
        if let Err(e) = task.await {
            warn!(task = name, error = %e, "in-process domain task failed");
        }
    }
    if let Some(server) = server {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "HTTP API failed"),
            Err(e) => warn!(error = %e, "HTTP API task failed"),
        }
    }
    if console.is_finished() {
        if let Ok(Err(e)) = console.await {
            warn!(error = %e, "console failed");
        }
    } else {
        console.abort();
    }

    let coordinator = joined
        .context("coordinator task panicked")?
        .context("coordinator failed")?;
    let status = coordinator.status(Utc::now());
    info!(
        ticks = status.ticks_emitted,
        sim_time = %status.sim_time,
        forced = status.forced_ticks,
        slow = status.slow_ticks,
        "daws-world shutdown complete"
    );
    Ok(())
}

/// Resolve the configuration path from the first argument, `DAWS_CONFIG`,
/// or the default file name.
fn config_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("DAWS_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG))
}

type LocalTask = (&'static str, JoinHandle<()>);

/// Run one controller and one worker pool per domain inside this process.
fn spawn_local_domains(
    config: &DawsConfig,
    bus: &SharedBus,
    store: &SharedStore,
    cancel: &CancellationToken,
) -> Vec<LocalTask> {
    let controller_options = ControllerOptions::from_config(config);
    let worker_options = WorkerOptions::from_config(config);
    let mut tasks = Vec::new();
    for domain in Domain::ALL {
        let controller = DomainController::new(
            domain,
            Arc::clone(bus),
            Arc::clone(store),
            controller_options,
        );
        let running = controller.spawn(cancel.clone());
        tasks.push((
            "controller",
            tokio::spawn(async move {
                match running.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(domain = %domain, error = %e, "controller failed"),
                    Err(e) => error!(domain = %domain, error = %e, "controller task failed"),
                }
            }),
        ));

        let pool = WorkerPool::spawn(
            bus,
            &step_for(domain, Arc::clone(store)),
            worker_options,
            cancel,
        );
        tasks.push((
            "workers",
            tokio::spawn(async move {
                if let Err(e) = pool.join().await {
                    error!(domain = %domain, error = %e, "worker pool failed");
                }
            }),
        ));
    }
    info!(domains = Domain::ALL.len(), "in-process controllers and workers started");
    tasks
}
