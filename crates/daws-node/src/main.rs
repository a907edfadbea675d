//! Domain node process for the DAWS simulation.
//!
//! Runs either one domain controller or a pool of workers for one domain.
//! Any number of nodes can join a running world; controllers of the same
//! domain split the entity set between them and workers compete for jobs.
//!
//! Stops on Ctrl-C. A controller purges its domain's job queue and
//! announces its exit on the way out; workers finish the job in hand.

mod args;

use std::time::Duration;

use anyhow::Context;
use daws_core::{BusBackend, DawsConfig, connect_bus, init_tracing, open_store};
use daws_domain::{ControllerOptions, DomainController, WorkerOptions, WorkerPool, step_for};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::args::{NodeArgs, Role, USAGE};

/// How long runtime shutdown waits for blocking work.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn main() -> anyhow::Result<()> {
    let args = NodeArgs::parse(std::env::args().skip(1), |key| std::env::var(key).ok())
        .with_context(|| USAGE.to_owned())?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build the async runtime")?;
    let result = runtime.block_on(run(args));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

async fn run(args: NodeArgs) -> anyhow::Result<()> {
    let config = DawsConfig::load_or_default(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    init_tracing(&config.logging);
    info!(role = ?args.role, domain = %args.domain, "daws-node starting");
    if config.bus.backend == BusBackend::Memory {
        warn!("in-memory bus selected; this node cannot reach a coordinator in another process");
    }

    let store = open_store(&config.store)
        .await
        .context("failed to open the world store")?;
    let bus = connect_bus(&config.bus)
        .await
        .context("failed to connect to the message bus")?;

    let cancel = CancellationToken::new();
    let shutdown = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("interrupt received, shutting down"),
                Err(e) => warn!(error = %e, "failed to listen for Ctrl-C"),
            }
            cancel.cancel();
        })
    };

    let result = match args.role {
        Role::Controller => {
            let controller = DomainController::new(
                args.domain,
                bus,
                store,
                ControllerOptions::from_config(&config),
            );
            info!(controller = %controller.id(), "controller starting");
            controller
                .run(cancel.clone())
                .await
                .context("controller failed")
        }
        Role::Worker => {
            let pool = WorkerPool::spawn(
                &bus,
                &step_for(args.domain, store),
                WorkerOptions::from_config(&config),
                &cancel,
            );
            pool.join()
                .await
                .map(|handled| info!(handled = handled, "workers stopped"))
                .context("worker pool failed")
        }
    };

    cancel.cancel();
    shutdown.abort();
    info!(domain = %args.domain, "daws-node shutdown complete");
    result
}
