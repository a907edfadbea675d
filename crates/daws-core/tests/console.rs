//! Integration tests for the operator console loop against a running
//! coordinator on the in-memory bus.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use daws_bus::{MemoryBus, RetryPolicy, topology};
use daws_core::console::{HELP, run_console};
use daws_core::{
    Coordinator, CoordinatorError, CoordinatorHandle, DawsConfig, TaskOptions, bootstrap,
    spawn_coordinator,
};
use daws_store::MemoryStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Running {
    handle: CoordinatorHandle,
    cancel: CancellationToken,
    task: JoinHandle<Result<Coordinator, CoordinatorError>>,
}

async fn launch() -> Running {
    let bus = MemoryBus::new();
    topology::declare_topology(&bus).await.unwrap();
    let store = Arc::new(MemoryStore::new());
    let mut config = DawsConfig::default();
    config.world.seed_world = false;
    let coordinator = bootstrap(store.as_ref(), &config, Utc::now()).await.unwrap();
    let cancel = CancellationToken::new();
    let (handle, task) = spawn_coordinator(
        coordinator,
        Arc::new(bus),
        store,
        TaskOptions {
            publish_policy: RetryPolicy::never(),
            sweep_interval: Duration::from_millis(20),
            checkpoint_every: 0,
        },
        cancel.clone(),
    );
    Running {
        handle,
        cancel,
        task,
    }
}

#[tokio::test]
async fn commands_are_answered_through_the_coordinator() {
    let running = launch().await;
    let input = b"status\nstop\ntrigger\n\nlaunch\nstart\nexit\nstatus\n".as_slice();
    let mut output = Vec::new();

    run_console(input, &mut output, &running.handle, &running.cancel)
        .await
        .unwrap();

    let text = String::from_utf8(output).unwrap();
    assert!(text.contains("phase:         awaiting controllers"));
    assert!(text.contains("emission halted (stopped)"));
    assert!(text.contains("trigger rejected: emission is stopped"));
    assert!(text.contains("unknown command: launch"));
    assert!(text.contains(HELP));
    assert!(text.contains("emission enabled"));
    assert!(text.ends_with("shutting down\n"));
    // Nothing after `exit` is read.
    assert_eq!(text.matches("phase:").count(), 1);

    assert!(running.cancel.is_cancelled());
    let coordinator = running.task.await.unwrap().unwrap();
    assert_eq!(coordinator.clock().ticks_emitted(), 0);
}

#[tokio::test]
async fn end_of_input_leaves_the_process_running() {
    let running = launch().await;
    let mut output = Vec::new();

    run_console(b"help\n".as_slice(), &mut output, &running.handle, &running.cancel)
        .await
        .unwrap();

    assert_eq!(String::from_utf8(output).unwrap(), HELP);
    assert!(!running.cancel.is_cancelled());
    assert!(running.handle.status().await.unwrap().running);

    running.cancel.cancel();
    running.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn cancellation_stops_a_waiting_console() {
    let running = launch().await;
    // The writer half stays open, so the console blocks on input.
    let (_keyboard, reader) = tokio::io::duplex(64);
    let mut output = Vec::new();

    let console = run_console(
        tokio::io::BufReader::new(reader),
        &mut output,
        &running.handle,
        &running.cancel,
    );
    let stopper = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        running.cancel.cancel();
    };
    let (result, ()) = tokio::time::timeout(Duration::from_secs(2), async {
        tokio::join!(console, stopper)
    })
    .await
    .expect("console did not stop on cancellation");

    result.unwrap();
    assert!(output.is_empty());
    running.task.await.unwrap().unwrap();
}
