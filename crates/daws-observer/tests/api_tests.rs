//! Integration tests for the HTTP API.
//!
//! Tests drive the Axum `Router` directly via `tower::ServiceExt` against a
//! real coordinator task running on the in-memory bus.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use daws_bus::{MemoryBus, MessageBus, RetryPolicy, publish_json, topology};
use daws_core::{
    Coordinator, CoordinatorError, CoordinatorHandle, DawsConfig, TaskOptions, bootstrap,
    spawn_coordinator,
};
use daws_observer::{AppState, build_router};
use daws_store::MemoryStore;
use daws_types::{ControllerId, ControllerReport, CoordinatorStatus, Domain};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct World {
    bus: MemoryBus,
    handle: CoordinatorHandle,
    cancel: CancellationToken,
    task: JoinHandle<Result<Coordinator, CoordinatorError>>,
}

impl World {
    fn router(&self) -> Router {
        build_router(AppState::new(self.handle.clone()))
    }
}

async fn launch() -> World {
    let bus = MemoryBus::new();
    topology::declare_topology(&bus).await.unwrap();
    let store = Arc::new(MemoryStore::new());
    let mut config = DawsConfig::default();
    config.world.seed_world = false;
    config.coordinator.sweep_interval_ms = 20;
    let coordinator = bootstrap(store.as_ref(), &config, Utc::now()).await.unwrap();
    let cancel = CancellationToken::new();
    let (handle, task) = spawn_coordinator(
        coordinator,
        Arc::new(bus.clone()),
        store,
        TaskOptions {
            publish_policy: RetryPolicy::never(),
            sweep_interval: Duration::from_millis(20),
            checkpoint_every: 0,
        },
        cancel.clone(),
    );
    World {
        bus,
        handle,
        cancel,
        task,
    }
}

/// Register a controller with its tick group and announce it.
async fn join(bus: &MemoryBus, domain: Domain) -> ControllerId {
    let id = ControllerId::new();
    bus.declare_group(topology::tick_queue(domain), &topology::controller_group(id))
        .await
        .unwrap();
    report(bus, ControllerReport::join(id, domain)).await;
    id
}

async fn report(bus: &MemoryBus, report: ControllerReport) {
    publish_json(bus, topology::CONTROL_QUEUE, &report)
        .await
        .unwrap();
}

async fn wait_until(
    handle: &CoordinatorHandle,
    what: &str,
    check: impl Fn(&CoordinatorStatus) -> bool,
) {
    for _ in 0..200 {
        if check(&handle.status().await.unwrap()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("coordinator never reached: {what}");
}

fn ready_count(status: &CoordinatorStatus, domain: Domain) -> u32 {
    status
        .domains
        .iter()
        .find(|count| count.domain == domain)
        .map_or(0, |count| count.ready)
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send(router: Router, method: &str, path: &str) -> (StatusCode, Value) {
    let response = router
        .oneshot(
            Request::builder()
                .method(method)
                .uri(path)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    (status, body_to_json(response.into_body()).await)
}

#[tokio::test]
async fn test_index_returns_html() {
    let world = launch().await;

    let response = world
        .router()
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.contains("text/html"));
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let page = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(page.contains("awaiting controllers"));
}

#[tokio::test]
async fn test_status_reports_phase_and_ticks() {
    let world = launch().await;

    let (status, json) = send(world.router(), "GET", "/api/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["phase"], "awaiting_controllers");
    assert_eq!(json["running"], true);
    assert_eq!(json["ticks_emitted"], 0);
    assert_eq!(json["controllers"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_trigger_without_controllers_is_a_conflict() {
    let world = launch().await;

    let (status, json) = send(world.router(), "POST", "/api/trigger").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["status"], 409);
    assert!(json["error"].as_str().unwrap().starts_with("no ready"));

    let (status, _) = send(world.router(), "GET", "/api/triggerNext").await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_stop_blocks_trigger_until_start() {
    let world = launch().await;

    let (status, json) = send(world.router(), "POST", "/api/stop").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["running"], false);
    assert_eq!(json["phase"], "stopped");

    let (status, json) = send(world.router(), "POST", "/api/trigger").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "emission is stopped");

    let (status, json) = send(world.router(), "POST", "/api/start").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["running"], true);
}

#[tokio::test]
async fn test_trigger_emits_past_a_busy_controller() {
    let world = launch().await;
    let city_a = join(&world.bus, Domain::City).await;
    let _city_b = join(&world.bus, Domain::City).await;
    let traffic = join(&world.bus, Domain::Traffic).await;

    wait_until(&world.handle, "tick 1 emitted", |s| s.ticks_emitted == 1).await;
    report(&world.bus, ControllerReport::ready(city_a, Domain::City, 1)).await;
    report(&world.bus, ControllerReport::ready(traffic, Domain::Traffic, 1)).await;
    wait_until(&world.handle, "one ready controller per domain", |s| {
        ready_count(s, Domain::City) == 1 && ready_count(s, Domain::Traffic) == 1
    })
    .await;

    let (status, json) = send(world.router(), "POST", "/api/trigger").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(json["tick"], 2);

    let (_, json) = send(world.router(), "GET", "/api/status").await;
    assert_eq!(json["ticks_emitted"], 2);
    assert_eq!(json["forced_ticks"], 1);
}

#[tokio::test]
async fn test_stopped_coordinator_is_unavailable() {
    let world = launch().await;
    let router = world.router();
    world.cancel.cancel();
    world.task.await.unwrap().unwrap();

    let (status, json) = send(router, "GET", "/api/status").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], 503);
}
