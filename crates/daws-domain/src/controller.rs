//! Domain controller: turns one tick message into per-entity jobs and
//! reports readiness once they drain.
//!
//! A controller subscribes to its domain's tick queue and outcome queue
//! through a private group, so every controller of a domain sees every
//! tick. On a tick it:
//!
//! 1. looks up its share of the entity set from the roster in the tick,
//! 2. registers the jobs in its [`FanoutLedger`],
//! 3. acknowledges the tick (only after registration),
//! 4. publishes one job per entity to the shared job queue,
//! 5. reports `ready` once every job it published has an outcome and the
//!    job queue is empty, or with a degradation detail once the drain
//!    timeout passes.
//!
//! A controller that is not on the tick's roster (it joined after
//! emission) owns no entities and reports ready immediately. A tick that was
//! already reported, or has fallen out of the ledger, is answered with
//! `ready` again without any fan-out.

use std::time::Duration;

use daws_bus::topology::{self, CONTROL_QUEUE};
use daws_bus::{BusError, Delivery, RetryPolicy, SharedBus, Subscription, decode, publish_json};
use daws_core::DawsConfig;
use daws_store::{EntityFilter, SharedStore};
use daws_types::{
    ControllerId, ControllerReport, Domain, EntityId, JobMessage, JobOutcome, JobStatus, TickMessage,
};
use futures::{StreamExt, stream};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ControllerError;
use crate::ledger::{FanoutLedger, Registration};

/// Controller tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    /// How often open ticks are checked for drain.
    pub drain_poll: Duration,
    /// How long a tick may stay open before the controller gives up on it.
    pub drain_timeout: Duration,
    /// Job publishes in flight at once during fan-out.
    pub fanout_concurrency: usize,
    /// Ticks remembered for redelivery detection.
    pub retain_ticks: u64,
    /// Idle time after which the controller re-announces itself.
    pub rejoin_interval: Duration,
    /// Retry schedule for publishes and queue reads.
    pub publish_policy: RetryPolicy,
}

impl ControllerOptions {
    /// Options described by `config`.
    pub fn from_config(config: &DawsConfig) -> Self {
        Self {
            drain_poll: Duration::from_millis(config.controller.drain_poll_ms),
            drain_timeout: Duration::from_millis(config.controller.drain_timeout_ms),
            fanout_concurrency: config.controller.fanout_concurrency,
            retain_ticks: config.controller.retain_ticks,
            rejoin_interval: Duration::from_millis(config.controller.rejoin_interval_ms),
            publish_policy: config.bus.publish_policy(),
        }
    }
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            drain_poll: Duration::from_millis(100),
            drain_timeout: Duration::from_secs(120),
            fanout_concurrency: 64,
            retain_ticks: 4,
            rejoin_interval: Duration::from_secs(15),
            publish_policy: RetryPolicy::default(),
        }
    }
}

/// A controller for one domain.
pub struct DomainController {
    id: ControllerId,
    domain: Domain,
    bus: SharedBus,
    store: SharedStore,
    options: ControllerOptions,
    ledger: FanoutLedger,
    last_report: Instant,
}

impl std::fmt::Debug for DomainController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainController")
            .field("id", &self.id)
            .field("domain", &self.domain)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl DomainController {
    /// Create a controller with a fresh id.
    pub fn new(
        domain: Domain,
        bus: SharedBus,
        store: SharedStore,
        options: ControllerOptions,
    ) -> Self {
        Self {
            id: ControllerId::new(),
            domain,
            bus,
            store,
            ledger: FanoutLedger::new(options.retain_ticks),
            options,
            last_report: Instant::now(),
        }
    }

    /// This controller's id.
    pub const fn id(&self) -> ControllerId {
        self.id
    }

    /// Domain served.
    pub const fn domain(&self) -> Domain {
        self.domain
    }

    /// Run the controller on a new task.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<Result<(), ControllerError>> {
        tokio::spawn(self.run(cancel))
    }

    /// Join, serve ticks until cancelled, then exit.
    ///
    /// On the way out the controller purges its domain's job queue,
    /// announces its exit and drops its private groups.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Bus`] if the bus stays unreachable past
    /// the retry budget. The exit steps still run.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), ControllerError> {
        let result = self.serve(&cancel).await;
        if let Err(e) = &result {
            warn!(controller = %self.id, error = %e, "controller failed");
        }
        self.exit().await;
        result
    }

    async fn serve(&mut self, cancel: &CancellationToken) -> Result<(), ControllerError> {
        let group = topology::controller_group(self.id);
        let tick_queue = topology::tick_queue(self.domain);
        let outcome_queue = topology::outcome_queue(self.domain);
        let policy = self.options.publish_policy;
        {
            let bus = self.bus.as_ref();
            let group = group.as_str();
            policy
                .run("declare controller groups", move || async move {
                    topology::declare_topology(bus).await?;
                    bus.declare_group(tick_queue, group).await?;
                    bus.declare_group(outcome_queue, group).await
                })
                .await?;
        }
        let mut ticks = self.subscribe(tick_queue, &group).await?;
        let mut outcomes = self.subscribe(outcome_queue, &group).await?;

        self.send(&ControllerReport::join(self.id, self.domain)).await?;
        info!(controller = %self.id, domain = %self.domain, "controller joined");

        let mut poll = tokio::time::interval(self.options.drain_poll);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0_u32;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                next = ticks.next() => match next {
                    Ok(delivery) => {
                        failures = 0;
                        self.handle_tick(delivery).await;
                    }
                    Err(e) => self.read_failed(e, &mut failures).await?,
                },
                next = outcomes.next() => match next {
                    Ok(delivery) => {
                        failures = 0;
                        self.handle_outcome(delivery).await;
                    }
                    Err(e) => self.read_failed(e, &mut failures).await?,
                },
                _ = poll.tick() => self.poll().await,
            }
        }
    }

    async fn subscribe(
        &self,
        queue: &'static str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, BusError> {
        let bus = self.bus.as_ref();
        self.options
            .publish_policy
            .run("open subscription", move || bus.consume(queue, group, 1))
            .await
    }

    async fn read_failed(&self, e: BusError, failures: &mut u32) -> Result<(), ControllerError> {
        if !e.is_transient() {
            return Err(e.into());
        }
        *failures = failures.saturating_add(1);
        if *failures >= self.options.publish_policy.max_attempts.max(1) {
            return Err(e.into());
        }
        warn!(controller = %self.id, error = %e, "queue read failed");
        tokio::time::sleep(self.options.publish_policy.backoff(*failures)).await;
        Ok(())
    }

    /// Handle one tick delivery.
    async fn handle_tick(&mut self, delivery: Box<dyn Delivery>) {
        let tick: TickMessage = match decode(delivery.payload()) {
            Ok(tick) => tick,
            Err(e) => {
                warn!(controller = %self.id, error = %e, "rejecting malformed tick");
                if let Err(e) = delivery.nack(false).await {
                    warn!(controller = %self.id, error = %e, "failed to reject tick");
                }
                return;
            }
        };
        self.last_report = Instant::now();

        let Some(partition) = tick.partition_for(self.id) else {
            debug!(controller = %self.id, tick = tick.tick, "not on roster, nothing to fan out");
            ack(delivery).await;
            self.report_ready(tick.tick, None).await;
            return;
        };
        if self.ledger.is_expired(tick.tick) || self.ledger.is_reported(tick.tick) {
            // The coordinator is waiting on a tick we already finished.
            debug!(controller = %self.id, tick = tick.tick, "tick already drained, repeating ready");
            ack(delivery).await;
            self.report_ready(tick.tick, None).await;
            return;
        }

        let entities: Vec<EntityId> = if self.ledger.contains(tick.tick) {
            debug!(controller = %self.id, tick = tick.tick, "tick redelivered");
            Vec::new()
        } else {
            match self
                .store
                .list_entity_ids(self.domain, EntityFilter::Active)
                .await
            {
                Ok(ids) => ids.into_iter().filter(|id| partition.owns(*id)).collect(),
                Err(e) => {
                    warn!(controller = %self.id, tick = tick.tick, error = %e, "fan-out aborted");
                    ack(delivery).await;
                    self.report_ready(tick.tick, Some(format!("fan-out aborted: {e}")))
                        .await;
                    return;
                }
            }
        };

        let pending = match self.ledger.register(tick.tick, &entities, Instant::now()) {
            Registration::Publish(pending) => pending,
            Registration::Expired => {
                ack(delivery).await;
                self.report_ready(tick.tick, None).await;
                return;
            }
        };
        if let Err(e) = delivery.ack().await {
            warn!(controller = %self.id, tick = tick.tick, error = %e, "failed to ack tick");
            return;
        }

        info!(
            controller = %self.id,
            tick = tick.tick,
            partition = partition.index,
            partitions = partition.count,
            jobs = pending.len(),
            "tick received"
        );
        self.fan_out(&tick, pending).await;
    }

    /// Publish one job per entity, at most `fanout_concurrency` at a time.
    async fn fan_out(&mut self, tick: &TickMessage, entities: Vec<EntityId>) {
        if entities.is_empty() {
            return;
        }
        let bus = self.bus.as_ref();
        let queue = topology::job_queue(self.domain);
        let policy = self.options.publish_policy;
        let origin = self.id;
        let domain = self.domain;
        let results: Vec<(EntityId, Result<(), BusError>)> = stream::iter(entities)
            .map(move |entity| async move {
                let job = JobMessage {
                    tick: tick.tick,
                    domain,
                    entity,
                    origin,
                    sim_time: tick.sim_time,
                    settings: tick.settings.clone(),
                };
                let job = &job;
                let result = policy
                    .run("publish job", move || publish_json(bus, queue, job))
                    .await;
                (entity, result)
            })
            .buffer_unordered(self.options.fanout_concurrency.max(1))
            .collect()
            .await;

        let mut published = 0_usize;
        let mut failed = 0_usize;
        for (entity, result) in results {
            match result {
                Ok(()) => {
                    self.ledger.mark_published(tick.tick, entity);
                    published = published.saturating_add(1);
                }
                Err(e) => {
                    debug!(controller = %self.id, entity = %entity, error = %e, "job not published");
                    self.ledger.abandon(tick.tick, entity);
                    failed = failed.saturating_add(1);
                }
            }
        }
        if failed > 0 {
            warn!(
                controller = %self.id,
                tick = tick.tick,
                published = published,
                failed = failed,
                "some jobs could not be published"
            );
        } else {
            debug!(controller = %self.id, tick = tick.tick, published = published, "fan-out complete");
        }
    }

    /// Handle one outcome delivery.
    async fn handle_outcome(&mut self, delivery: Box<dyn Delivery>) {
        let outcome: JobOutcome = match decode(delivery.payload()) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(controller = %self.id, error = %e, "rejecting malformed outcome");
                if let Err(e) = delivery.nack(false).await {
                    warn!(controller = %self.id, error = %e, "failed to reject outcome");
                }
                return;
            }
        };
        ack(delivery).await;
        if outcome.origin != self.id {
            return;
        }
        let discarded = matches!(outcome.outcome, JobStatus::Discarded { .. });
        if let JobStatus::Discarded { reason } = &outcome.outcome {
            debug!(
                controller = %self.id,
                tick = outcome.tick,
                entity = %outcome.entity,
                reason = %reason,
                "job discarded by worker"
            );
        }
        self.ledger.settle(outcome.tick, outcome.entity, discarded);
    }

    /// Check open ticks for drain and keep the coordinator aware of us.
    async fn poll(&mut self) {
        let now = Instant::now();
        for tick in self.ledger.open_ticks() {
            self.check_drain(tick, now).await;
        }
        if now.saturating_duration_since(self.last_report) >= self.options.rejoin_interval {
            match self.send(&ControllerReport::join(self.id, self.domain)).await {
                Ok(()) => debug!(controller = %self.id, "re-announced"),
                Err(e) => warn!(controller = %self.id, error = %e, "re-announce failed"),
            }
            self.last_report = now;
        }
    }

    async fn check_drain(&mut self, tick: u64, now: Instant) {
        let outstanding = self.ledger.outstanding(tick);
        let timed_out = self.ledger.elapsed(tick, now) >= self.options.drain_timeout;
        let detail = if outstanding == 0 {
            let queue = topology::job_queue(self.domain);
            match self.bus.inspect_depth(queue).await {
                Ok(0) => match self.ledger.unpublished(tick) {
                    0 => None,
                    lost => Some(format!("{lost} jobs could not be published")),
                },
                Ok(depth) if timed_out => {
                    Some(format!("drain timed out with job queue depth {depth}"))
                }
                Ok(_) => return,
                Err(e) => {
                    debug!(controller = %self.id, error = %e, "depth check failed");
                    return;
                }
            }
        } else if timed_out {
            let forced = self.ledger.force_drain(tick);
            Some(format!("drain timed out with {forced} jobs outstanding"))
        } else {
            return;
        };

        info!(
            controller = %self.id,
            tick = tick,
            jobs = self.ledger.registered(tick),
            discarded = self.ledger.discarded(tick),
            degraded = detail.is_some(),
            "tick drained"
        );
        if self.report_ready(tick, detail).await {
            self.ledger.mark_reported(tick);
        }
    }

    /// Report readiness for `tick`. Returns whether the report went out.
    async fn report_ready(&mut self, tick: u64, detail: Option<String>) -> bool {
        let report = match detail {
            None => ControllerReport::ready(self.id, self.domain, tick),
            Some(detail) => {
                warn!(controller = %self.id, tick = tick, detail = %detail, "reporting degraded readiness");
                ControllerReport::degraded(self.id, self.domain, tick, detail)
            }
        };
        match self.send(&report).await {
            Ok(()) => {
                self.last_report = Instant::now();
                true
            }
            Err(e) => {
                warn!(controller = %self.id, tick = tick, error = %e, "readiness report failed");
                false
            }
        }
    }

    async fn send(&self, report: &ControllerReport) -> Result<(), BusError> {
        let bus = self.bus.as_ref();
        self.options
            .publish_policy
            .run("publish report", move || publish_json(bus, CONTROL_QUEUE, report))
            .await
    }

    async fn exit(&self) {
        let group = topology::controller_group(self.id);
        match self.bus.purge(topology::job_queue(self.domain)).await {
            Ok(purged) => debug!(controller = %self.id, purged = purged, "job queue purged"),
            Err(e) => warn!(controller = %self.id, error = %e, "failed to purge job queue"),
        }
        if let Err(e) = self.send(&ControllerReport::exit(self.id, self.domain)).await {
            warn!(controller = %self.id, error = %e, "exit report failed");
        }
        for queue in [
            topology::tick_queue(self.domain),
            topology::outcome_queue(self.domain),
        ] {
            if let Err(e) = self.bus.remove_group(queue, &group).await {
                warn!(controller = %self.id, queue = queue, error = %e, "failed to remove group");
            }
        }
        info!(controller = %self.id, domain = %self.domain, "controller exited");
    }
}

async fn ack(delivery: Box<dyn Delivery>) {
    if let Err(e) = delivery.ack().await {
        warn!(error = %e, "failed to ack delivery");
    }
}
