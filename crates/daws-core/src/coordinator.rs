//! Tick coordinator: the barrier that advances the simulated clock.
//!
//! The coordinator owns the [`ControllerRegistry`], the [`SimClock`] and the
//! [`WorldSettings`]. It emits Tick(n + 1) on every domain's tick queue once
//! each required domain has a live controller and every registered
//! controller reported ready for Tick(n).
//!
//! [`Coordinator`] is the state machine and performs no I/O. The
//! [`CoordinatorTask`] wraps it in a single tokio task that serializes
//! control-queue deliveries, operator commands and the stale-controller
//! sweep, and publishes a [`CoordinatorStatus`] after every step.
//!
//! ```text
//!                 start/stop
//!   Stopped  <-------------------->  (eligible states)
//!
//!   AwaitingControllers --(every required domain joined)--> AwaitingReady
//!   AwaitingReady --(all ready)--> Emitting --(published)--> Running
//!   Running --(all ready)--> Emitting
//! ```

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use daws_bus::topology::{self, COORDINATOR_GROUP, CONTROL_QUEUE};
use daws_bus::{BusError, Delivery, RetryPolicy, SharedBus, decode, publish_json};
use daws_store::{SeedPlan, SharedStore, StoreError, WorldStore, seed_world};
use daws_types::{
    ControllerReport, CoordinatorPhase, CoordinatorStatus, Domain, TickMessage, WorldSettings,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::{ClockError, SimClock};
use crate::config::DawsConfig;
use crate::operator::{Command, CoordinatorHandle};
use crate::registry::{ControllerRecord, ControllerRegistry, ReportEffect};

/// Errors raised by the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// The simulated clock cannot advance.
    #[error("clock error: {0}")]
    Clock(#[from] ClockError),

    /// The bus failed beyond the retry budget.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// The world store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A forced tick was requested while emission is stopped.
    #[error("emission is stopped")]
    Stopped,

    /// A forced tick was requested while a required domain has no ready
    /// controller.
    #[error("no ready {0} controller")]
    NotReady(Domain),

    /// A forced tick failed after it was accepted.
    #[error("tick emission failed: {0}")]
    EmissionFailed(String),

    /// The coordinator task is gone.
    #[error("coordinator is not running")]
    Unavailable,
}

impl CoordinatorError {
    /// Whether the error is an operator request that was refused rather
    /// than a failure.
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Stopped | Self::NotReady(_))
    }
}

/// Coordinator tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Domains that must have a live controller before a tick is emitted.
    pub required: Vec<Domain>,
    /// How long a controller may stay not-ready before it is evicted.
    pub ready_timeout: Duration,
    /// Whether emission is enabled from the start.
    pub autostart: bool,
}

impl CoordinatorOptions {
    /// Options described by `config`.
    pub fn from_config(config: &DawsConfig) -> Self {
        Self {
            required: config.world.required_domains.clone(),
            ready_timeout: config.coordinator.ready_timeout(),
            autostart: config.coordinator.autostart,
        }
    }
}

/// The tick published on one domain queue.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainTick {
    /// Domain whose tick queue receives the message.
    pub domain: Domain,
    /// Message body.
    pub message: TickMessage,
}

/// A tick that has been prepared but not yet published.
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    /// Tick index.
    pub tick: u64,
    /// Whether the tick was forced by an operator.
    pub forced: bool,
    /// One message per domain.
    pub messages: Vec<DomainTick>,
}

/// The coordinator state machine.
#[derive(Debug, Clone)]
pub struct Coordinator {
    registry: ControllerRegistry,
    clock: SimClock,
    settings: WorldSettings,
    required: Vec<Domain>,
    ready_timeout: TimeDelta,
    running: bool,
    emitting: bool,
    in_flight: bool,
    last_emission: Option<DateTime<Utc>>,
    last_tick_ms: Option<u64>,
    slow_ticks: u64,
    forced_ticks: u64,
    evictions: u64,
    degraded_reports: u64,
    last_detail: Option<String>,
}

impl Coordinator {
    /// Create a coordinator with an empty registry.
    pub fn new(settings: WorldSettings, clock: SimClock, options: CoordinatorOptions) -> Self {
        Self {
            registry: ControllerRegistry::new(),
            clock,
            settings,
            required: options.required,
            ready_timeout: TimeDelta::from_std(options.ready_timeout).unwrap_or(TimeDelta::MAX),
            running: options.autostart,
            emitting: false,
            in_flight: false,
            last_emission: None,
            last_tick_ms: None,
            slow_ticks: 0,
            forced_ticks: 0,
            evictions: 0,
            degraded_reports: 0,
            last_detail: None,
        }
    }

    /// Current state-machine phase.
    pub fn phase(&self) -> CoordinatorPhase {
        if !self.running {
            CoordinatorPhase::Stopped
        } else if self.emitting {
            CoordinatorPhase::Emitting
        } else if !self.registry.covers(&self.required) {
            CoordinatorPhase::AwaitingControllers
        } else if self.in_flight {
            CoordinatorPhase::Running
        } else {
            CoordinatorPhase::AwaitingReady
        }
    }

    /// Apply a controller report and re-evaluate the barrier.
    pub fn handle_report(&mut self, report: &ControllerReport, now: DateTime<Utc>) -> ReportEffect {
        let effect = self
            .registry
            .apply(report, self.clock.ticks_emitted(), now);
        match effect {
            ReportEffect::Joined => info!(
                controller_id = %report.controller_id,
                domain = %report.kind,
                ready = report.ready,
                "controller joined"
            ),
            ReportEffect::Removed => info!(
                controller_id = %report.controller_id,
                domain = %report.kind,
                "controller exited"
            ),
            ReportEffect::Stale => debug!(
                controller_id = %report.controller_id,
                tick = report.tick,
                current = self.clock.ticks_emitted(),
                "ignoring readiness for an older tick"
            ),
            ReportEffect::Updated | ReportEffect::Heartbeat | ReportEffect::UnknownExit => {}
        }
        if let Some(detail) = &report.detail {
            warn!(
                controller_id = %report.controller_id,
                domain = %report.kind,
                tick = report.tick,
                detail = %detail,
                "controller reported a degraded tick"
            );
            self.degraded_reports = self.degraded_reports.saturating_add(1);
            self.last_detail = Some(detail.clone());
        }
        self.refresh();
        effect
    }

    /// Evict controllers that stayed not-ready past the ready timeout.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<ControllerRecord> {
        let evicted = self.registry.evict_stale(now, self.ready_timeout);
        for record in &evicted {
            warn!(
                controller_id = %record.id,
                domain = %record.kind,
                last_seen = %record.last_seen,
                "evicting stale controller"
            );
        }
        let count = u64::try_from(evicted.len()).unwrap_or(u64::MAX);
        self.evictions = self.evictions.saturating_add(count);
        self.refresh();
        evicted
    }

    /// Clear the in-flight marker once the readiness cycle completed.
    fn refresh(&mut self) {
        if self.in_flight && self.registry.all_ready() {
            self.in_flight = false;
        }
    }

    /// Enable emission. Returns `false` if it was already enabled.
    pub const fn start(&mut self) -> bool {
        let changed = !self.running;
        self.running = true;
        changed
    }

    /// Halt emission without touching the registry. Returns `false` if it
    /// was already halted.
    pub const fn stop(&mut self) -> bool {
        let changed = self.running;
        self.running = false;
        changed
    }

    /// Whether the barrier is open: emission enabled, every required domain
    /// represented, and every registered controller ready.
    pub fn should_emit(&self) -> bool {
        self.running
            && !self.emitting
            && self.registry.covers(&self.required)
            && self.registry.all_ready()
    }

    /// Check whether an out-of-band tick may be forced now.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Stopped`] while emission is halted, or
    /// [`CoordinatorError::NotReady`] naming a required domain without a
    /// ready controller.
    pub fn check_trigger(&self) -> Result<(), CoordinatorError> {
        if !self.running {
            return Err(CoordinatorError::Stopped);
        }
        match self.registry.first_unready(&self.required) {
            Some(domain) => Err(CoordinatorError::NotReady(domain)),
            None => Ok(()),
        }
    }

    /// Prepare the next tick: measure the cycle, flip every controller to
    /// not-ready and build one message per domain.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::TickOverflow`] if the tick counter is
    /// exhausted.
    pub fn begin_emission(
        &mut self,
        now: DateTime<Utc>,
        forced: bool,
    ) -> Result<Emission, ClockError> {
        let tick = self.clock.next_tick()?;

        if let Some(previous) = self.last_emission {
            let elapsed = now
                .signed_duration_since(previous)
                .to_std()
                .unwrap_or(Duration::ZERO);
            let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
            self.last_tick_ms = Some(elapsed_ms);
            if elapsed > self.settings.tick_budget() {
                self.slow_ticks = self.slow_ticks.saturating_add(1);
                warn!(
                    tick = tick.saturating_sub(1),
                    elapsed_ms = elapsed_ms,
                    budget_ms = self.settings.world_speed_ms,
                    "slow tick"
                );
            }
        }

        self.registry.mark_all_not_ready(now);
        self.emitting = true;

        let messages = Domain::ALL
            .into_iter()
            .map(|domain| DomainTick {
                domain,
                message: TickMessage {
                    tick,
                    sim_time: self.clock.sim_time(),
                    settings: self.settings.clone(),
                    roster: self.registry.roster(domain),
                },
            })
            .collect();

        Ok(Emission {
            tick,
            forced,
            messages,
        })
    }

    /// Record a fully published emission and advance the clock.
    ///
    /// # Errors
    ///
    /// Returns a [`ClockError`] if the clock cannot advance; the clock is
    /// unchanged in that case.
    pub fn complete_emission(
        &mut self,
        emission: &Emission,
        now: DateTime<Utc>,
    ) -> Result<u64, ClockError> {
        self.emitting = false;
        let tick = self.clock.advance()?;
        self.in_flight = true;
        self.last_emission = Some(now);
        if emission.forced {
            self.forced_ticks = self.forced_ticks.saturating_add(1);
        }
        info!(
            tick = tick,
            forced = emission.forced,
            sim_time = %emission
                .messages
                .first()
                .map_or(self.clock.sim_time(), |domain_tick| domain_tick.message.sim_time),
            "emitted tick"
        );
        Ok(tick)
    }

    /// Give up on a prepared emission.
    pub const fn abort_emission(&mut self) {
        self.emitting = false;
    }

    /// Settings with `last_time` moved to the current simulated time.
    pub fn settings_for_persist(&self) -> WorldSettings {
        let mut settings = self.settings.clone();
        settings.last_time = self.clock.sim_time();
        settings
    }

    /// Status snapshot.
    pub fn status(&self, now: DateTime<Utc>) -> CoordinatorStatus {
        CoordinatorStatus {
            phase: self.phase(),
            running: self.running,
            ticks_emitted: self.clock.ticks_emitted(),
            sim_time: self.clock.sim_time(),
            real_time: now,
            required: self.required.clone(),
            domains: Domain::ALL
                .into_iter()
                .map(|domain| self.registry.count(domain))
                .collect(),
            controllers: self.registry.views(),
            last_tick_ms: self.last_tick_ms,
            slow_ticks: self.slow_ticks,
            forced_ticks: self.forced_ticks,
            evictions: self.evictions,
            degraded_reports: self.degraded_reports,
            last_detail: self.last_detail.clone(),
        }
    }

    /// The controller registry.
    pub const fn registry(&self) -> &ControllerRegistry {
        &self.registry
    }

    /// The simulated clock.
    pub const fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// The current settings.
    pub const fn settings(&self) -> &WorldSettings {
        &self.settings
    }

    /// Whether a tick is in flight.
    pub const fn in_flight(&self) -> bool {
        self.in_flight
    }
}

/// Load settings and the clock checkpoint from the store, seed the starting
/// world if asked to, and build a coordinator.
///
/// Missing settings are defaulted and written back.
///
/// # Errors
///
/// Returns [`CoordinatorError::Store`] on store failure or
/// [`CoordinatorError::Clock`] if the configured step is unusable.
pub async fn bootstrap(
    store: &dyn WorldStore,
    config: &DawsConfig,
    now: DateTime<Utc>,
) -> Result<Coordinator, CoordinatorError> {
    let settings = if let Some(settings) = store.load_settings().await? {
        info!(
            version = settings.version,
            last_time = %settings.last_time,
            "loaded world settings"
        );
        settings
    } else {
        let settings = WorldSettings::defaults_at(config.world.start_time.unwrap_or(now));
        store.save_settings(&settings).await?;
        info!(last_time = %settings.last_time, "stored default world settings");
        settings
    };

    let step_clock = SimClock::with_step_seconds(settings.last_time, config.world.step_seconds)?;
    let clock = match store.load_checkpoint().await? {
        Some(checkpoint) => {
            info!(
                ticks_emitted = checkpoint.ticks_emitted,
                sim_time = %checkpoint.sim_time,
                "restored clock checkpoint"
            );
            SimClock::from_checkpoint(&checkpoint, step_clock.step())?
        }
        None => step_clock,
    };

    if config.world.seed_world {
        let plan: SeedPlan = config.world.seed_plan();
        seed_world(store, &plan, config.world.seed, now).await?;
    }

    Ok(Coordinator::new(
        settings,
        clock,
        CoordinatorOptions::from_config(config),
    ))
}

/// Runtime parameters of the coordinator task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOptions {
    /// Retry schedule for tick publishes and control-queue reads.
    pub publish_policy: RetryPolicy,
    /// Period of the stale-controller sweep.
    pub sweep_interval: Duration,
    /// Ticks between clock checkpoints; 0 checkpoints only on shutdown.
    pub checkpoint_every: u64,
}

impl TaskOptions {
    /// Options described by `config`.
    pub const fn from_config(config: &DawsConfig) -> Self {
        Self {
            publish_policy: config.bus.publish_policy(),
            sweep_interval: config.coordinator.sweep_interval(),
            checkpoint_every: config.coordinator.checkpoint_every_ticks,
        }
    }
}

/// The coordinator's single message-processing task.
pub struct CoordinatorTask {
    coordinator: Coordinator,
    bus: SharedBus,
    store: SharedStore,
    options: TaskOptions,
    commands: mpsc::Receiver<Command>,
    status: watch::Sender<CoordinatorStatus>,
}

impl std::fmt::Debug for CoordinatorTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorTask")
            .field("coordinator", &self.coordinator)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Spawn the coordinator task.
///
/// Returns a handle for operators and the task's join handle, which yields
/// the final coordinator state once `cancel` fires or a fatal error stops
/// the task. Either way the settings and a clock checkpoint are persisted
/// before the task ends.
pub fn spawn_coordinator(
    coordinator: Coordinator,
    bus: SharedBus,
    store: SharedStore,
    options: TaskOptions,
    cancel: CancellationToken,
) -> (CoordinatorHandle, JoinHandle<Result<Coordinator, CoordinatorError>>) {
    let (handle, commands, status) = CoordinatorHandle::channel(coordinator.status(Utc::now()));
    let task = CoordinatorTask {
        coordinator,
        bus,
        store,
        options,
        commands,
        status,
    };
    (handle, tokio::spawn(task.run(cancel)))
}

impl CoordinatorTask {
    /// Run until cancelled or a fatal error occurs, then persist state.
    async fn run(mut self, cancel: CancellationToken) -> Result<Coordinator, CoordinatorError> {
        let result = self.serve(&cancel).await;
        if let Err(e) = &result {
            error!(error = %e, "coordinator stopped on a fatal error");
        }
        self.shutdown().await;
        result.map(|()| self.coordinator)
    }

    async fn serve(&mut self, cancel: &CancellationToken) -> Result<(), CoordinatorError> {
        let mut subscription = self
            .options
            .publish_policy
            .run("open control subscription", || {
                self.bus.consume(CONTROL_QUEUE, COORDINATOR_GROUP, 1)
            })
            .await?;
        let mut sweep = tokio::time::interval(self.options.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut failures = 0_u32;

        info!(required = ?self.coordinator.required, "coordinator started");
        self.maybe_emit().await?;
        self.publish_status();

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("coordinator shutting down");
                    return Ok(());
                }
                Some(command) = self.commands.recv() => {
                    self.handle_command(command).await?;
                }
                next = subscription.next() => match next {
                    Ok(delivery) => {
                        failures = 0;
                        self.handle_delivery(delivery).await;
                    }
                    Err(e) if e.is_transient() => {
                        failures = failures.saturating_add(1);
                        if failures >= self.options.publish_policy.max_attempts.max(1) {
                            return Err(e.into());
                        }
                        warn!(error = %e, attempt = failures, "control queue read failed");
                        tokio::time::sleep(self.options.publish_policy.backoff(failures)).await;
                    }
                    Err(e) => return Err(e.into()),
                },
                _ = sweep.tick() => {
                    self.coordinator.sweep(Utc::now());
                }
            }
            self.maybe_emit().await?;
            self.publish_status();
        }
    }

    async fn handle_delivery(&mut self, delivery: Box<dyn Delivery>) {
        match decode::<ControllerReport>(delivery.payload()) {
            Ok(report) => {
                self.coordinator.handle_report(&report, Utc::now());
                if let Err(e) = delivery.ack().await {
                    warn!(error = %e, "failed to ack controller report");
                }
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed controller report");
                if let Err(e) = delivery.nack(false).await {
                    warn!(error = %e, "failed to reject malformed controller report");
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) -> Result<(), CoordinatorError> {
        match command {
            Command::Status(reply) => {
                let _ = reply.send(self.coordinator.status(Utc::now()));
            }
            Command::Start(reply) => {
                if self.coordinator.start() {
                    info!("emission started by operator");
                }
                self.maybe_emit().await?;
                let _ = reply.send(self.coordinator.status(Utc::now()));
            }
            Command::Stop(reply) => {
                if self.coordinator.stop() {
                    info!("emission stopped by operator");
                }
                let _ = reply.send(self.coordinator.status(Utc::now()));
            }
            Command::Trigger(reply) => {
                if let Err(rejected) = self.coordinator.check_trigger() {
                    info!(reason = %rejected, "forced tick rejected");
                    let _ = reply.send(Err(rejected));
                    return Ok(());
                }
                match self.emit(true).await {
                    Ok(tick) => {
                        let _ = reply.send(Ok(tick));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(CoordinatorError::EmissionFailed(e.to_string())));
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }

    async fn maybe_emit(&mut self) -> Result<(), CoordinatorError> {
        if self.coordinator.should_emit() {
            self.emit(false).await?;
        }
        Ok(())
    }

    async fn emit(&mut self, forced: bool) -> Result<u64, CoordinatorError> {
        let emission = self.coordinator.begin_emission(Utc::now(), forced)?;
        self.publish_status();

        for domain_tick in &emission.messages {
            let bus = self.bus.as_ref();
            let queue = topology::tick_queue(domain_tick.domain);
            let message = &domain_tick.message;
            let published = self
                .options
                .publish_policy
                .run("publish tick", move || publish_json(bus, queue, message))
                .await;
            if let Err(e) = published {
                self.coordinator.abort_emission();
                return Err(e.into());
            }
            debug!(tick = emission.tick, queue = queue, "published tick");
        }

        let tick = self.coordinator.complete_emission(&emission, Utc::now())?;
        if tick.checked_rem(self.options.checkpoint_every) == Some(0) {
            self.save_checkpoint().await;
        }
        Ok(tick)
    }

    /// Persist the clock. Failures are only logged.
    async fn save_checkpoint(&self) {
        let checkpoint = self.coordinator.clock().checkpoint(Utc::now());
        match self.store.save_checkpoint(&checkpoint).await {
            Ok(()) => info!(
                ticks_emitted = checkpoint.ticks_emitted,
                sim_time = %checkpoint.sim_time,
                "persisted clock checkpoint"
            ),
            Err(e) => error!(error = %e, "failed to persist clock checkpoint"),
        }
    }

    fn publish_status(&self) {
        self.status
            .send_replace(self.coordinator.status(Utc::now()));
    }

    /// Purge undelivered ticks and persist settings and the clock.
    async fn shutdown(&mut self) {
        for domain in Domain::ALL {
            let queue = topology::tick_queue(domain);
            match self.bus.purge(queue).await {
                Ok(purged) => debug!(queue = queue, purged = purged, "purged tick queue"),
                Err(e) => warn!(queue = queue, error = %e, "failed to purge tick queue"),
            }
        }

        let settings = self.coordinator.settings_for_persist();
        if let Err(e) = self.store.save_settings(&settings).await {
            error!(error = %e, "failed to persist world settings");
        }
        self.save_checkpoint().await;
        self.publish_status();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use chrono::TimeZone;
    use daws_types::ControllerId;

    use super::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    fn coordinator(required: Vec<Domain>) -> Coordinator {
        let settings = WorldSettings::defaults_at(start());
        let clock = SimClock::with_step_seconds(start(), 1).unwrap();
        Coordinator::new(
            settings,
            clock,
            CoordinatorOptions {
                required,
                ready_timeout: Duration::from_secs(60),
                autostart: true,
            },
        )
    }

    fn emit(coordinator: &mut Coordinator, at: DateTime<Utc>) -> u64 {
        let emission = coordinator.begin_emission(at, false).unwrap();
        coordinator.complete_emission(&emission, at).unwrap()
    }

    #[test]
    fn waits_for_every_required_domain() {
        let mut coordinator = coordinator(Domain::ALL.to_vec());
        assert_eq!(coordinator.phase(), CoordinatorPhase::AwaitingControllers);
        coordinator.handle_report(
            &ControllerReport::join(ControllerId::new(), Domain::City),
            start(),
        );
        assert!(!coordinator.should_emit());
        coordinator.handle_report(
            &ControllerReport::join(ControllerId::new(), Domain::Traffic),
            start(),
        );
        assert!(coordinator.should_emit());
    }

    #[test]
    fn emission_marks_everyone_not_ready_and_carries_rosters() {
        let mut coordinator = coordinator(vec![Domain::City]);
        let city = ControllerId::new();
        coordinator.handle_report(&ControllerReport::join(city, Domain::City), start());

        let emission = coordinator.begin_emission(start(), false).unwrap();
        assert_eq!(emission.tick, 1);
        assert_eq!(coordinator.phase(), CoordinatorPhase::Emitting);
        assert_eq!(emission.messages.len(), Domain::ALL.len());
        let city_tick = emission
            .messages
            .iter()
            .find(|domain_tick| domain_tick.domain == Domain::City)
            .unwrap();
        assert_eq!(city_tick.message.roster, vec![city]);
        assert_eq!(city_tick.message.sim_time, start());

        coordinator.complete_emission(&emission, start()).unwrap();
        assert_eq!(coordinator.phase(), CoordinatorPhase::Running);
        assert!(!coordinator.should_emit());
        assert_eq!(coordinator.clock().ticks_emitted(), 1);

        coordinator.handle_report(&ControllerReport::ready(city, Domain::City, 1), start());
        assert_eq!(coordinator.phase(), CoordinatorPhase::AwaitingReady);
        assert!(coordinator.should_emit());
    }

    #[test]
    fn stop_halts_emission_without_touching_the_registry() {
        let mut coordinator = coordinator(vec![Domain::City]);
        coordinator.handle_report(
            &ControllerReport::join(ControllerId::new(), Domain::City),
            start(),
        );
        assert!(coordinator.stop());
        assert!(!coordinator.stop());
        assert_eq!(coordinator.phase(), CoordinatorPhase::Stopped);
        assert!(!coordinator.should_emit());
        assert_eq!(coordinator.registry().len(), 1);
        assert!(coordinator.start());
        assert!(coordinator.should_emit());
    }

    #[test]
    fn trigger_requires_a_ready_controller_per_domain() {
        let mut coordinator = coordinator(Domain::ALL.to_vec());
        let city = ControllerId::new();
        coordinator.handle_report(&ControllerReport::join(city, Domain::City), start());
        assert!(matches!(
            coordinator.check_trigger(),
            Err(CoordinatorError::NotReady(Domain::Traffic))
        ));

        let traffic = ControllerId::new();
        coordinator.handle_report(&ControllerReport::join(traffic, Domain::Traffic), start());
        coordinator.check_trigger().unwrap();

        emit(&mut coordinator, start());
        assert!(coordinator.check_trigger().is_err());

        coordinator.handle_report(&ControllerReport::ready(city, Domain::City, 1), start());
        coordinator.handle_report(&ControllerReport::ready(traffic, Domain::Traffic, 1), start());
        coordinator.stop();
        assert!(matches!(
            coordinator.check_trigger(),
            Err(CoordinatorError::Stopped)
        ));
    }

    #[test]
    fn slow_cycles_are_counted() {
        let mut coordinator = coordinator(vec![Domain::City]);
        let city = ControllerId::new();
        coordinator.handle_report(&ControllerReport::join(city, Domain::City), start());
        emit(&mut coordinator, start());
        coordinator.handle_report(&ControllerReport::ready(city, Domain::City, 1), start());

        let late = start() + TimeDelta::seconds(6);
        emit(&mut coordinator, late);
        let status = coordinator.status(late);
        assert_eq!(status.slow_ticks, 1);
        assert_eq!(status.last_tick_ms, Some(6_000));
        assert_eq!(status.ticks_emitted, 2);
    }

    #[test]
    fn eviction_reopens_the_barrier() {
        let mut coordinator = coordinator(vec![Domain::City]);
        let alive = ControllerId::new();
        let dead = ControllerId::new();
        coordinator.handle_report(&ControllerReport::join(alive, Domain::City), start());
        coordinator.handle_report(&ControllerReport::join(dead, Domain::City), start());
        emit(&mut coordinator, start());
        coordinator.handle_report(&ControllerReport::ready(alive, Domain::City, 1), start());
        assert!(!coordinator.should_emit());

        let evicted = coordinator.sweep(start() + TimeDelta::seconds(61));
        assert_eq!(evicted.len(), 1);
        assert!(coordinator.should_emit());
        assert_eq!(coordinator.status(start()).evictions, 1);
    }

    #[test]
    fn degraded_reports_are_surfaced() {
        let mut coordinator = coordinator(vec![Domain::City]);
        let city = ControllerId::new();
        coordinator.handle_report(&ControllerReport::join(city, Domain::City), start());
        emit(&mut coordinator, start());
        coordinator.handle_report(
            &ControllerReport::degraded(city, Domain::City, 1, String::from("store down")),
            start(),
        );
        let status = coordinator.status(start());
        assert_eq!(status.degraded_reports, 1);
        assert_eq!(status.last_detail.as_deref(), Some("store down"));
        assert!(coordinator.should_emit());
    }

    #[test]
    fn persisted_settings_follow_the_clock() {
        let mut coordinator = coordinator(vec![Domain::City]);
        coordinator.handle_report(
            &ControllerReport::join(ControllerId::new(), Domain::City),
            start(),
        );
        emit(&mut coordinator, start());
        assert_eq!(
            coordinator.settings_for_persist().last_time,
            start() + TimeDelta::seconds(1)
        );
    }
}
