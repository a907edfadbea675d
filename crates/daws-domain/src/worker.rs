//! Worker pool: stateless consumers of a domain's job queue.
//!
//! Every worker holds one unsettled job at a time (prefetch 1) from the
//! shared `workers` group, runs the domain's [`EntityStep`] and settles the
//! job:
//!
//! | Step result | Outcome published | Settlement |
//! |-------------|-------------------|------------|
//! | success | `completed` | ack |
//! | permanent error | `discarded` | nack, no requeue |
//! | transient error, deliveries left | none | nack, requeue |
//! | transient error, last delivery | `discarded` | nack, no requeue |
//! | malformed payload | none | nack, no requeue |
//!
//! The outcome is published before the job is settled so the originating
//! controller can account for every job it fanned out.

use std::sync::Arc;
use std::time::Duration;

use daws_bus::topology::{self, WORKER_GROUP};
use daws_bus::{BusError, Delivery, RetryPolicy, SharedBus, decode, publish_json};
use daws_core::DawsConfig;
use daws_types::{Domain, JobMessage, JobOutcome, JobStatus};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{StepError, WorkerError};
use crate::steps::SharedStep;

/// Worker tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Workers per pool.
    pub concurrency: usize,
    /// Unsettled jobs per worker.
    pub prefetch: usize,
    /// Deliveries of one job before a transient failure becomes a discard.
    pub max_deliver: u64,
    /// Artificial delay before each step.
    pub step_delay: Duration,
    /// Retry schedule for outcome publishes and job-queue reads.
    pub publish_policy: RetryPolicy,
}

impl WorkerOptions {
    /// Options described by `config`.
    pub fn from_config(config: &DawsConfig) -> Self {
        Self {
            concurrency: config.worker.concurrency,
            prefetch: config.worker.prefetch,
            max_deliver: u64::from(config.bus.max_deliver),
            step_delay: Duration::from_millis(config.worker.step_delay_ms),
            publish_policy: config.bus.publish_policy(),
        }
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            prefetch: 1,
            max_deliver: 5,
            step_delay: Duration::ZERO,
            publish_policy: RetryPolicy::default(),
        }
    }
}

/// How a worker settled one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Step ran; job acknowledged.
    Completed,
    /// Job rejected without requeue; a `discarded` outcome was sent.
    Discarded,
    /// Job put back for another attempt.
    Requeued,
    /// Payload did not decode; rejected without an outcome.
    Malformed,
}

/// One consumer of a domain job queue.
pub struct Worker {
    index: usize,
    bus: SharedBus,
    step: SharedStep,
    options: WorkerOptions,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("index", &self.index)
            .field("domain", &self.step.domain())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// Create a worker for the step's domain.
    pub fn new(index: usize, bus: SharedBus, step: SharedStep, options: WorkerOptions) -> Self {
        Self {
            index,
            bus,
            step,
            options,
        }
    }

    /// Domain served.
    pub fn domain(&self) -> Domain {
        self.step.domain()
    }

    /// Consume jobs until cancelled. Returns the number of deliveries
    /// handled.
    ///
    /// A job already being processed when `cancel` fires is finished and
    /// settled first.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Bus`] if the job queue stays unreachable past
    /// the retry budget.
    pub async fn run(self, cancel: CancellationToken) -> Result<u64, WorkerError> {
        let queue = topology::job_queue(self.domain());
        let bus = self.bus.as_ref();
        let prefetch = self.options.prefetch.max(1);
        let mut subscription = self
            .options
            .publish_policy
            .run("open job subscription", move || {
                bus.consume(queue, WORKER_GROUP, prefetch)
            })
            .await?;
        debug!(worker = self.index, queue = queue, "worker started");

        let mut handled = 0_u64;
        let mut failures = 0_u32;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                next = subscription.next() => match next {
                    Ok(delivery) => {
                        failures = 0;
                        self.process(delivery).await;
                        handled = handled.saturating_add(1);
                    }
                    Err(e) if e.is_transient() => {
                        failures = failures.saturating_add(1);
                        if failures >= self.options.publish_policy.max_attempts.max(1) {
                            return Err(e.into());
                        }
                        warn!(worker = self.index, error = %e, "job queue read failed");
                        tokio::time::sleep(self.options.publish_policy.backoff(failures)).await;
                    }
                    Err(e) => return Err(e.into()),
                },
            }
        }
        debug!(worker = self.index, handled = handled, "worker stopped");
        Ok(handled)
    }

    /// Run the step for one delivery and settle it.
    pub async fn process(&self, delivery: Box<dyn Delivery>) -> Settlement {
        let job: JobMessage = match decode(delivery.payload()) {
            Ok(job) => job,
            Err(e) => {
                warn!(worker = self.index, error = %e, "rejecting malformed job");
                settle(delivery, false).await;
                return Settlement::Malformed;
            }
        };

        if !self.options.step_delay.is_zero() {
            tokio::time::sleep(self.options.step_delay).await;
        }

        let result = if job.domain == self.domain() {
            self.step.step(&job).await
        } else {
            Err(StepError::Permanent(format!(
                "{} job on the {} queue",
                job.domain,
                self.domain()
            )))
        };

        match result {
            Ok(()) => {
                if let Err(e) = self.send_outcome(&job, JobStatus::Completed).await {
                    warn!(
                        worker = self.index,
                        tick = job.tick,
                        entity = %job.entity,
                        error = %e,
                        "outcome not published, requeueing job"
                    );
                    settle(delivery, true).await;
                    return Settlement::Requeued;
                }
                if let Err(e) = delivery.ack().await {
                    warn!(worker = self.index, error = %e, "failed to ack job");
                }
                Settlement::Completed
            }
            Err(StepError::Transient(reason))
                if delivery.delivery_count() < self.options.max_deliver =>
            {
                let attempt = u32::try_from(delivery.delivery_count()).unwrap_or(u32::MAX);
                debug!(
                    worker = self.index,
                    tick = job.tick,
                    entity = %job.entity,
                    attempt = attempt,
                    reason = %reason,
                    "transient step failure, requeueing"
                );
                tokio::time::sleep(self.options.publish_policy.backoff(attempt)).await;
                settle(delivery, true).await;
                Settlement::Requeued
            }
            Err(e) => {
                let reason = if e.is_transient() {
                    format!(
                        "gave up after {} deliveries: {e}",
                        delivery.delivery_count()
                    )
                } else {
                    e.to_string()
                };
                warn!(
                    worker = self.index,
                    tick = job.tick,
                    entity = %job.entity,
                    reason = %reason,
                    "discarding job"
                );
                if let Err(e) = self
                    .send_outcome(&job, JobStatus::Discarded { reason })
                    .await
                {
                    warn!(worker = self.index, error = %e, "discard outcome not published");
                }
                settle(delivery, false).await;
                Settlement::Discarded
            }
        }
    }

    async fn send_outcome(&self, job: &JobMessage, outcome: JobStatus) -> Result<(), BusError> {
        let outcome = JobOutcome {
            tick: job.tick,
            entity: job.entity,
            origin: job.origin,
            outcome,
        };
        let bus = self.bus.as_ref();
        let queue = topology::outcome_queue(job.domain);
        let outcome = &outcome;
        self.options
            .publish_policy
            .run("publish outcome", move || publish_json(bus, queue, outcome))
            .await
    }
}

async fn settle(delivery: Box<dyn Delivery>, requeue: bool) {
    if let Err(e) = delivery.nack(requeue).await {
        warn!(requeue = requeue, error = %e, "failed to reject job");
    }
}

/// A set of workers sharing one domain job queue.
#[derive(Debug)]
pub struct WorkerPool {
    domain: Domain,
    handles: Vec<JoinHandle<Result<u64, WorkerError>>>,
}

impl WorkerPool {
    /// Spawn `options.concurrency` workers.
    pub fn spawn(
        bus: &SharedBus,
        step: &SharedStep,
        options: WorkerOptions,
        cancel: &CancellationToken,
    ) -> Self {
        let domain = step.domain();
        let handles = (0..options.concurrency.max(1))
            .map(|index| {
                let worker = Worker::new(index, Arc::clone(bus), Arc::clone(step), options);
                tokio::spawn(worker.run(cancel.clone()))
            })
            .collect();
        info!(
            domain = %domain,
            workers = options.concurrency.max(1),
            "worker pool started"
        );
        Self { domain, handles }
    }

    /// Wait for every worker to stop. Returns the total number of
    /// deliveries handled.
    ///
    /// # Errors
    ///
    /// Returns the first worker error.
    pub async fn join(self) -> Result<u64, WorkerError> {
        let mut total = 0_u64;
        let mut first_error = None;
        for handle in self.handles {
            match handle.await {
                Ok(Ok(handled)) => total = total.saturating_add(handled),
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(WorkerError::Join(e.to_string()));
                }
            }
        }
        info!(domain = %self.domain, handled = total, "worker pool stopped");
        first_error.map_or(Ok(total), Err)
    }
}
