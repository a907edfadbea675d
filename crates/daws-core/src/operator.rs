//! Operator access to the running coordinator.
//!
//! The HTTP API and the console never touch coordinator state directly.
//! They hold a [`CoordinatorHandle`] that sends [`Command`]s into the
//! coordinator task and reads the latest [`CoordinatorStatus`] from a
//! `watch` channel, so every mutation still happens inside the single
//! message-processing task.

use daws_types::CoordinatorStatus;
use tokio::sync::{mpsc, oneshot, watch};

use crate::coordinator::CoordinatorError;

/// Depth of the command channel.
const COMMAND_BUFFER: usize = 32;

/// A request handled inside the coordinator task.
#[derive(Debug)]
pub enum Command {
    /// Report a fresh status snapshot.
    Status(oneshot::Sender<CoordinatorStatus>),
    /// Enable emission and re-evaluate the barrier.
    Start(oneshot::Sender<CoordinatorStatus>),
    /// Halt emission.
    Stop(oneshot::Sender<CoordinatorStatus>),
    /// Emit one tick regardless of readiness.
    Trigger(oneshot::Sender<Result<u64, CoordinatorError>>),
}

/// Cloneable handle to the coordinator task.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<CoordinatorStatus>,
}

impl CoordinatorHandle {
    /// Create a handle together with the task-side channel ends.
    pub fn channel(
        initial: CoordinatorStatus,
    ) -> (
        Self,
        mpsc::Receiver<Command>,
        watch::Sender<CoordinatorStatus>,
    ) {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (status_tx, status) = watch::channel(initial);
        (Self { commands, status }, command_rx, status_tx)
    }

    /// The most recently published status, without a round trip.
    pub fn latest(&self) -> CoordinatorStatus {
        self.status.borrow().clone()
    }

    /// A receiver that observes every status update.
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorStatus> {
        self.status.clone()
    }

    /// Ask the task for a fresh status.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Unavailable`] if the task has stopped.
    pub async fn status(&self) -> Result<CoordinatorStatus, CoordinatorError> {
        self.request(Command::Status).await
    }

    /// Enable emission.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Unavailable`] if the task has stopped.
    pub async fn start(&self) -> Result<CoordinatorStatus, CoordinatorError> {
        self.request(Command::Start).await
    }

    /// Halt emission.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Unavailable`] if the task has stopped.
    pub async fn stop(&self) -> Result<CoordinatorStatus, CoordinatorError> {
        self.request(Command::Stop).await
    }

    /// Force one tick. Returns the emitted tick index.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Stopped`] or [`CoordinatorError::NotReady`]
    /// when the trigger is rejected, [`CoordinatorError::EmissionFailed`] if
    /// publishing failed, or [`CoordinatorError::Unavailable`] if the task
    /// has stopped.
    pub async fn trigger(&self) -> Result<u64, CoordinatorError> {
        self.request(Command::Trigger).await?
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CoordinatorError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_err| CoordinatorError::Unavailable)?;
        response.await.map_err(|_err| CoordinatorError::Unavailable)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use daws_types::{CoordinatorPhase, Domain};

    use super::*;

    fn status() -> CoordinatorStatus {
        CoordinatorStatus {
            phase: CoordinatorPhase::AwaitingControllers,
            running: true,
            ticks_emitted: 0,
            sim_time: Utc::now(),
            real_time: Utc::now(),
            required: Domain::ALL.to_vec(),
            domains: Vec::new(),
            controllers: Vec::new(),
            last_tick_ms: None,
            slow_ticks: 0,
            forced_ticks: 0,
            evictions: 0,
            degraded_reports: 0,
            last_detail: None,
        }
    }

    #[tokio::test]
    async fn commands_reach_the_task() {
        let (handle, mut commands, _status) = CoordinatorHandle::channel(status());
        let task = tokio::spawn(async move {
            if let Some(Command::Trigger(reply)) = commands.recv().await {
                reply.send(Ok(9)).unwrap();
            }
        });
        assert_eq!(handle.trigger().await.unwrap(), 9);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn a_gone_task_is_unavailable() {
        let (handle, commands, _status) = CoordinatorHandle::channel(status());
        drop(commands);
        assert!(matches!(
            handle.start().await,
            Err(CoordinatorError::Unavailable)
        ));
    }

    #[test]
    fn latest_reads_the_watch_channel() {
        let (handle, _commands, status_tx) = CoordinatorHandle::channel(status());
        let mut next = status();
        next.ticks_emitted = 4;
        status_tx.send_replace(next);
        assert_eq!(handle.latest().ticks_emitted, 4);
    }
}
