//! Interactive operator console.
//!
//! Reads one command per line and answers through the [`CoordinatorHandle`].
//! `exit` cancels the shutdown token; the process then unwinds normally
//! through its own shutdown path.

use std::fmt::Write as _;

use daws_types::CoordinatorStatus;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::operator::CoordinatorHandle;

/// Help text printed by `help` and on unknown input.
pub const HELP: &str = "\
commands:
  status   show coordinator status
  start    enable tick emission
  stop     halt tick emission
  trigger  force the next tick
  exit     shut down
  help     show this text
";

/// One console command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Print the status.
    Status,
    /// Enable emission.
    Start,
    /// Halt emission.
    Stop,
    /// Force a tick.
    Trigger,
    /// Shut down.
    Exit,
    /// Print the help text.
    Help,
}

/// Input that is not a console command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown command: {0}")]
pub struct UnknownCommand(pub String);

impl core::str::FromStr for ConsoleCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "status" => Ok(Self::Status),
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "trigger" => Ok(Self::Trigger),
            "exit" | "quit" => Ok(Self::Exit),
            "help" | "?" => Ok(Self::Help),
            other => Err(UnknownCommand(other.to_owned())),
        }
    }
}

/// Render a status snapshot for the console.
pub fn render_status(status: &CoordinatorStatus) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "phase:         {}", status.phase);
    let _ = writeln!(out, "ticks emitted: {}", status.ticks_emitted);
    let _ = writeln!(out, "sim time:      {}", status.sim_time);
    let _ = writeln!(out, "real time:     {}", status.real_time);
    if let Some(ms) = status.last_tick_ms {
        let _ = writeln!(out, "last tick:     {ms} ms");
    }
    for count in &status.domains {
        let _ = writeln!(
            out,
            "{:<8} {}/{} ready",
            count.domain.as_str(),
            count.ready,
            count.registered
        );
    }
    let _ = writeln!(
        out,
        "slow: {}  forced: {}  evicted: {}  degraded: {}",
        status.slow_ticks, status.forced_ticks, status.evictions, status.degraded_reports
    );
    if let Some(detail) = &status.last_detail {
        let _ = writeln!(out, "last degradation: {detail}");
    }
    out
}

/// Run the console until `exit`, end of input, or cancellation.
///
/// # Errors
///
/// Returns an I/O error if reading input or writing output fails.
pub async fn run_console<R, W>(
    input: R,
    mut output: W,
    handle: &CoordinatorHandle,
    cancel: &CancellationToken,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match line.parse::<ConsoleCommand>() {
            Ok(ConsoleCommand::Exit) => {
                info!("exit requested from console");
                output.write_all(b"shutting down\n").await?;
                output.flush().await?;
                cancel.cancel();
                return Ok(());
            }
            Ok(ConsoleCommand::Help) => HELP.to_owned(),
            Ok(ConsoleCommand::Status) => match handle.status().await {
                Ok(status) => render_status(&status),
                Err(e) => format!("error: {e}\n"),
            },
            Ok(ConsoleCommand::Start) => match handle.start().await {
                Ok(status) => format!("emission enabled ({})\n", status.phase),
                Err(e) => format!("error: {e}\n"),
            },
            Ok(ConsoleCommand::Stop) => match handle.stop().await {
                Ok(status) => format!("emission halted ({})\n", status.phase),
                Err(e) => format!("error: {e}\n"),
            },
            Ok(ConsoleCommand::Trigger) => match handle.trigger().await {
                Ok(tick) => format!("emitted tick {tick}\n"),
                Err(e) => format!("trigger rejected: {e}\n"),
            },
            Err(e) => format!("{e}\n{HELP}"),
        };
        output.write_all(reply.as_bytes()).await?;
        output.flush().await?;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_case_insensitively() {
        assert_eq!("STATUS".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Status);
        assert_eq!(" trigger ".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Trigger);
        assert_eq!("quit".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Exit);
        assert!("launch".parse::<ConsoleCommand>().is_err());
    }
}
