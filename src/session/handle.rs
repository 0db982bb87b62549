//! Session handle - the operation surface other components talk to.
//!
//! Spawns the session task and hands out the command queue. Commands carry a
//! oneshot reply channel so the originator learns the outcome (acknowledged,
//! rejected, timed out) without the dispatch loop ever blocking on a pump.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{BridgeSettings, PumpConfig};
use crate::protocol::{CommandField, PumpMode};
use crate::transport::Transport;

use super::error::SessionError;
use super::session;
use super::state::StateEvent;

/// Field-level mutation addressed to one pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCommand {
    Power(bool),
    Feed(bool),
    Mode(PumpMode),
    Flow(u8),
    Frequency(u8),
}

impl FieldCommand {
    pub(crate) fn wire_parts(&self) -> (CommandField, u8) {
        match self {
            FieldCommand::Power(on) => (CommandField::Power, *on as u8),
            FieldCommand::Feed(on) => (CommandField::Feed, *on as u8),
            FieldCommand::Mode(mode) => (CommandField::Mode, mode.wire_value()),
            FieldCommand::Flow(percent) => (CommandField::Flow, *percent),
            FieldCommand::Frequency(seconds) => (CommandField::Frequency, *seconds),
        }
    }

    pub fn field_name(&self) -> &'static str {
        match self {
            FieldCommand::Power(_) => "power",
            FieldCommand::Feed(_) => "feed",
            FieldCommand::Mode(_) => "mode",
            FieldCommand::Flow(_) => "flow",
            FieldCommand::Frequency(_) => "frequency",
        }
    }
}

/// One queued command plus the channel its outcome is reported on.
#[derive(Debug)]
pub struct CommandRequest {
    pub command: FieldCommand,
    pub reply: oneshot::Sender<Result<(), SessionError>>,
}

/// Handle to a running session task.
pub struct SessionHandle {
    pump: Arc<PumpConfig>,
    cmd_tx: mpsc::Sender<CommandRequest>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    /// Spawn the session task for one pump.
    ///
    /// `stagger` delays the very first connection attempt so a multi-pump
    /// startup doesn't hammer a shared radio adapter all at once.
    pub fn spawn(
        pump: Arc<PumpConfig>,
        settings: Arc<BridgeSettings>,
        transport: Arc<dyn Transport>,
        event_tx: mpsc::Sender<StateEvent>,
        stagger: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        info!("[{}] starting session for {}", pump.id, pump.address);

        let task_pump = pump.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            session::run(task_pump, settings, transport, cmd_rx, event_tx, stagger, task_cancel)
                .await;
        });

        Self {
            pump,
            cmd_tx,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn pump(&self) -> &PumpConfig {
        &self.pump
    }

    /// Enqueue a command; returns the reply channel to await the outcome.
    ///
    /// Enqueueing preserves submission order; the session sends one command
    /// at a time, so the wire order matches.
    pub async fn submit(
        &self,
        command: FieldCommand,
    ) -> Result<oneshot::Receiver<Result<(), SessionError>>, SessionError> {
        let (reply, outcome) = oneshot::channel();
        self.cmd_tx
            .send(CommandRequest { command, reply })
            .await
            .map_err(|_| SessionError::ShuttingDown)?;
        Ok(outcome)
    }

    /// Signal cooperative shutdown; the task notices at its next suspension
    /// point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait up to `grace` for the task to finish, then abandon it.
    pub async fn join_with_grace(&self, grace: Duration) {
        let handle = self.task.lock().await.take();
        let Some(handle) = handle else {
            return;
        };
        let abort = handle.abort_handle();
        match tokio::time::timeout(grace, handle).await {
            Ok(Ok(())) => debug!("[{}] session task finished", self.pump.id),
            Ok(Err(join_error)) => {
                warn!("[{}] session task panicked: {}", self.pump.id, join_error);
            }
            Err(_) => {
                warn!(
                    "[{}] session task did not stop within {:?}, aborting",
                    self.pump.id, grace
                );
                abort.abort();
            }
        }
    }
}
