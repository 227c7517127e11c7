use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};

use crate::types::{EngineCommand, EngineEvent, EngineSnapshot};

/// Broadcast event stream type used by frontend subscribers.
pub type EventStream = broadcast::Receiver<EngineEvent>;

/// Errors returned by engine channel operations.
#[derive(Debug, Error)]
pub enum EngineChannelError {
    /// The command receiver side is closed.
    #[error("command channel is closed")]
    CommandChannelClosed,
}

/// Command/event/snapshot channel bundle shared by runtime and frontends.
///
/// Events are push notifications and lossy for lagged subscribers; the watch
/// side always carries the latest full [`EngineSnapshot`], so a consumer that
/// fell behind resynchronizes by pulling it.
#[derive(Clone, Debug)]
pub struct EngineChannels {
    command_tx: mpsc::Sender<EngineCommand>,
    event_tx: broadcast::Sender<EngineEvent>,
    snapshot_rx: watch::Receiver<EngineSnapshot>,
}

impl EngineChannels {
    /// Create a new channel set and return it with the runtime-side endpoints:
    /// the command receiver the runtime drains and the watch sender it
    /// publishes snapshots through.
    pub fn new(
        command_buffer: usize,
        event_buffer: usize,
    ) -> (
        Self,
        mpsc::Receiver<EngineCommand>,
        watch::Sender<EngineSnapshot>,
    ) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(EngineSnapshot::default());

        (
            Self {
                command_tx,
                event_tx,
                snapshot_rx,
            },
            command_rx,
            snapshot_tx,
        )
    }

    /// Clone the command sender.
    pub fn command_sender(&self) -> mpsc::Sender<EngineCommand> {
        self.command_tx.clone()
    }

    /// Subscribe to emitted engine events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Send one command to the runtime.
    pub async fn send_command(&self, command: EngineCommand) -> Result<(), EngineChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| EngineChannelError::CommandChannelClosed)
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Latest published snapshot, cloned out of the watch slot.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshot_rx.borrow().clone()
    }
}
