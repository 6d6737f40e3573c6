//! Trigger channel between the external scheduler and the job runner
//!
//! The engine does not own trigger timing. Whatever drives the schedule
//! (cron library, timer, operator) holds a [`TriggerHandle`] and sends
//! commands; the runner drains them. `Fire` commands are coalesced when the
//! queue is full, a dropped fire is equivalent to a trigger that arrived
//! while the previous one was still queued.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Command understood by the job runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerCommand {
    /// Run the job once now
    Fire,
    /// Ignore fires until resumed
    Pause,
    /// Accept fires again
    Resume,
    /// Stop the runner after in-flight executions finish
    Shutdown,
}

/// Sending side of a job's trigger channel
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<TriggerCommand>,
}

impl TriggerHandle {
    /// Create a trigger channel with room for `capacity` pending commands
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TriggerCommand>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Scheduling starts with the runner; kept for symmetry with `shutdown`
    pub fn start(&self) {}

    /// Request one execution now, `false` if it was coalesced or dropped
    pub fn trigger_now(&self) -> bool {
        self.send(TriggerCommand::Fire)
    }

    /// Pause the runner
    pub fn pause(&self) -> bool {
        self.send(TriggerCommand::Pause)
    }

    /// Resume the runner
    pub fn resume(&self) -> bool {
        self.send(TriggerCommand::Resume)
    }

    /// Ask the runner to stop
    pub fn shutdown(&self) -> bool {
        self.send(TriggerCommand::Shutdown)
    }

    /// Whether the runner has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, command: TriggerCommand) -> bool {
        match self.tx.try_send(command) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(?command, "Trigger queue full, command coalesced");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!(?command, "Trigger channel closed");
                false
            }
        }
    }
}

/// Fire `handle` every `period` until the runner goes away
pub fn spawn_interval_trigger(handle: TriggerHandle, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if handle.is_closed() {
                break;
            }
            handle.trigger_now();
        }
    })
}
