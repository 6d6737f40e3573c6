//! Change notifications delivered by a coordination store
//!
//! Tree changes and connection state changes travel on separate broadcast
//! channels; [`StoreSubscription`] merges them into a single stream of
//! [`StoreEvent`]s, always handing out pending connection changes first.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Kind of change applied to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TreeEventKind {
    /// Node was created
    Added,
    /// Node value was replaced
    Updated,
    /// Node was deleted (explicitly or by session expiry)
    Removed,
}

/// A single node change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEvent {
    /// What happened
    pub kind: TreeEventKind,

    /// Absolute node path
    pub path: String,

    /// Node value after the change (value before removal for `Removed`)
    pub data: String,
}

impl TreeEvent {
    /// Create a new tree event
    pub fn new(kind: TreeEventKind, path: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            data: data.into(),
        }
    }
}

/// Client connection state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// First connection established
    Connected,
    /// Connection (and possibly the session) lost
    Lost,
    /// Connection re-established after a loss
    Reconnected,
}

/// Event observed by a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Tree(TreeEvent),
    Connection(ConnectionState),
}

/// Receiving side of a store subscription
pub struct StoreSubscription {
    tree: broadcast::Receiver<TreeEvent>,
    connection: broadcast::Receiver<ConnectionState>,
}

impl StoreSubscription {
    /// Build a subscription from the two underlying channels
    pub fn new(
        tree: broadcast::Receiver<TreeEvent>,
        connection: broadcast::Receiver<ConnectionState>,
    ) -> Self {
        Self { tree, connection }
    }

    /// Wait for the next event; `None` once both channels are closed
    pub async fn recv(&mut self) -> Option<StoreEvent> {
        let mut tree_open = true;
        let mut connection_open = true;

        while tree_open || connection_open {
            tokio::select! {
                biased;
                state = self.connection.recv(), if connection_open => match state {
                    Ok(state) => return Some(StoreEvent::Connection(state)),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Connection events lagged");
                    }
                    Err(RecvError::Closed) => connection_open = false,
                },
                event = self.tree.recv(), if tree_open => match event {
                    Ok(event) => return Some(StoreEvent::Tree(event)),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Tree events lagged, some watches were missed");
                    }
                    Err(RecvError::Closed) => tree_open = false,
                },
            }
        }

        None
    }
}
