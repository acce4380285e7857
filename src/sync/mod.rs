//! Sync Module
//!
//! Real-time permission change propagation over a live push channel.

mod channel;
pub mod message;

pub use channel::{ApplyOutcome, SyncChannel};
pub use message::{ClientFrame, ServerFrame, SyncKind, SyncMessage};

use serde::Serialize;

// == Connection State ==
/// Lifecycle of the live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Socket open, auth frame sent
    Connected,
    /// Server acknowledged the auth frame
    Authenticated,
}

// == Sync Events ==
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    StateChanged(ConnectionState),
    MessageApplied { kind: SyncKind, actor_id: String },
    /// The driver gave up and waits for a wake-up
    ReconnectExhausted { attempts: u32 },
}
