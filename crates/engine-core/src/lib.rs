//! Core engine contract shared between the sync runtime and frontend
//! consumers.
//!
//! This crate defines the command/event protocol, the connection lifecycle
//! model, retry policy, and common error/channel abstractions.

/// Async command/event/snapshot channel primitives.
pub mod channel;
/// Connection lifecycle tracking and command gating.
pub mod connection;
/// Stable engine error types and HTTP classification helpers.
pub mod error;
/// Backoff policy used by the reconnect supervisor.
pub mod retry;
/// Frontend-facing protocol types (commands, events, payloads).
pub mod types;

pub use channel::{EngineChannelError, EngineChannels, EventStream};
pub use connection::ConnectionTracker;
pub use error::{EngineError, EngineErrorCategory, classify_http_status};
pub use retry::RetryPolicy;
pub use types::{
    ChannelSummary, ConnectionPhase, ConnectionStatus, EngineCommand, EngineConfig, EngineEvent,
    EngineSnapshot, GatewayFrame, HistoryPage, PendingSend, Post, PostDraft, PresenceStatus,
    PushEvent, Reaction,
};
