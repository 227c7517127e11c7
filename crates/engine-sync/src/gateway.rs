//! Transport seam between the sync runtime and a concrete chat server.

use async_trait::async_trait;

use engine_core::{ChannelSummary, EngineError, GatewayFrame, HistoryPage, Post, PostDraft};

/// Server transport the runtime drives.
///
/// Implementations cover both the request side (history, threads, sends,
/// read marks) and the push stream (`connect` + `next_frame`). All methods
/// take `&self`; implementations guard their own connection state so one
/// instance can be shared across the runtime's spawned calls.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Establish the push stream. Called once per reconnect attempt.
    async fn connect(&self) -> Result<(), EngineError>;

    /// Wait for the next frame on the established stream.
    ///
    /// An `Err` means the stream dropped; the supervisor schedules a
    /// reconnect from it.
    async fn next_frame(&self) -> Result<GatewayFrame, EngineError>;

    /// Fetch the joined channel list with server-side unread counts.
    async fn fetch_channels(&self) -> Result<Vec<ChannelSummary>, EngineError>;

    /// Fetch one history page for a channel.
    ///
    /// `cursor` of `None` requests the newest page; otherwise the page older
    /// than the cursor returned by the previous call.
    async fn fetch_history(
        &self,
        channel_id: &str,
        cursor: Option<&str>,
        limit: u16,
    ) -> Result<HistoryPage, EngineError>;

    /// Fetch every reply under a thread root.
    async fn fetch_thread(&self, root_id: &str) -> Result<Vec<Post>, EngineError>;

    /// Submit a draft post. The returned post carries the server-assigned id
    /// and echoes the draft's pending id as its idempotency token.
    async fn send_post(&self, draft: &PostDraft) -> Result<Post, EngineError>;

    /// Move the server-side read marker for a channel to now.
    async fn mark_read(&self, channel_id: &str) -> Result<(), EngineError>;
}
