use serde::{Deserialize, Serialize};

/// Push-stream connection phase reported to the frontend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    /// No stream is established and no attempt is in progress.
    #[default]
    Disconnected,
    /// A connect attempt is currently running.
    Connecting,
    /// The push stream is established and delivering frames.
    Connected,
    /// The engine shut down; no further transitions are possible.
    Terminated,
}

/// Per-user presence reported by the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    /// Actively connected.
    Online,
    /// Connected but idle.
    Away,
    /// Do not disturb; notifications suppressed.
    Dnd,
    /// Not connected.
    Offline,
}

/// Canonical message record used by timelines, threads, and push events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    /// Server-assigned identity; `None` until the send is confirmed.
    /// Stable once assigned.
    pub id: Option<String>,
    /// Locally generated identity while unconfirmed; doubles as the client
    /// idempotency token sent with the draft and echoed by cooperating
    /// backends.
    pub pending_id: Option<String>,
    /// Owning channel.
    pub channel_id: String,
    /// Author user ID.
    pub author_id: String,
    /// Display-ready text body.
    pub body: String,
    /// Thread root post ID; empty for a top-level post.
    pub root_id: String,
    /// Creation timestamp in milliseconds since Unix epoch.
    pub created_at_ms: u64,
    /// Last-edit timestamp; equals `created_at_ms` for unedited posts.
    pub updated_at_ms: u64,
    /// Whether this entry is an optimistic local post awaiting confirmation.
    pub is_pending: bool,
    /// Failure detail when a send was rejected; retained for manual retry.
    pub failure_reason: Option<String>,
}

impl Post {
    /// Identity string used for dedupe and deterministic tie-breaks: the
    /// server `id` when assigned, otherwise the `pending_id`.
    pub fn identity(&self) -> Option<&str> {
        self.id.as_deref().or(self.pending_id.as_deref())
    }

    /// Ordering key for timeline placement.
    pub fn sort_key(&self) -> (u64, &str) {
        (self.created_at_ms, self.identity().unwrap_or(""))
    }

    /// Whether this post belongs to a thread rather than a channel timeline.
    pub fn is_reply(&self) -> bool {
        !self.root_id.is_empty()
    }
}

/// Lightweight channel metadata for sidebar lists and unread tracking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelSummary {
    /// Channel ID.
    pub channel_id: String,
    /// Best-effort display name.
    pub display_name: String,
    /// Timestamp of the most recent post observed in the channel.
    pub last_post_at_ms: u64,
    /// Unread post count.
    pub unread_count: u64,
    /// Unread mention count.
    pub mention_count: u64,
}

/// One emoji reaction; identity is the full `(post, user, emoji)` triple.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Reaction {
    /// Target post ID.
    pub post_id: String,
    /// Reacting user ID.
    pub user_id: String,
    /// Emoji name, for example `thumbsup`.
    pub emoji_name: String,
}

/// Correlation record for an in-flight optimistic send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingSend {
    /// Locally generated correlation ID.
    pub pending_id: String,
    /// Target channel.
    pub channel_id: String,
    /// Sending user ID.
    pub author_id: String,
    /// Thread root ID; empty for a top-level send.
    pub root_id: String,
    /// Message body.
    pub body: String,
    /// Submission timestamp in milliseconds since Unix epoch.
    pub submitted_at_ms: u64,
}

/// Outbound message payload handed to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostDraft {
    /// Client idempotency token; cooperating backends echo it on the
    /// confirmed post.
    pub pending_id: String,
    /// Target channel.
    pub channel_id: String,
    /// Thread root ID; empty for a top-level send.
    pub root_id: String,
    /// Message body.
    pub body: String,
}

/// One page of channel history returned by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryPage {
    /// Channel the page belongs to.
    pub channel_id: String,
    /// Posts in display order (oldest first).
    pub posts: Vec<Post>,
    /// Whether older history remains beyond this page.
    pub has_more: bool,
    /// Opaque cursor for the next older page, when `has_more`.
    pub next_cursor: Option<String>,
}

/// Connection status surfaced to the frontend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    /// Current lifecycle phase.
    pub phase: ConnectionPhase,
    /// Convenience flag; `true` iff `phase == Connected`.
    pub connected: bool,
    /// Consecutive failed attempts since the last successful connect.
    pub reconnect_attempt: u32,
    /// Backoff hint until the next attempt, while disconnected.
    pub retry_in_ms: Option<u64>,
}

/// Engine tuning supplied at spawn time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Local user ID; used to author optimistic posts.
    pub user_id: String,
    /// History page size for channel opens and backward pagination.
    pub page_size: u16,
    /// Retention cap per channel timeline.
    pub timeline_max_posts: usize,
    /// Reconnect backoff base delay in milliseconds.
    pub retry_base_ms: u64,
    /// Reconnect backoff cap in milliseconds.
    pub retry_max_ms: u64,
    /// Reconnect attempt ceiling; `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    /// How long a typing observation stays visible.
    pub typing_ttl_ms: u64,
    /// Minimum spacing between backward pagination requests per channel.
    pub pagination_cooldown_ms: u64,
}

/// Default history page size.
pub const DEFAULT_PAGE_SIZE: u16 = 30;
/// Default per-channel timeline retention cap.
pub const DEFAULT_TIMELINE_MAX_POSTS: usize = 1_200;
/// Default reconnect backoff base.
pub const DEFAULT_RETRY_BASE_MS: u64 = 500;
/// Default reconnect backoff cap.
pub const DEFAULT_RETRY_MAX_MS: u64 = 30_000;
/// Default typing visibility window.
pub const DEFAULT_TYPING_TTL_MS: u64 = 5_000;
/// Default backward pagination cooldown.
pub const DEFAULT_PAGINATION_COOLDOWN_MS: u64 = 750;

impl EngineConfig {
    /// Build a config with defaults for everything except the user identity.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            page_size: DEFAULT_PAGE_SIZE,
            timeline_max_posts: DEFAULT_TIMELINE_MAX_POSTS,
            retry_base_ms: DEFAULT_RETRY_BASE_MS,
            retry_max_ms: DEFAULT_RETRY_MAX_MS,
            max_reconnect_attempts: None,
            typing_ttl_ms: DEFAULT_TYPING_TTL_MS,
            pagination_cooldown_ms: DEFAULT_PAGINATION_COOLDOWN_MS,
        }
    }
}

/// Command channel input accepted by the engine runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum EngineCommand {
    /// Establish the push stream and start supervision.
    Connect,
    /// Make a channel active and load its first history page.
    OpenChannel {
        /// Target channel ID.
        channel_id: String,
    },
    /// Request one older page for a channel.
    LoadOlderPosts {
        /// Target channel ID.
        channel_id: String,
    },
    /// Send a message, optimistically inserted before any round-trip.
    SendMessage {
        /// Target channel ID.
        channel_id: String,
        /// Message body.
        body: String,
        /// Thread root ID when replying; `None` for a top-level post.
        root_id: Option<String>,
    },
    /// Re-submit a failed send under a fresh pending ID.
    RetrySend {
        /// Pending ID of the failed send.
        pending_id: String,
    },
    /// Open a thread rooted at the given post and load its replies.
    OpenThread {
        /// Root post ID.
        root_id: String,
    },
    /// Mark a channel read; counters zero immediately, server call follows.
    MarkRead {
        /// Target channel ID.
        channel_id: String,
    },
    /// Stop the stream, clear all state, and terminate the engine.
    Shutdown,
}

impl EngineCommand {
    /// Stable command name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::OpenChannel { .. } => "open_channel",
            Self::LoadOlderPosts { .. } => "load_older_posts",
            Self::SendMessage { .. } => "send_message",
            Self::RetrySend { .. } => "retry_send",
            Self::OpenThread { .. } => "open_thread",
            Self::MarkRead { .. } => "mark_read",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Normalized push event set; every backend payload is decoded into exactly
/// one of these at the gateway boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PushEvent {
    /// A confirmed post was created.
    PostCreated { post: Post },
    /// An existing post was edited; carries the full updated post.
    PostEdited { post: Post },
    /// An existing post was deleted.
    PostDeleted { post: Post },
    /// A reaction was added.
    ReactionAdded { reaction: Reaction },
    /// A reaction was removed.
    ReactionRemoved { reaction: Reaction },
    /// A user is typing in a channel.
    TypingObserved { channel_id: String, user_id: String },
    /// A user's presence changed.
    PresenceChanged {
        user_id: String,
        status: PresenceStatus,
    },
    /// Incremental unread/mention adjustment for a channel.
    UnreadDelta {
        channel_id: String,
        unread_delta: i64,
        mention_delta: i64,
    },
    /// Channel metadata (name, last-post time) changed.
    ChannelMetadataChanged { channel: ChannelSummary },
    /// A channel became visible to the user.
    ChannelAdded { channel: ChannelSummary },
}

impl PushEvent {
    /// Stable event name for logging; matches the serde tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PostCreated { .. } => "post_created",
            Self::PostEdited { .. } => "post_edited",
            Self::PostDeleted { .. } => "post_deleted",
            Self::ReactionAdded { .. } => "reaction_added",
            Self::ReactionRemoved { .. } => "reaction_removed",
            Self::TypingObserved { .. } => "typing_observed",
            Self::PresenceChanged { .. } => "presence_changed",
            Self::UnreadDelta { .. } => "unread_delta",
            Self::ChannelMetadataChanged { .. } => "channel_metadata_changed",
            Self::ChannelAdded { .. } => "channel_added",
        }
    }

    /// Channel affinity, when the event targets one.
    pub fn channel_id(&self) -> Option<&str> {
        match self {
            Self::PostCreated { post } | Self::PostEdited { post } | Self::PostDeleted { post } => {
                Some(&post.channel_id)
            }
            Self::TypingObserved { channel_id, .. } | Self::UnreadDelta { channel_id, .. } => {
                Some(channel_id)
            }
            Self::ChannelMetadataChanged { channel } | Self::ChannelAdded { channel } => {
                Some(&channel.channel_id)
            }
            Self::ReactionAdded { .. }
            | Self::ReactionRemoved { .. }
            | Self::PresenceChanged { .. } => None,
        }
    }
}

/// One frame read from the push stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum GatewayFrame {
    /// Liveness frame; carries no state change.
    Heartbeat,
    /// A normalized push event.
    Event(PushEvent),
}

/// Event channel output emitted by the engine runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum EngineEvent {
    /// Connection lifecycle update.
    ConnectionChanged {
        /// Latest connection status.
        status: ConnectionStatus,
    },
    /// Full channel list replacement, unread counts included.
    ChannelListUpdated {
        /// Latest channel summaries.
        channels: Vec<ChannelSummary>,
    },
    /// Snapshot of the active channel's timeline after a change.
    TimelineUpdated {
        /// Channel the snapshot belongs to.
        channel_id: String,
        /// Posts in display order (oldest first).
        posts: Vec<Post>,
        /// Whether older history remains.
        has_more: bool,
    },
    /// Snapshot of the open thread's replies after a change.
    ThreadUpdated {
        /// Thread root post ID.
        root_id: String,
        /// Replies in display order.
        replies: Vec<Post>,
    },
    /// Reaction set replacement for one post.
    ReactionsUpdated {
        /// Channel owning the post.
        channel_id: String,
        /// Target post ID.
        post_id: String,
        /// Current reactions on the post.
        reactions: Vec<Reaction>,
    },
    /// Users currently typing in a channel.
    TypingUpdated {
        /// Target channel ID.
        channel_id: String,
        /// User IDs with unexpired typing observations.
        user_ids: Vec<String>,
    },
    /// A user's presence changed.
    PresenceUpdated {
        user_id: String,
        status: PresenceStatus,
    },
    /// Unrecoverable or noteworthy runtime error.
    FatalError {
        /// Stable engine error code.
        code: String,
        /// Human-readable message.
        message: String,
        /// Whether retrying may recover.
        recoverable: bool,
    },
}

impl EngineEvent {
    /// Stable event name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionChanged { .. } => "connection_changed",
            Self::ChannelListUpdated { .. } => "channel_list_updated",
            Self::TimelineUpdated { .. } => "timeline_updated",
            Self::ThreadUpdated { .. } => "thread_updated",
            Self::ReactionsUpdated { .. } => "reactions_updated",
            Self::TypingUpdated { .. } => "typing_updated",
            Self::PresenceUpdated { .. } => "presence_updated",
            Self::FatalError { .. } => "fatal_error",
        }
    }
}

/// Pull-based snapshot of everything the frontend renders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EngineSnapshot {
    /// Connection status.
    pub connection: ConnectionStatus,
    /// Channel list with unread counts.
    pub channels: Vec<ChannelSummary>,
    /// Active channel, when one is open.
    pub active_channel_id: Option<String>,
    /// Active channel's timeline in display order.
    pub timeline: Vec<Post>,
    /// Whether older history remains for the active channel.
    pub timeline_has_more: bool,
    /// Open thread root, when one is open.
    pub active_thread_root_id: Option<String>,
    /// Open thread's replies in display order.
    pub thread_replies: Vec<Post>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: &str, channel_id: &str) -> Post {
        Post {
            id: Some(id.to_owned()),
            pending_id: None,
            channel_id: channel_id.to_owned(),
            author_id: "user-1".to_owned(),
            body: "hello".to_owned(),
            root_id: String::new(),
            created_at_ms: 1_000,
            updated_at_ms: 1_000,
            is_pending: false,
            failure_reason: None,
        }
    }

    #[test]
    fn push_events_use_snake_case_type_tags() {
        let event = PushEvent::PostCreated {
            post: post("p1", "c1"),
        };
        let value = serde_json::to_value(&event).expect("event should serialize");

        assert_eq!(value["type"], "post_created");
        assert_eq!(value["data"]["post"]["id"], "p1");

        let decoded: PushEvent =
            serde_json::from_value(value).expect("event should round-trip through the tagged form");
        assert_eq!(decoded.kind(), "post_created");

        let wire = serde_json::json!({
            "type": "presence_changed",
            "data": { "user_id": "u7", "status": "online" }
        });
        let presence: PushEvent =
            serde_json::from_value(wire).expect("lowercase presence status should decode");
        assert!(matches!(
            presence,
            PushEvent::PresenceChanged {
                status: PresenceStatus::Online,
                ..
            }
        ));
        let encoded = serde_json::to_value(&presence).expect("presence should serialize");
        assert_eq!(encoded["data"]["status"], "online");
    }

    #[test]
    fn push_event_channel_affinity_covers_post_and_channel_variants() {
        let created = PushEvent::PostCreated {
            post: post("p1", "c1"),
        };
        assert_eq!(created.channel_id(), Some("c1"));

        let typing = PushEvent::TypingObserved {
            channel_id: "c2".to_owned(),
            user_id: "user-2".to_owned(),
        };
        assert_eq!(typing.channel_id(), Some("c2"));

        let presence = PushEvent::PresenceChanged {
            user_id: "user-2".to_owned(),
            status: PresenceStatus::Away,
        };
        assert_eq!(presence.channel_id(), None);
    }

    #[test]
    fn post_identity_prefers_server_id() {
        let mut p = post("s1", "c1");
        p.pending_id = Some("local-1".to_owned());
        assert_eq!(p.identity(), Some("s1"));

        p.id = None;
        assert_eq!(p.identity(), Some("local-1"));
    }

    #[test]
    fn sort_key_orders_by_time_then_identity() {
        let early = post("b", "c1");
        let mut late = post("a", "c1");
        late.created_at_ms = 2_000;

        assert!(early.sort_key() < late.sort_key());

        let tied = post("a", "c1");
        assert!(tied.sort_key() < early.sort_key());
    }
}
