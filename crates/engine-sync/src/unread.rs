use std::collections::HashMap;

use engine_core::{ChannelSummary, PresenceStatus};

#[derive(Debug, Clone)]
struct TypingMark {
    user_id: String,
    expires_at_ms: u64,
}

/// Sidebar state: the channel list with unread/mention counters, presence,
/// and short-lived typing marks.
///
/// Counters move through exactly three paths. A bulk snapshot replaces them
/// wholesale, per-channel deltas adjust them (except for the channel the
/// user is looking at), and a read mark zeroes them. Everything else leaves
/// them alone.
#[derive(Debug, Clone)]
pub struct UnreadBoard {
    channels: HashMap<String, ChannelSummary>,
    presence: HashMap<String, PresenceStatus>,
    typing: HashMap<String, Vec<TypingMark>>,
    typing_ttl_ms: u64,
}

impl UnreadBoard {
    pub fn new(typing_ttl_ms: u64) -> Self {
        Self {
            channels: HashMap::new(),
            presence: HashMap::new(),
            typing: HashMap::new(),
            typing_ttl_ms,
        }
    }

    /// Replace the whole channel list with a server snapshot.
    pub fn replace_snapshot(&mut self, channels: Vec<ChannelSummary>) {
        self.channels = channels
            .into_iter()
            .map(|summary| (summary.channel_id.clone(), summary))
            .collect();
    }

    /// Channel list ordered by recency, then name, then id.
    pub fn channel_list(&self) -> Vec<ChannelSummary> {
        let mut list: Vec<ChannelSummary> = self.channels.values().cloned().collect();
        list.sort_by(|a, b| {
            b.last_post_at_ms
                .cmp(&a.last_post_at_ms)
                .then_with(|| a.display_name.cmp(&b.display_name))
                .then_with(|| a.channel_id.cmp(&b.channel_id))
        });
        list
    }

    pub fn summary(&self, channel_id: &str) -> Option<&ChannelSummary> {
        self.channels.get(channel_id)
    }

    /// Apply a server counter delta.
    ///
    /// The channel the user has open never accumulates unread from deltas;
    /// its read mark is what the server hears instead. Negative deltas
    /// saturate at zero and unknown channels are ignored.
    pub fn apply_delta(
        &mut self,
        channel_id: &str,
        unread_delta: i64,
        mention_delta: i64,
        open_channel: Option<&str>,
    ) -> bool {
        if open_channel == Some(channel_id) {
            return false;
        }
        let Some(summary) = self.channels.get_mut(channel_id) else {
            return false;
        };
        summary.unread_count = saturating_apply(summary.unread_count, unread_delta);
        summary.mention_count = saturating_apply(summary.mention_count, mention_delta);
        true
    }

    /// Zero a channel's counters ahead of the server acknowledging the read.
    pub fn mark_read(&mut self, channel_id: &str) -> bool {
        let Some(summary) = self.channels.get_mut(channel_id) else {
            return false;
        };
        summary.unread_count = 0;
        summary.mention_count = 0;
        true
    }

    /// Bump a channel's recency when a post lands in it; reports whether the
    /// recency actually advanced.
    pub fn note_post(&mut self, channel_id: &str, created_at_ms: u64) -> bool {
        let Some(summary) = self.channels.get_mut(channel_id) else {
            return false;
        };
        if created_at_ms <= summary.last_post_at_ms {
            return false;
        }
        summary.last_post_at_ms = created_at_ms;
        true
    }

    /// Add a channel announced by the server; already-known ids are a no-op.
    pub fn add_channel(&mut self, summary: ChannelSummary) -> bool {
        if self.channels.contains_key(&summary.channel_id) {
            return false;
        }
        self.channels.insert(summary.channel_id.clone(), summary);
        true
    }

    /// Apply a metadata change (rename, recency) without touching the local
    /// counters; those only move through snapshot, delta, and read paths.
    pub fn update_metadata(&mut self, incoming: &ChannelSummary) -> bool {
        let Some(summary) = self.channels.get_mut(&incoming.channel_id) else {
            return false;
        };
        summary.display_name = incoming.display_name.clone();
        summary.last_post_at_ms = summary.last_post_at_ms.max(incoming.last_post_at_ms);
        true
    }

    /// Record a user's presence; returns whether it changed.
    pub fn set_presence(&mut self, user_id: &str, status: PresenceStatus) -> bool {
        match self.presence.insert(user_id.to_owned(), status) {
            Some(previous) => previous != status,
            None => true,
        }
    }

    pub fn presence_of(&self, user_id: &str) -> PresenceStatus {
        self.presence
            .get(user_id)
            .copied()
            .unwrap_or(PresenceStatus::Offline)
    }

    /// Record a typing observation; refreshes the mark if already present.
    pub fn observe_typing(&mut self, channel_id: &str, user_id: &str, now_ms: u64) {
        let marks = self.typing.entry(channel_id.to_owned()).or_default();
        marks.retain(|mark| mark.expires_at_ms > now_ms && mark.user_id != user_id);
        marks.push(TypingMark {
            user_id: user_id.to_owned(),
            expires_at_ms: now_ms.saturating_add(self.typing_ttl_ms),
        });
    }

    /// Users with a live typing mark in a channel.
    pub fn active_typists(&self, channel_id: &str, now_ms: u64) -> Vec<String> {
        self.typing
            .get(channel_id)
            .map(|marks| {
                marks
                    .iter()
                    .filter(|mark| mark.expires_at_ms > now_ms)
                    .map(|mark| mark.user_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn saturating_apply(counter: u64, delta: i64) -> u64 {
    if delta >= 0 {
        counter.saturating_add(delta as u64)
    } else {
        counter.saturating_sub(delta.unsigned_abs())
    }
}
