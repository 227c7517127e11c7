use engine_core::{PresenceStatus, PushEvent};
use tracing::{debug, trace};

use crate::{
    pending::SendTracker, reconcile::match_echo, timeline::TimelineStore, unread::UnreadBoard,
};

/// Mutable view of the runtime state a push event may touch.
pub struct RouterContext<'a> {
    pub timeline: &'a mut TimelineStore,
    pub sends: &'a mut SendTracker,
    pub board: &'a mut UnreadBoard,
    /// Channel the user currently has open, if any.
    pub active_channel: Option<&'a str>,
    /// Our own user id; used to skip self-originated typing marks.
    pub own_user_id: &'a str,
    pub now_ms: u64,
}

/// What a routed event actually changed, for precise emission.
///
/// A redelivered or irrelevant event leaves every field at its default, so
/// the runtime emits nothing for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Channel whose timeline content changed.
    pub timeline_changed: Option<String>,
    /// The open thread's replies changed (or the thread closed).
    pub thread_changed: bool,
    /// The channel list (names, recency, counters) changed.
    pub channels_changed: bool,
    /// `(channel_id, post_id)` whose reaction set changed.
    pub reactions_changed: Option<(String, String)>,
    /// Channel whose typing set changed.
    pub typing_changed: Option<String>,
    /// A user's presence actually transitioned.
    pub presence_changed: Option<(String, PresenceStatus)>,
}

/// Apply one push event to the stores.
///
/// Creations consult the send tracker first so a confirmed echo replaces its
/// optimistic entry instead of duplicating it. Replies follow thread
/// affinity: they land in the open thread when the root matches and are
/// dropped otherwise, so closed threads never accumulate entries; channel
/// timelines hold top-level posts only. The channel list still learns about
/// the activity either way. Every arm tolerates unknown ids and redelivery
/// without effect.
pub fn route_event(ctx: &mut RouterContext<'_>, event: PushEvent) -> RouteOutcome {
    let mut outcome = RouteOutcome::default();

    match event {
        PushEvent::PostCreated { post } => {
            let channel_id = post.channel_id.clone();

            if let Some(resolved) = match_echo(ctx.sends, &post) {
                let pending_in_thread = thread_contains(ctx.timeline, &resolved.pending_id);
                let pending_in_channel = ctx
                    .timeline
                    .posts(&channel_id)
                    .iter()
                    .any(|p| p.identity() == Some(resolved.pending_id.as_str()));
                if ctx.timeline.remove_post(&channel_id, &resolved.pending_id) {
                    if pending_in_channel {
                        outcome.timeline_changed = Some(channel_id.clone());
                    }
                    outcome.thread_changed = pending_in_thread;
                }
                debug!(
                    pending_id = %resolved.pending_id,
                    post_id = post.id.as_deref().unwrap_or(""),
                    "send confirmed by stream echo"
                );
            }

            if ctx.board.note_post(&channel_id, post.created_at_ms) {
                outcome.channels_changed = true;
            }

            if post.is_reply() {
                let thread_open = ctx
                    .timeline
                    .thread()
                    .is_some_and(|view| view.root_id == post.root_id);
                if thread_open {
                    if ctx.timeline.insert_thread_reply(post) {
                        outcome.thread_changed = true;
                    }
                } else {
                    trace!(channel_id = %channel_id, "reply for a closed thread dropped");
                }
            } else if ctx.timeline.has_channel(&channel_id) {
                if ctx.timeline.insert_live(post) {
                    outcome.timeline_changed = Some(channel_id);
                }
            } else {
                trace!(channel_id = %channel_id, "post for unloaded channel kept off timelines");
            }
        }
        PushEvent::PostEdited { post } => {
            let in_thread = post
                .identity()
                .is_some_and(|identity| thread_contains(ctx.timeline, identity));
            let in_channel = ctx
                .timeline
                .posts(&post.channel_id)
                .iter()
                .any(|p| p.identity() == post.identity());
            if ctx.timeline.update_post(&post) {
                if in_channel {
                    outcome.timeline_changed = Some(post.channel_id.clone());
                }
                outcome.thread_changed = in_thread;
            }
        }
        PushEvent::PostDeleted { post } => {
            let Some(identity) = post.identity().map(str::to_owned) else {
                return outcome;
            };
            let in_thread = thread_contains(ctx.timeline, &identity);
            let in_channel = ctx
                .timeline
                .posts(&post.channel_id)
                .iter()
                .any(|p| p.identity() == Some(identity.as_str()));
            if ctx.timeline.remove_post(&post.channel_id, &identity) {
                if in_channel {
                    outcome.timeline_changed = Some(post.channel_id.clone());
                }
                outcome.thread_changed = in_thread;
            }
        }
        PushEvent::ReactionAdded { reaction } => {
            let owner = ctx
                .timeline
                .find_post(&reaction.post_id)
                .map(|p| p.channel_id.clone());
            if let Some(channel_id) = owner
                && ctx.timeline.add_reaction(reaction.clone())
            {
                outcome.reactions_changed = Some((channel_id, reaction.post_id));
            }
        }
        PushEvent::ReactionRemoved { reaction } => {
            let owner = ctx
                .timeline
                .find_post(&reaction.post_id)
                .map(|p| p.channel_id.clone());
            if let Some(channel_id) = owner
                && ctx.timeline.remove_reaction(&reaction)
            {
                outcome.reactions_changed = Some((channel_id, reaction.post_id));
            }
        }
        PushEvent::TypingObserved {
            channel_id,
            user_id,
        } => {
            if user_id != ctx.own_user_id {
                ctx.board.observe_typing(&channel_id, &user_id, ctx.now_ms);
                outcome.typing_changed = Some(channel_id);
            }
        }
        PushEvent::PresenceChanged { user_id, status } => {
            if ctx.board.set_presence(&user_id, status) {
                outcome.presence_changed = Some((user_id, status));
            }
        }
        PushEvent::UnreadDelta {
            channel_id,
            unread_delta,
            mention_delta,
        } => {
            if ctx
                .board
                .apply_delta(&channel_id, unread_delta, mention_delta, ctx.active_channel)
            {
                outcome.channels_changed = true;
            }
        }
        PushEvent::ChannelMetadataChanged { channel } => {
            if ctx.board.update_metadata(&channel) {
                outcome.channels_changed = true;
            }
        }
        PushEvent::ChannelAdded { channel } => {
            if ctx.board.add_channel(channel) {
                outcome.channels_changed = true;
            }
        }
    }

    outcome
}

fn thread_contains(timeline: &TimelineStore, identity: &str) -> bool {
    timeline.thread().is_some_and(|view| {
        view.root_id == identity || view.replies.iter().any(|p| p.identity() == Some(identity))
    })
}
