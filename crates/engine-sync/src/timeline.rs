use std::collections::{BTreeSet, HashMap};

use engine_core::{Post, Reaction};

/// One open thread: the root post id plus its replies in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadView {
    pub root_id: String,
    pub replies: Vec<Post>,
}

#[derive(Debug, Clone, Default)]
struct ChannelTimeline {
    posts: Vec<Post>,
}

/// In-memory post store: per-channel timelines, at most one open thread, and
/// reaction sets keyed by post.
///
/// Every timeline is kept in ascending `(created_at_ms, identity)` order with
/// no duplicate identities; all mutations preserve both invariants. Channel
/// timelines hold top-level posts only; replies live in the open thread view
/// and nowhere else. Channel timelines are bounded; once a channel exceeds
/// the cap its oldest entries are evicted.
#[derive(Debug, Clone)]
pub struct TimelineStore {
    channels: HashMap<String, ChannelTimeline>,
    thread: Option<ThreadView>,
    reactions: HashMap<String, BTreeSet<Reaction>>,
    max_posts: usize,
}

impl TimelineStore {
    /// Create a store with a per-channel post cap (`max_posts >= 1`).
    pub fn new(max_posts: usize) -> Self {
        Self {
            channels: HashMap::new(),
            thread: None,
            reactions: HashMap::new(),
            max_posts: max_posts.max(1),
        }
    }

    /// Posts for a channel in display order; empty when never loaded.
    pub fn posts(&self, channel_id: &str) -> &[Post] {
        self.channels
            .get(channel_id)
            .map(|timeline| timeline.posts.as_slice())
            .unwrap_or(&[])
    }

    /// Whether a channel timeline has been loaded, even if currently empty.
    pub fn has_channel(&self, channel_id: &str) -> bool {
        self.channels.contains_key(channel_id)
    }

    /// The open thread, if any.
    pub fn thread(&self) -> Option<&ThreadView> {
        self.thread.as_ref()
    }

    /// Reactions currently attached to a post.
    pub fn reactions_for(&self, post_id: &str) -> Vec<Reaction> {
        self.reactions
            .get(post_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Look a post up by identity across loaded timelines and the open
    /// thread.
    pub fn find_post(&self, post_id: &str) -> Option<&Post> {
        let in_channel = self
            .channels
            .values()
            .flat_map(|timeline| timeline.posts.iter())
            .find(|p| p.identity() == Some(post_id));
        in_channel.or_else(|| {
            self.thread
                .as_ref()
                .and_then(|view| view.replies.iter().find(|p| p.identity() == Some(post_id)))
        })
    }

    /// Whether a post id is present in any loaded timeline or the open thread.
    pub fn contains_post(&self, post_id: &str) -> bool {
        self.find_post(post_id).is_some()
    }

    /// Replace a channel's timeline with a freshly fetched page.
    ///
    /// Replies in the page are dropped; history endpoints may interleave them
    /// with roots. Unconfirmed local sends for the channel are carried over
    /// so a refetch never hides them. Returns the number of oldest entries
    /// evicted by the retention cap.
    pub fn load_page(&mut self, channel_id: &str, page_posts: Vec<Post>) -> usize {
        let pending: Vec<Post> = self
            .posts(channel_id)
            .iter()
            .filter(|p| p.is_pending)
            .cloned()
            .collect();
        let previous_ids: Vec<String> = self
            .posts(channel_id)
            .iter()
            .filter_map(|p| p.identity().map(str::to_owned))
            .collect();

        let mut posts = page_posts;
        posts.retain(|p| !p.is_reply());
        posts.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        posts.dedup_by(|next, kept| next.identity() == kept.identity());

        let timeline = self.channels.entry(channel_id.to_owned()).or_default();
        timeline.posts = posts;
        for post in pending {
            ordered_insert(&mut timeline.posts, post);
        }
        let evicted = trim_oldest(&mut timeline.posts, self.max_posts).len();

        for id in previous_ids {
            if !self.contains_post(&id) {
                self.reactions.remove(&id);
            }
        }
        evicted
    }

    /// Merge an older history page below the already-loaded entries.
    ///
    /// Entries already present are left untouched; only new top-level
    /// identities are inserted, each at its ordered position. Returns how
    /// many were new.
    pub fn prepend_older(&mut self, channel_id: &str, page_posts: Vec<Post>) -> usize {
        let timeline = self.channels.entry(channel_id.to_owned()).or_default();
        let mut inserted = 0;
        for post in page_posts {
            if post.is_reply() {
                continue;
            }
            if ordered_insert(&mut timeline.posts, post) {
                inserted += 1;
            }
        }
        for id in trim_oldest(&mut timeline.posts, self.max_posts) {
            self.reactions.remove(&id);
        }
        inserted
    }

    /// Insert one post into its owning channel at its ordered position.
    ///
    /// A duplicate identity folds into the stored entry last-writer-wins by
    /// `updated_at_ms`, so redelivered pushes converge in any arrival order.
    /// Replies are rejected; they belong to the open thread view. Returns
    /// whether the timeline changed.
    pub fn insert_live(&mut self, post: Post) -> bool {
        if post.is_reply() {
            return false;
        }
        let timeline = self.channels.entry(post.channel_id.clone()).or_default();
        let changed = insert_or_merge(&mut timeline.posts, post);
        for id in trim_oldest(&mut timeline.posts, self.max_posts) {
            self.reactions.remove(&id);
        }
        changed
    }

    /// Apply an edited revision in place, in the channel and the open thread.
    ///
    /// Last writer wins: a revision older than what is already stored is
    /// skipped. Unknown ids are a no-op. Position never changes; `created_at`
    /// is immutable under edits.
    pub fn update_post(&mut self, revised: &Post) -> bool {
        let mut applied = false;
        if let Some(timeline) = self.channels.get_mut(&revised.channel_id)
            && let Some(existing) = timeline
                .posts
                .iter_mut()
                .find(|p| p.identity() == revised.identity())
            && existing.updated_at_ms <= revised.updated_at_ms
        {
            *existing = revised.clone();
            applied = true;
        }
        if let Some(view) = self.thread.as_mut()
            && let Some(existing) = view
                .replies
                .iter_mut()
                .find(|p| p.identity() == revised.identity())
            && existing.updated_at_ms <= revised.updated_at_ms
        {
            *existing = revised.clone();
            applied = true;
        }
        applied
    }

    /// Remove a post everywhere it appears and drop its reactions.
    ///
    /// Unknown ids are a no-op. Removing the open thread's root closes the
    /// thread.
    pub fn remove_post(&mut self, channel_id: &str, identity: &str) -> bool {
        let mut removed = false;
        if let Some(timeline) = self.channels.get_mut(channel_id)
            && let Some(at) = timeline
                .posts
                .iter()
                .position(|p| p.identity() == Some(identity))
        {
            timeline.posts.remove(at);
            removed = true;
        }
        let closes_thread = self
            .thread
            .as_ref()
            .is_some_and(|view| view.root_id == identity);
        if closes_thread {
            self.thread = None;
            removed = true;
        } else if let Some(view) = self.thread.as_mut()
            && let Some(at) = view
                .replies
                .iter()
                .position(|p| p.identity() == Some(identity))
        {
            view.replies.remove(at);
            removed = true;
        }
        if removed {
            self.reactions.remove(identity);
        }
        removed
    }

    /// Flag an unconfirmed send as failed, keeping it visible for retry.
    pub fn flag_failed(&mut self, channel_id: &str, pending_id: &str, reason: &str) -> bool {
        let mut flagged = false;
        if let Some(timeline) = self.channels.get_mut(channel_id)
            && let Some(post) = timeline
                .posts
                .iter_mut()
                .find(|p| p.identity() == Some(pending_id))
        {
            post.failure_reason = Some(reason.to_owned());
            flagged = true;
        }
        if let Some(view) = self.thread.as_mut()
            && let Some(post) = view
                .replies
                .iter_mut()
                .find(|p| p.identity() == Some(pending_id))
        {
            post.failure_reason = Some(reason.to_owned());
            flagged = true;
        }
        flagged
    }

    /// Replace the open thread with freshly fetched replies.
    pub fn load_thread(&mut self, root_id: &str, replies: Vec<Post>) {
        let mut replies = replies;
        replies.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        replies.dedup_by(|next, kept| next.identity() == kept.identity());
        self.thread = Some(ThreadView {
            root_id: root_id.to_owned(),
            replies,
        });
    }

    /// Insert one reply into the open thread, if it belongs there.
    ///
    /// Duplicates fold last-writer-wins, same as [`Self::insert_live`].
    pub fn insert_thread_reply(&mut self, post: Post) -> bool {
        let Some(view) = self.thread.as_mut() else {
            return false;
        };
        if post.root_id != view.root_id {
            return false;
        }
        insert_or_merge(&mut view.replies, post)
    }

    /// Drop the open thread (channel switches do this).
    pub fn clear_thread(&mut self) {
        self.thread = None;
    }

    /// Attach a reaction; duplicate `(post, user, emoji)` triples collapse.
    ///
    /// Reactions for posts not in memory are dropped.
    pub fn add_reaction(&mut self, reaction: Reaction) -> bool {
        if !self.contains_post(&reaction.post_id) {
            return false;
        }
        self.reactions
            .entry(reaction.post_id.clone())
            .or_default()
            .insert(reaction)
    }

    /// Detach a reaction; absent triples are a no-op.
    pub fn remove_reaction(&mut self, reaction: &Reaction) -> bool {
        let Some(set) = self.reactions.get_mut(&reaction.post_id) else {
            return false;
        };
        let removed = set.remove(reaction);
        if set.is_empty() {
            self.reactions.remove(&reaction.post_id);
        }
        removed
    }
}

/// Insert at the `(created_at_ms, identity)` position; `false` on duplicate.
fn ordered_insert(posts: &mut Vec<Post>, post: Post) -> bool {
    if posts.iter().any(|p| p.identity() == post.identity()) {
        return false;
    }
    let at = posts.partition_point(|p| p.sort_key() < post.sort_key());
    posts.insert(at, post);
    true
}

/// Insert at the ordered position, folding a duplicate identity into the
/// stored entry last-writer-wins by `updated_at_ms`. Returns whether the
/// list changed.
fn insert_or_merge(posts: &mut Vec<Post>, post: Post) -> bool {
    if let Some(existing) = posts.iter_mut().find(|p| p.identity() == post.identity()) {
        return merge_revision(existing, post);
    }
    let at = posts.partition_point(|p| p.sort_key() < post.sort_key());
    posts.insert(at, post);
    true
}

/// Fold a duplicate delivery into the stored copy. Only the fields that may
/// legitimately change move; `created_at` stays put so ordering holds.
fn merge_revision(existing: &mut Post, incoming: Post) -> bool {
    if incoming.updated_at_ms < existing.updated_at_ms {
        return false;
    }
    let changed = existing.updated_at_ms != incoming.updated_at_ms
        || existing.body != incoming.body
        || existing.is_pending != incoming.is_pending
        || existing.failure_reason != incoming.failure_reason;
    existing.updated_at_ms = incoming.updated_at_ms;
    existing.body = incoming.body;
    existing.is_pending = incoming.is_pending;
    existing.failure_reason = incoming.failure_reason;
    changed
}

/// Drop entries from the front until `posts` fits the cap, returning the
/// evicted identities.
fn trim_oldest(posts: &mut Vec<Post>, max_posts: usize) -> Vec<String> {
    if posts.len() <= max_posts {
        return Vec::new();
    }
    let excess = posts.len() - max_posts;
    posts
        .drain(0..excess)
        .filter_map(|p| p.identity().map(str::to_owned))
        .collect()
}
