//! In-process gateway backing the smoke run.
//!
//! Serves a small seeded world from memory: accepted sends are confirmed
//! with the client token and replayed as push frames, so the harness
//! exercises the same echo and reconciliation paths a live backend would.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tracing::debug;

use engine_core::{
    ChannelSummary, EngineError, EngineErrorCategory, GatewayFrame, HistoryPage, Post, PostDraft,
    PushEvent,
};
use engine_sync::ChatGateway;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

fn seeded_post(id: &str, channel_id: &str, author_id: &str, body: &str, created_at_ms: u64) -> Post {
    Post {
        id: Some(id.to_owned()),
        pending_id: None,
        channel_id: channel_id.to_owned(),
        author_id: author_id.to_owned(),
        body: body.to_owned(),
        root_id: String::new(),
        created_at_ms,
        updated_at_ms: created_at_ms,
        is_pending: false,
        failure_reason: None,
    }
}

pub struct LoopbackGateway {
    channels: Vec<ChannelSummary>,
    history: StdMutex<HashMap<String, Vec<Post>>>,
    frame_rx: TokioMutex<mpsc::UnboundedReceiver<GatewayFrame>>,
    frame_tx: mpsc::UnboundedSender<GatewayFrame>,
    next_post: AtomicU64,
}

impl LoopbackGateway {
    pub fn new() -> Self {
        let base = now_millis().saturating_sub(60_000);
        let mut posts = vec![
            seeded_post("m-1", "town-square", "ava", "morning all", base),
            seeded_post("m-2", "town-square", "noor", "release branch is cut", base + 5_000),
            seeded_post("m-3", "town-square", "ava", "nice, tagging the build now", base + 9_000),
            seeded_post("m-4", "town-square", "kei", "docs page updated", base + 14_000),
        ];
        let mut reply = seeded_post("m-5", "town-square", "ava", "smoke run looks green", base + 20_000);
        reply.root_id = "m-2".to_owned();
        posts.push(reply);
        let mut reply = seeded_post("m-6", "town-square", "noor", "shipping it", base + 26_000);
        reply.root_id = "m-2".to_owned();
        posts.push(reply);
        posts.push(seeded_post(
            "m-7",
            "town-square",
            "ava",
            "anyone up for review?",
            base + 40_000,
        ));

        let mut history = HashMap::new();
        history.insert("town-square".to_owned(), posts);
        history.insert(
            "engineering".to_owned(),
            vec![seeded_post("m-20", "engineering", "kei", "ci is back", base + 2_000)],
        );

        let channels = vec![
            ChannelSummary {
                channel_id: "town-square".to_owned(),
                display_name: "Town Square".to_owned(),
                last_post_at_ms: base + 40_000,
                unread_count: 2,
                mention_count: 0,
            },
            ChannelSummary {
                channel_id: "engineering".to_owned(),
                display_name: "Engineering".to_owned(),
                last_post_at_ms: base + 2_000,
                unread_count: 0,
                mention_count: 0,
            },
        ];

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        // a little live traffic; m-7 rides both the stream and history,
        // which the engine is expected to collapse into one post
        let _ = frame_tx.send(GatewayFrame::Heartbeat);
        let _ = frame_tx.send(GatewayFrame::Event(PushEvent::TypingObserved {
            channel_id: "town-square".to_owned(),
            user_id: "ava".to_owned(),
        }));
        let _ = frame_tx.send(GatewayFrame::Event(PushEvent::PostCreated {
            post: seeded_post(
                "m-7",
                "town-square",
                "ava",
                "anyone up for review?",
                base + 40_000,
            ),
        }));

        Self {
            channels,
            history: StdMutex::new(history),
            frame_rx: TokioMutex::new(frame_rx),
            frame_tx,
            next_post: AtomicU64::new(100),
        }
    }
}

impl Default for LoopbackGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatGateway for LoopbackGateway {
    async fn connect(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn next_frame(&self) -> Result<GatewayFrame, EngineError> {
        let mut frames = self.frame_rx.lock().await;
        // self keeps a sender, so recv only parks between frames
        frames.recv().await.ok_or_else(|| {
            EngineError::new(
                EngineErrorCategory::Network,
                "frame_queue_closed",
                "loopback frame queue closed",
            )
        })
    }

    async fn fetch_channels(&self) -> Result<Vec<ChannelSummary>, EngineError> {
        Ok(self.channels.clone())
    }

    async fn fetch_history(
        &self,
        channel_id: &str,
        cursor: Option<&str>,
        limit: u16,
    ) -> Result<HistoryPage, EngineError> {
        let history = self.history.lock().expect("history lock poisoned");
        let posts = history.get(channel_id).cloned().unwrap_or_default();
        let limit = usize::from(limit.max(1));

        // the cursor names the oldest post the client already holds
        let end = match cursor {
            Some(cursor_id) => posts
                .iter()
                .position(|p| p.id.as_deref() == Some(cursor_id))
                .unwrap_or(0),
            None => posts.len(),
        };
        let start = end.saturating_sub(limit);
        let window = posts[start..end].to_vec();
        let next_cursor = window.first().and_then(|p| p.id.clone());

        Ok(HistoryPage {
            channel_id: channel_id.to_owned(),
            posts: window,
            has_more: start > 0,
            next_cursor,
        })
    }

    async fn fetch_thread(&self, root_id: &str) -> Result<Vec<Post>, EngineError> {
        let history = self.history.lock().expect("history lock poisoned");
        let replies = history
            .values()
            .flatten()
            .filter(|p| p.root_id == root_id)
            .cloned()
            .collect();
        Ok(replies)
    }

    async fn send_post(&self, draft: &PostDraft) -> Result<Post, EngineError> {
        let n = self.next_post.fetch_add(1, Ordering::SeqCst);
        let now = now_millis();
        let confirmed = Post {
            id: Some(format!("m-{n}")),
            pending_id: Some(draft.pending_id.clone()),
            channel_id: draft.channel_id.clone(),
            author_id: "smoke-user".to_owned(),
            body: draft.body.clone(),
            root_id: draft.root_id.clone(),
            created_at_ms: now,
            updated_at_ms: now,
            is_pending: false,
            failure_reason: None,
        };

        self.history
            .lock()
            .expect("history lock poisoned")
            .entry(draft.channel_id.clone())
            .or_default()
            .push(confirmed.clone());

        // replay the accepted post as a push frame, token included
        let _ = self.frame_tx.send(GatewayFrame::Event(PushEvent::PostCreated {
            post: confirmed.clone(),
        }));

        Ok(confirmed)
    }

    async fn mark_read(&self, channel_id: &str) -> Result<(), EngineError> {
        debug!(channel_id = %channel_id, "loopback read mark accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pages_walk_backwards_through_seeded_history() {
        let gateway = LoopbackGateway::new();

        let newest = gateway
            .fetch_history("town-square", None, 4)
            .await
            .expect("first page");
        assert_eq!(newest.posts.len(), 4);
        assert!(newest.has_more);

        let older = gateway
            .fetch_history("town-square", newest.next_cursor.as_deref(), 4)
            .await
            .expect("older page");
        assert_eq!(older.posts.len(), 3);
        assert!(!older.has_more);
        assert_eq!(older.posts[0].id.as_deref(), Some("m-1"));
    }

    #[tokio::test]
    async fn accepted_sends_echo_back_with_the_token() {
        let gateway = LoopbackGateway::new();
        let draft = PostDraft {
            pending_id: "tok-1".to_owned(),
            channel_id: "town-square".to_owned(),
            root_id: String::new(),
            body: "hello".to_owned(),
        };

        let confirmed = gateway.send_post(&draft).await.expect("send");
        assert_eq!(confirmed.pending_id.as_deref(), Some("tok-1"));

        // skip the seeded frames, then find the echo
        loop {
            let frame = gateway.next_frame().await.expect("frame");
            if let GatewayFrame::Event(PushEvent::PostCreated { post }) = frame
                && post.pending_id.as_deref() == Some("tok-1")
            {
                assert_eq!(post.id, confirmed.id);
                break;
            }
        }
    }

    #[tokio::test]
    async fn threads_collect_replies_across_the_world() {
        let gateway = LoopbackGateway::new();
        let replies = gateway.fetch_thread("m-2").await.expect("thread");
        assert_eq!(replies.len(), 2);
        assert!(replies.iter().all(|p| p.root_id == "m-2"));
    }
}
