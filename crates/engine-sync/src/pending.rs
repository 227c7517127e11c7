use engine_core::{PendingSend, Post};

#[derive(Debug, Clone)]
struct PendingRecord {
    send: PendingSend,
    failed: bool,
}

/// Tracks locally submitted posts until the server confirms or fails them.
///
/// Records are kept in submission order, which is what the echo matcher
/// relies on when two in-flight sends look identical. The outbox holds sends
/// accepted while the stream was down; they transmit in order once it comes
/// back.
#[derive(Debug, Clone, Default)]
pub struct SendTracker {
    records: Vec<PendingRecord>,
    outbox: Vec<String>,
}

impl SendTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unresolved sends.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Register a newly submitted send.
    pub fn record(&mut self, send: PendingSend) {
        self.records.push(PendingRecord {
            send,
            failed: false,
        });
    }

    pub fn get(&self, pending_id: &str) -> Option<&PendingSend> {
        self.records
            .iter()
            .find(|r| r.send.pending_id == pending_id)
            .map(|r| &r.send)
    }

    /// Resolve a send, returning its record. Unknown ids yield `None`, so a
    /// double confirmation is harmless.
    pub fn remove(&mut self, pending_id: &str) -> Option<PendingSend> {
        let at = self
            .records
            .iter()
            .position(|r| r.send.pending_id == pending_id)?;
        self.outbox.retain(|queued| queued != pending_id);
        Some(self.records.remove(at).send)
    }

    /// Flag a send as failed; it stays tracked so an explicit retry can
    /// recover its draft.
    pub fn mark_failed(&mut self, pending_id: &str) -> bool {
        match self
            .records
            .iter_mut()
            .find(|r| r.send.pending_id == pending_id)
        {
            Some(record) => {
                record.failed = true;
                true
            }
            None => false,
        }
    }

    pub fn is_failed(&self, pending_id: &str) -> bool {
        self.records
            .iter()
            .any(|r| r.send.pending_id == pending_id && r.failed)
    }

    /// Earliest-submitted live send matching the echo signature.
    ///
    /// Failed sends are excluded; they no longer await confirmation and only
    /// resolve through their idempotency token.
    pub fn earliest_live_match(
        &self,
        author_id: &str,
        channel_id: &str,
        root_id: &str,
        body: &str,
    ) -> Option<String> {
        self.records
            .iter()
            .find(|r| {
                !r.failed
                    && r.send.author_id == author_id
                    && r.send.channel_id == channel_id
                    && r.send.root_id == root_id
                    && r.send.body == body
            })
            .map(|r| r.send.pending_id.clone())
    }

    /// Queue a send for transmission once the stream is back.
    pub fn queue_offline(&mut self, pending_id: &str) {
        if !self.outbox.iter().any(|queued| queued == pending_id) {
            self.outbox.push(pending_id.to_owned());
        }
    }

    /// Take every queued send, in submission order, that is still unresolved.
    pub fn drain_offline(&mut self) -> Vec<PendingSend> {
        let queued = std::mem::take(&mut self.outbox);
        queued
            .iter()
            .filter_map(|pending_id| {
                self.records
                    .iter()
                    .find(|r| r.send.pending_id == *pending_id && !r.failed)
                    .map(|r| r.send.clone())
            })
            .collect()
    }
}

/// Build the optimistic timeline entry for a freshly submitted send.
pub fn optimistic_post(send: &PendingSend) -> Post {
    Post {
        id: None,
        pending_id: Some(send.pending_id.clone()),
        channel_id: send.channel_id.clone(),
        author_id: send.author_id.clone(),
        body: send.body.clone(),
        root_id: send.root_id.clone(),
        created_at_ms: send.submitted_at_ms,
        updated_at_ms: send.submitted_at_ms,
        is_pending: true,
        failure_reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(pending_id: &str, body: &str, submitted_at_ms: u64) -> PendingSend {
        PendingSend {
            pending_id: pending_id.to_owned(),
            channel_id: "c1".to_owned(),
            author_id: "me".to_owned(),
            root_id: String::new(),
            body: body.to_owned(),
            submitted_at_ms,
        }
    }

    #[test]
    fn remove_resolves_a_send_exactly_once() {
        let mut tracker = SendTracker::new();
        tracker.record(send("p1", "hello", 10));

        let resolved = tracker.remove("p1").expect("record should resolve");
        assert_eq!(resolved.body, "hello");
        assert!(tracker.remove("p1").is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn earliest_live_match_walks_submission_order() {
        let mut tracker = SendTracker::new();
        tracker.record(send("p1", "same words", 10));
        tracker.record(send("p2", "same words", 11));

        let first = tracker
            .earliest_live_match("me", "c1", "", "same words")
            .expect("first match");
        assert_eq!(first, "p1");
        tracker.remove(&first);

        let second = tracker
            .earliest_live_match("me", "c1", "", "same words")
            .expect("second match");
        assert_eq!(second, "p2");
    }

    #[test]
    fn earliest_live_match_skips_failed_records() {
        let mut tracker = SendTracker::new();
        tracker.record(send("p1", "hello", 10));
        assert!(tracker.mark_failed("p1"));
        assert!(tracker.is_failed("p1"));

        assert!(tracker.earliest_live_match("me", "c1", "", "hello").is_none());
        assert!(tracker.get("p1").is_some(), "failed record stays for retry");
    }

    #[test]
    fn drain_offline_preserves_queue_order_and_skips_resolved() {
        let mut tracker = SendTracker::new();
        tracker.record(send("p1", "one", 10));
        tracker.record(send("p2", "two", 11));
        tracker.record(send("p3", "three", 12));
        tracker.queue_offline("p1");
        tracker.queue_offline("p2");
        tracker.queue_offline("p3");
        tracker.queue_offline("p2");

        tracker.remove("p2");

        let drained: Vec<String> = tracker
            .drain_offline()
            .into_iter()
            .map(|s| s.pending_id)
            .collect();
        assert_eq!(drained, vec!["p1".to_owned(), "p3".to_owned()]);
        assert!(tracker.drain_offline().is_empty(), "queue drains once");
    }

    #[test]
    fn optimistic_post_carries_the_draft_and_pending_identity() {
        let post = optimistic_post(&send("p1", "hello", 42));
        assert_eq!(post.identity(), Some("p1"));
        assert!(post.id.is_none());
        assert!(post.is_pending);
        assert_eq!(post.created_at_ms, 42);
        assert_eq!(post.body, "hello");
    }
}
