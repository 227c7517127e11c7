use engine_core::{PendingSend, Post};

use crate::pending::SendTracker;

/// Match an incoming post against the unresolved local sends.
///
/// The idempotency token decides when present: a post carrying a token
/// resolves exactly the send that minted it, and a token minted elsewhere
/// (another device of the same user) matches nothing. Only token-less posts
/// fall back to the signature heuristic, where the earliest submitted live
/// send with the same author, channel, thread root, and body wins.
///
/// A match removes the record from the tracker, so running the reconciler
/// twice over the same post resolves at most one send.
pub fn match_echo(sends: &mut SendTracker, incoming: &Post) -> Option<PendingSend> {
    if let Some(token) = incoming.pending_id.as_deref() {
        return sends.remove(token);
    }

    let pending_id = sends.earliest_live_match(
        &incoming.author_id,
        &incoming.channel_id,
        &incoming.root_id,
        &incoming.body,
    )?;
    sends.remove(&pending_id)
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

    fn echo(id: &str, token: Option<&str>, author_id: &str, body: &str) -> Post {
        Post {
            id: Some(id.to_owned()),
            pending_id: token.map(str::to_owned),
            channel_id: "c1".to_owned(),
            author_id: author_id.to_owned(),
            body: body.to_owned(),
            root_id: String::new(),
            created_at_ms: 100,
            updated_at_ms: 100,
            is_pending: false,
            failure_reason: None,
        }
    }

    #[test]
    fn token_resolves_its_own_send() {
        let mut sends = SendTracker::new();
        sends.record(send("p1", "hello", 10));

        let matched = match_echo(&mut sends, &echo("s42", Some("p1"), "me", "hello"))
            .expect("token should match");
        assert_eq!(matched.pending_id, "p1");
        assert!(sends.is_empty());
    }

    #[test]
    fn foreign_token_never_falls_back_to_the_heuristic() {
        let mut sends = SendTracker::new();
        sends.record(send("p1", "hello", 10));

        let matched = match_echo(&mut sends, &echo("s42", Some("other-device"), "me", "hello"));
        assert!(matched.is_none());
        assert_eq!(sends.len(), 1, "our send must stay pending");
    }

    #[test]
    fn tokenless_echo_matches_by_signature() {
        let mut sends = SendTracker::new();
        sends.record(send("p1", "hello", 10));

        let matched =
            match_echo(&mut sends, &echo("s42", None, "me", "hello")).expect("signature match");
        assert_eq!(matched.pending_id, "p1");
    }

    #[test]
    fn identical_sends_resolve_first_submitted_first() {
        let mut sends = SendTracker::new();
        sends.record(send("p1", "same words", 10));
        sends.record(send("p2", "same words", 11));

        let first = match_echo(&mut sends, &echo("s1", None, "me", "same words"))
            .expect("first echo matches");
        let second = match_echo(&mut sends, &echo("s2", None, "me", "same words"))
            .expect("second echo matches");

        assert_eq!(first.pending_id, "p1");
        assert_eq!(second.pending_id, "p2");
        assert!(sends.is_empty());
    }

    #[test]
    fn other_authors_never_match() {
        let mut sends = SendTracker::new();
        sends.record(send("p1", "hello", 10));

        assert!(match_echo(&mut sends, &echo("s42", None, "someone-else", "hello")).is_none());
        assert_eq!(sends.len(), 1);
    }

    #[test]
    fn failed_sends_resolve_only_through_their_token() {
        let mut sends = SendTracker::new();
        sends.record(send("p1", "hello", 10));
        sends.mark_failed("p1");

        assert!(match_echo(&mut sends, &echo("s42", None, "me", "hello")).is_none());

        let matched = match_echo(&mut sends, &echo("s43", Some("p1"), "me", "hello"))
            .expect("token still resolves a failed send");
        assert_eq!(matched.pending_id, "p1");
    }
}
