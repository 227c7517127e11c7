use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
struct ChannelPage {
    next_cursor: Option<String>,
    has_more: bool,
    in_flight: bool,
    last_requested_ms: Option<u64>,
}

/// Per-channel cursor state for history pagination.
///
/// Older-page requests are gated three ways: the server must have reported
/// more history, at most one older fetch runs per channel, and repeated
/// scroll triggers are absorbed by a cooldown. Cursors survive channel
/// switches along with the cached timelines.
#[derive(Debug, Clone)]
pub struct PageTracker {
    channels: HashMap<String, ChannelPage>,
    cooldown_ms: u64,
}

impl PageTracker {
    pub fn new(cooldown_ms: u64) -> Self {
        Self {
            channels: HashMap::new(),
            cooldown_ms,
        }
    }

    /// Whether the server reported more history below the loaded window.
    pub fn has_more(&self, channel_id: &str) -> bool {
        self.channels
            .get(channel_id)
            .map(|page| page.has_more)
            .unwrap_or(false)
    }

    /// Cursor for the next older page, if one was reported.
    pub fn cursor(&self, channel_id: &str) -> Option<&str> {
        self.channels
            .get(channel_id)
            .and_then(|page| page.next_cursor.as_deref())
    }

    /// Whether an older-page request may be issued right now.
    pub fn should_request_older(&self, channel_id: &str, now_ms: u64) -> bool {
        let Some(page) = self.channels.get(channel_id) else {
            return false;
        };
        if !page.has_more || page.in_flight {
            return false;
        }
        page.last_requested_ms
            .is_none_or(|at| now_ms.saturating_sub(at) >= self.cooldown_ms)
    }

    /// Note that an older-page request went out.
    pub fn mark_requested(&mut self, channel_id: &str, now_ms: u64) {
        let page = self.channels.entry(channel_id.to_owned()).or_default();
        page.in_flight = true;
        page.last_requested_ms = Some(now_ms);
    }

    /// Record the result of a newest-page load; resets any stale older fetch.
    pub fn complete_open(&mut self, channel_id: &str, next_cursor: Option<String>, has_more: bool) {
        let page = self.channels.entry(channel_id.to_owned()).or_default();
        page.next_cursor = next_cursor;
        page.has_more = has_more;
        page.in_flight = false;
    }

    /// Record the result of an older-page load.
    pub fn complete_older(&mut self, channel_id: &str, next_cursor: Option<String>, has_more: bool) {
        let page = self.channels.entry(channel_id.to_owned()).or_default();
        page.next_cursor = next_cursor;
        page.has_more = has_more;
        page.in_flight = false;
    }

    /// Clear the in-flight flag after a failed or discarded fetch.
    pub fn abandon(&mut self, channel_id: &str) {
        if let Some(page) = self.channels.get_mut(channel_id) {
            page.in_flight = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_open_page_enables_older_requests() {
        let mut pages = PageTracker::new(750);
        assert!(!pages.should_request_older("c1", 1_000));

        pages.complete_open("c1", Some("cursor-a".to_owned()), true);
        assert!(pages.should_request_older("c1", 1_000));
        assert_eq!(pages.cursor("c1"), Some("cursor-a"));
    }

    #[test]
    fn in_flight_blocks_a_second_older_request() {
        let mut pages = PageTracker::new(750);
        pages.complete_open("c1", Some("cursor-a".to_owned()), true);

        pages.mark_requested("c1", 1_000);
        assert!(!pages.should_request_older("c1", 10_000));

        pages.complete_older("c1", Some("cursor-b".to_owned()), true);
        assert!(pages.should_request_older("c1", 10_000));
        assert_eq!(pages.cursor("c1"), Some("cursor-b"));
    }

    #[test]
    fn cooldown_absorbs_rapid_scroll_triggers() {
        let mut pages = PageTracker::new(750);
        pages.complete_open("c1", Some("cursor-a".to_owned()), true);

        pages.mark_requested("c1", 1_000);
        pages.complete_older("c1", Some("cursor-b".to_owned()), true);

        assert!(!pages.should_request_older("c1", 1_400));
        assert!(pages.should_request_older("c1", 1_750));
    }

    #[test]
    fn exhausted_history_stops_older_requests() {
        let mut pages = PageTracker::new(750);
        pages.complete_open("c1", None, false);
        assert!(!pages.should_request_older("c1", 10_000));
        assert_eq!(pages.cursor("c1"), None);
    }

    #[test]
    fn abandon_clears_in_flight_for_a_retry() {
        let mut pages = PageTracker::new(0);
        pages.complete_open("c1", Some("cursor-a".to_owned()), true);
        pages.mark_requested("c1", 1_000);
        assert!(!pages.should_request_older("c1", 2_000));

        pages.abandon("c1");
        assert!(pages.should_request_older("c1", 2_000));
    }
}
