//! Chat synchronization runtime.
//!
//! One spawned task owns every store (timelines, pending sends, pagination
//! cursors, the channel board) and drains two queues: frontend commands and
//! internal completion signals. Gateway calls never block the loop; each is
//! spawned and re-enters as a signal, which is also where stale responses
//! are dropped. A separate supervisor task owns the push stream and its
//! reconnect backoff.

/// Transport trait the runtime drives.
pub mod gateway;
/// Per-channel pagination cursors and request gating.
pub mod pagination;
/// Pending-send records and the offline outbox.
pub mod pending;
/// Echo-to-send matching.
pub mod reconcile;
/// Push-event dispatch over the stores.
pub mod router;
/// Ordered post storage for channels and threads.
pub mod timeline;
/// Channel list, counters, presence, and typing state.
pub mod unread;

pub use gateway::ChatGateway;
pub use pagination::PageTracker;
pub use pending::{SendTracker, optimistic_post};
pub use reconcile::match_echo;
pub use router::{RouteOutcome, RouterContext, route_event};
pub use timeline::{ThreadView, TimelineStore};
pub use unread::UnreadBoard;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use engine_core::{
    ChannelSummary, ConnectionPhase, ConnectionTracker, EngineChannelError, EngineChannels,
    EngineCommand, EngineConfig, EngineError, EngineErrorCategory, EngineEvent, EngineSnapshot,
    EventStream, GatewayFrame, HistoryPage, PendingSend, Post, PostDraft, PushEvent, RetryPolicy,
};

/// Milliseconds since the Unix epoch.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Why a history page was requested; decides how the response is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchPurpose {
    /// First page after a channel open; replaces the timeline.
    Open,
    /// Backward pagination; merges below the loaded window.
    Older,
    /// Post-reconnect refresh of the active channel; replaces the timeline.
    GapFill,
}

/// Completion signals re-entering the runtime loop.
#[derive(Debug)]
enum RuntimeSignal {
    StreamConnecting {
        attempt: u32,
    },
    StreamConnected,
    StreamDown {
        error: EngineError,
        next_attempt: u32,
        retry_in_ms: Option<u64>,
        will_retry: bool,
    },
    StreamEvent(PushEvent),
    HistoryLoaded {
        channel_id: String,
        purpose: FetchPurpose,
        outcome: Result<HistoryPage, EngineError>,
    },
    ThreadLoaded {
        root_id: String,
        outcome: Result<Vec<Post>, EngineError>,
    },
    ChannelsLoaded {
        outcome: Result<Vec<ChannelSummary>, EngineError>,
    },
    SendFinished {
        pending_id: String,
        channel_id: String,
        outcome: Result<Post, EngineError>,
    },
    MarkReadFinished {
        channel_id: String,
        outcome: Result<(), EngineError>,
    },
}

/// Cloneable handle to a spawned engine runtime.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    channels: EngineChannels,
}

impl EngineHandle {
    /// Queue one command for the runtime.
    pub async fn send(&self, command: EngineCommand) -> Result<(), EngineChannelError> {
        self.channels.send_command(command).await
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    /// Pull the latest full snapshot.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.channels.snapshot()
    }
}

/// Spawn the engine runtime on the current Tokio runtime.
pub fn spawn_engine(gateway: Arc<dyn ChatGateway>, config: EngineConfig) -> EngineHandle {
    let (channels, command_rx, snapshot_tx) = EngineChannels::new(128, 512);
    let (signal_tx, signal_rx) = mpsc::channel(256);

    let runtime = EngineRuntime::new(gateway, config, channels.clone(), snapshot_tx, signal_tx);
    tokio::spawn(runtime.run(command_rx, signal_rx));

    EngineHandle { channels }
}

struct EngineRuntime {
    gateway: Arc<dyn ChatGateway>,
    config: EngineConfig,
    channels: EngineChannels,
    snapshot_tx: watch::Sender<EngineSnapshot>,
    signal_tx: mpsc::Sender<RuntimeSignal>,
    connection: ConnectionTracker,
    timeline: TimelineStore,
    sends: SendTracker,
    pages: PageTracker,
    board: UnreadBoard,
    active_channel: Option<String>,
    active_thread: Option<String>,
    stream_stop: Option<CancellationToken>,
}

impl EngineRuntime {
    fn new(
        gateway: Arc<dyn ChatGateway>,
        config: EngineConfig,
        channels: EngineChannels,
        snapshot_tx: watch::Sender<EngineSnapshot>,
        signal_tx: mpsc::Sender<RuntimeSignal>,
    ) -> Self {
        let timeline = TimelineStore::new(config.timeline_max_posts);
        let pages = PageTracker::new(config.pagination_cooldown_ms);
        let board = UnreadBoard::new(config.typing_ttl_ms);

        Self {
            gateway,
            config,
            channels,
            snapshot_tx,
            signal_tx,
            connection: ConnectionTracker::default(),
            timeline,
            sends: SendTracker::new(),
            pages,
            board,
            active_channel: None,
            active_thread: None,
            stream_stop: None,
        }
    }

    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<EngineCommand>,
        mut signal_rx: mpsc::Receiver<RuntimeSignal>,
    ) {
        info!(user_id = %self.config.user_id, "engine runtime started");
        self.publish_snapshot();

        loop {
            tokio::select! {
                maybe_command = command_rx.recv() => {
                    let Some(command) = maybe_command else {
                        debug!("command channel closed; stopping runtime");
                        break;
                    };
                    let shutdown = matches!(command, EngineCommand::Shutdown);
                    debug!(command = command.kind(), "handling command");
                    if let Err(error) = self.handle_command(command) {
                        warn!(code = %error.code, "command failed: {error}");
                        self.emit_fatal(&error);
                    }
                    if shutdown {
                        break;
                    }
                }
                maybe_signal = signal_rx.recv() => {
                    // the runtime keeps a sender clone, so this channel
                    // cannot close while the loop runs
                    if let Some(signal) = maybe_signal {
                        self.handle_signal(signal);
                    }
                }
            }
        }

        self.stop_stream();
        info!("engine runtime stopped");
    }

    fn handle_command(&mut self, command: EngineCommand) -> Result<(), EngineError> {
        self.connection.ensure_accepts(&command)?;
        match command {
            EngineCommand::Connect => self.start_stream(),
            EngineCommand::OpenChannel { channel_id } => self.open_channel(channel_id),
            EngineCommand::LoadOlderPosts { channel_id } => self.load_older(channel_id),
            EngineCommand::SendMessage {
                channel_id,
                body,
                root_id,
            } => self.send_message(channel_id, body, root_id),
            EngineCommand::RetrySend { pending_id } => self.retry_send(pending_id),
            EngineCommand::OpenThread { root_id } => self.open_thread(root_id),
            EngineCommand::MarkRead { channel_id } => self.mark_read(channel_id),
            EngineCommand::Shutdown => self.shutdown(),
        }
    }

    fn start_stream(&mut self) -> Result<(), EngineError> {
        if self.stream_stop.is_some() {
            return Err(EngineError::new(
                EngineErrorCategory::Internal,
                "stream_already_running",
                "push stream supervisor is already running",
            ));
        }

        let stop = CancellationToken::new();
        let child = stop.child_token();
        self.stream_stop = Some(stop);

        tokio::spawn(supervise_stream(
            Arc::clone(&self.gateway),
            self.signal_tx.clone(),
            child,
            RetryPolicy::from_config(&self.config),
            self.config.max_reconnect_attempts,
        ));
        Ok(())
    }

    fn open_channel(&mut self, channel_id: String) -> Result<(), EngineError> {
        if self.active_channel.as_deref() != Some(channel_id.as_str()) {
            self.timeline.clear_thread();
            self.active_thread = None;
        }
        self.active_channel = Some(channel_id.clone());

        // paint whatever is cached right away; the fetch refreshes it
        self.emit_timeline(&channel_id);
        self.spawn_fetch_history(channel_id, FetchPurpose::Open, None);
        self.publish_snapshot();
        Ok(())
    }

    fn load_older(&mut self, channel_id: String) -> Result<(), EngineError> {
        let now = now_millis();
        if !self.pages.should_request_older(&channel_id, now) {
            debug!(channel_id = %channel_id, "older-page request suppressed");
            return Ok(());
        }
        let cursor = self.pages.cursor(&channel_id).map(str::to_owned);
        self.pages.mark_requested(&channel_id, now);
        self.spawn_fetch_history(channel_id, FetchPurpose::Older, cursor);
        Ok(())
    }

    fn send_message(
        &mut self,
        channel_id: String,
        body: String,
        root_id: Option<String>,
    ) -> Result<(), EngineError> {
        if body.trim().is_empty() {
            return Err(EngineError::new(
                EngineErrorCategory::Config,
                "empty_body",
                "cannot send an empty message",
            ));
        }

        let send = PendingSend {
            pending_id: Uuid::new_v4().to_string(),
            channel_id,
            author_id: self.config.user_id.clone(),
            root_id: root_id.unwrap_or_default(),
            body,
            submitted_at_ms: now_millis(),
        };
        self.sends.record(send.clone());

        let optimistic = optimistic_post(&send);
        if optimistic.is_reply() {
            // replies render in the thread view only
            if self
                .timeline
                .thread()
                .is_some_and(|view| view.root_id == optimistic.root_id)
                && self.timeline.insert_thread_reply(optimistic)
            {
                self.emit_thread();
            }
        } else {
            self.timeline.insert_live(optimistic);
            self.emit_timeline(&send.channel_id);
        }

        if self.connection.phase() == ConnectionPhase::Connected {
            self.spawn_send(send);
        } else {
            debug!(pending_id = %send.pending_id, "send queued until the stream returns");
            self.sends.queue_offline(&send.pending_id);
        }
        self.publish_snapshot();
        Ok(())
    }

    fn retry_send(&mut self, pending_id: String) -> Result<(), EngineError> {
        if self.sends.get(&pending_id).is_none() {
            debug!(pending_id = %pending_id, "retry for unknown send ignored");
            return Ok(());
        }
        if !self.sends.is_failed(&pending_id) {
            return Err(EngineError::new(
                EngineErrorCategory::Config,
                "send_not_failed",
                format!("send '{pending_id}' is not in a failed state"),
            ));
        }

        let Some(old) = self.sends.remove(&pending_id) else {
            return Ok(());
        };
        self.timeline.remove_post(&old.channel_id, &pending_id);

        let root_id = (!old.root_id.is_empty()).then_some(old.root_id);
        self.send_message(old.channel_id, old.body, root_id)
    }

    fn open_thread(&mut self, root_id: String) -> Result<(), EngineError> {
        self.active_thread = Some(root_id.clone());
        self.timeline.load_thread(&root_id, Vec::new());
        self.spawn_fetch_thread(root_id);
        self.publish_snapshot();
        Ok(())
    }

    fn mark_read(&mut self, channel_id: String) -> Result<(), EngineError> {
        if self.board.mark_read(&channel_id) {
            self.emit_channels();
        }
        if self.connection.phase() == ConnectionPhase::Connected {
            self.spawn_mark_read(channel_id);
        } else {
            // the local zero stands; the post-reconnect bootstrap reconciles
            debug!(channel_id = %channel_id, "read mark kept local while offline");
        }
        self.publish_snapshot();
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), EngineError> {
        self.stop_stream();

        self.timeline = TimelineStore::new(self.config.timeline_max_posts);
        self.sends = SendTracker::new();
        self.pages = PageTracker::new(self.config.pagination_cooldown_ms);
        self.board = UnreadBoard::new(self.config.typing_ttl_ms);
        self.active_channel = None;
        self.active_thread = None;

        let status = self.connection.terminate();
        self.channels.emit(EngineEvent::ConnectionChanged { status });
        self.publish_snapshot();
        Ok(())
    }

    fn stop_stream(&mut self) {
        if let Some(stop) = self.stream_stop.take() {
            stop.cancel();
        }
    }

    fn handle_signal(&mut self, signal: RuntimeSignal) {
        match signal {
            RuntimeSignal::StreamConnecting { attempt } => {
                debug!(attempt, "push stream connecting");
                match self.connection.begin_connect() {
                    Ok(status) => {
                        self.channels.emit(EngineEvent::ConnectionChanged { status });
                        self.publish_snapshot();
                    }
                    Err(error) => warn!(code = %error.code, "connecting signal out of phase"),
                }
            }
            RuntimeSignal::StreamConnected => self.handle_stream_connected(),
            RuntimeSignal::StreamDown {
                error,
                next_attempt,
                retry_in_ms,
                will_retry,
            } => self.handle_stream_down(error, next_attempt, retry_in_ms, will_retry),
            RuntimeSignal::StreamEvent(event) => self.handle_push_event(event),
            RuntimeSignal::HistoryLoaded {
                channel_id,
                purpose,
                outcome,
            } => self.handle_history_loaded(channel_id, purpose, outcome),
            RuntimeSignal::ThreadLoaded { root_id, outcome } => {
                self.handle_thread_loaded(root_id, outcome)
            }
            RuntimeSignal::ChannelsLoaded { outcome } => self.handle_channels_loaded(outcome),
            RuntimeSignal::SendFinished {
                pending_id,
                channel_id,
                outcome,
            } => self.handle_send_finished(pending_id, channel_id, outcome),
            RuntimeSignal::MarkReadFinished {
                channel_id,
                outcome,
            } => {
                if let Err(error) = outcome {
                    debug!(channel_id = %channel_id, code = %error.code, "read mark not acknowledged");
                }
            }
        }
    }

    /// Post-connect recovery: bootstrap the channel list, refetch the active
    /// channel and thread exactly once, and flush the offline outbox.
    fn handle_stream_connected(&mut self) {
        match self.connection.mark_connected() {
            Ok(status) => self.channels.emit(EngineEvent::ConnectionChanged { status }),
            Err(error) => {
                warn!(code = %error.code, "connected signal out of phase");
                return;
            }
        }

        self.spawn_fetch_channels();
        if let Some(channel_id) = self.active_channel.clone() {
            self.spawn_fetch_history(channel_id, FetchPurpose::GapFill, None);
        }
        if let Some(root_id) = self.active_thread.clone() {
            self.spawn_fetch_thread(root_id);
        }
        let queued = self.sends.drain_offline();
        if !queued.is_empty() {
            info!(count = queued.len(), "flushing queued sends");
        }
        for send in queued {
            self.spawn_send(send);
        }
        self.publish_snapshot();
    }

    fn handle_stream_down(
        &mut self,
        error: EngineError,
        next_attempt: u32,
        retry_in_ms: Option<u64>,
        will_retry: bool,
    ) {
        warn!(code = %error.code, attempt = next_attempt, "push stream down: {error}");
        match self.connection.mark_disconnected(next_attempt, retry_in_ms) {
            Ok(status) => self.channels.emit(EngineEvent::ConnectionChanged { status }),
            Err(phase_error) => warn!(code = %phase_error.code, "down signal out of phase"),
        }

        if !will_retry {
            self.channels.emit(EngineEvent::FatalError {
                code: error.code.clone(),
                message: error.to_string(),
                recoverable: false,
            });
            self.stream_stop = None;
            let status = self.connection.terminate();
            self.channels.emit(EngineEvent::ConnectionChanged { status });
        }
        self.publish_snapshot();
    }

    fn handle_push_event(&mut self, event: PushEvent) {
        let kind = event.kind();
        let outcome = {
            let mut ctx = RouterContext {
                timeline: &mut self.timeline,
                sends: &mut self.sends,
                board: &mut self.board,
                active_channel: self.active_channel.as_deref(),
                own_user_id: &self.config.user_id,
                now_ms: now_millis(),
            };
            route_event(&mut ctx, event)
        };
        trace!(event = kind, "routed push event");

        let changed = outcome != RouteOutcome::default();
        if let Some(channel_id) = outcome.timeline_changed.as_deref()
            && self.active_channel.as_deref() == Some(channel_id)
        {
            self.emit_timeline(channel_id);
        }
        if outcome.thread_changed {
            if self.timeline.thread().is_none() {
                if let Some(root_id) = self.active_thread.take() {
                    self.channels.emit(EngineEvent::ThreadUpdated {
                        root_id,
                        replies: Vec::new(),
                    });
                }
            } else {
                self.emit_thread();
            }
        }
        if outcome.channels_changed {
            self.emit_channels();
        }
        if let Some((channel_id, post_id)) = outcome.reactions_changed {
            self.channels.emit(EngineEvent::ReactionsUpdated {
                channel_id,
                reactions: self.timeline.reactions_for(&post_id),
                post_id,
            });
        }
        if let Some(channel_id) = outcome.typing_changed
            && self.active_channel.as_deref() == Some(channel_id.as_str())
        {
            self.channels.emit(EngineEvent::TypingUpdated {
                user_ids: self.board.active_typists(&channel_id, now_millis()),
                channel_id,
            });
        }
        if let Some((user_id, status)) = outcome.presence_changed {
            self.channels
                .emit(EngineEvent::PresenceUpdated { user_id, status });
        }
        if changed {
            self.publish_snapshot();
        }
    }

    fn handle_history_loaded(
        &mut self,
        channel_id: String,
        purpose: FetchPurpose,
        outcome: Result<HistoryPage, EngineError>,
    ) {
        let page = match outcome {
            Ok(page) => page,
            Err(error) => {
                warn!(channel_id = %channel_id, code = %error.code, "history fetch failed: {error}");
                self.pages.abandon(&channel_id);
                self.emit_fatal(&error);
                return;
            }
        };

        let active = self.active_channel.as_deref() == Some(channel_id.as_str());
        match purpose {
            FetchPurpose::Open | FetchPurpose::GapFill => {
                if !active {
                    debug!(channel_id = %channel_id, "discarding page for an inactive channel");
                    return;
                }
                let posts = page.posts;
                for post in &posts {
                    if let Some(resolved) = match_echo(&mut self.sends, post) {
                        self.timeline.remove_post(&channel_id, &resolved.pending_id);
                    }
                }
                self.timeline.load_page(&channel_id, posts);
                self.pages
                    .complete_open(&channel_id, page.next_cursor, page.has_more);
            }
            FetchPurpose::Older => {
                if !active {
                    debug!(channel_id = %channel_id, "discarding older page for an inactive channel");
                    self.pages.abandon(&channel_id);
                    return;
                }
                let inserted = self.timeline.prepend_older(&channel_id, page.posts);
                trace!(channel_id = %channel_id, inserted, "merged older page");
                self.pages
                    .complete_older(&channel_id, page.next_cursor, page.has_more);
            }
        }
        self.emit_timeline(&channel_id);
        self.publish_snapshot();
    }

    fn handle_thread_loaded(
        &mut self,
        root_id: String,
        outcome: Result<Vec<Post>, EngineError>,
    ) {
        let replies = match outcome {
            Ok(replies) => replies,
            Err(error) => {
                warn!(root_id = %root_id, code = %error.code, "thread fetch failed: {error}");
                self.emit_fatal(&error);
                return;
            }
        };

        if self.active_thread.as_deref() != Some(root_id.as_str()) {
            debug!(root_id = %root_id, "discarding replies for a closed thread");
            return;
        }
        if self.timeline.thread().is_none() {
            self.timeline.load_thread(&root_id, Vec::new());
        }
        // merge instead of replace so live replies that raced the fetch stay
        for reply in replies {
            self.timeline.insert_thread_reply(reply);
        }
        self.emit_thread();
        self.publish_snapshot();
    }

    fn handle_channels_loaded(&mut self, outcome: Result<Vec<ChannelSummary>, EngineError>) {
        match outcome {
            Ok(channels) => {
                debug!(count = channels.len(), "channel list loaded");
                self.board.replace_snapshot(channels);
                self.emit_channels();
                self.publish_snapshot();
            }
            Err(error) => {
                warn!(code = %error.code, "channel list fetch failed: {error}");
                self.emit_fatal(&error);
            }
        }
    }

    fn handle_send_finished(
        &mut self,
        pending_id: String,
        channel_id: String,
        outcome: Result<Post, EngineError>,
    ) {
        match outcome {
            Ok(confirmed) => {
                debug!(
                    pending_id = %pending_id,
                    post_id = confirmed.id.as_deref().unwrap_or(""),
                    "send confirmed"
                );
                let mut store_changed = false;
                let mut thread_changed = false;

                if self.sends.remove(&pending_id).is_some()
                    && self.timeline.remove_post(&channel_id, &pending_id)
                {
                    store_changed = true;
                }

                let created_at_ms = confirmed.created_at_ms;
                if confirmed.is_reply() {
                    // confirmed replies render in the thread view only
                    let thread_open = self
                        .timeline
                        .thread()
                        .is_some_and(|view| view.root_id == confirmed.root_id);
                    if thread_open && self.timeline.insert_thread_reply(confirmed) {
                        store_changed = true;
                        thread_changed = true;
                    }
                } else if self.timeline.insert_live(confirmed) {
                    store_changed = true;
                }

                if store_changed && self.active_channel.as_deref() == Some(channel_id.as_str()) {
                    self.emit_timeline(&channel_id);
                }
                if thread_changed {
                    self.emit_thread();
                }
                if self.board.note_post(&channel_id, created_at_ms) {
                    self.emit_channels();
                }
                if store_changed {
                    self.publish_snapshot();
                }
            }
            Err(error) => {
                warn!(pending_id = %pending_id, code = %error.code, "send failed: {error}");
                self.sends.mark_failed(&pending_id);
                if self.timeline.flag_failed(&channel_id, &pending_id, &error.to_string()) {
                    if self.active_channel.as_deref() == Some(channel_id.as_str()) {
                        self.emit_timeline(&channel_id);
                    }
                    self.emit_thread();
                }
                self.emit_fatal(&error);
                self.publish_snapshot();
            }
        }
    }

    fn spawn_fetch_channels(&self) {
        let gateway = Arc::clone(&self.gateway);
        let signals = self.signal_tx.clone();
        tokio::spawn(async move {
            let outcome = gateway.fetch_channels().await;
            let _ = signals.send(RuntimeSignal::ChannelsLoaded { outcome }).await;
        });
    }

    fn spawn_fetch_history(&self, channel_id: String, purpose: FetchPurpose, cursor: Option<String>) {
        let gateway = Arc::clone(&self.gateway);
        let signals = self.signal_tx.clone();
        let limit = self.config.page_size.clamp(1, 100);
        tokio::spawn(async move {
            let outcome = gateway
                .fetch_history(&channel_id, cursor.as_deref(), limit)
                .await;
            let _ = signals
                .send(RuntimeSignal::HistoryLoaded {
                    channel_id,
                    purpose,
                    outcome,
                })
                .await;
        });
    }

    fn spawn_fetch_thread(&self, root_id: String) {
        let gateway = Arc::clone(&self.gateway);
        let signals = self.signal_tx.clone();
        tokio::spawn(async move {
            let outcome = gateway.fetch_thread(&root_id).await;
            let _ = signals
                .send(RuntimeSignal::ThreadLoaded { root_id, outcome })
                .await;
        });
    }

    fn spawn_send(&self, send: PendingSend) {
        let gateway = Arc::clone(&self.gateway);
        let signals = self.signal_tx.clone();
        let draft = PostDraft {
            pending_id: send.pending_id,
            channel_id: send.channel_id,
            root_id: send.root_id,
            body: send.body,
        };
        tokio::spawn(async move {
            let outcome = gateway.send_post(&draft).await;
            let _ = signals
                .send(RuntimeSignal::SendFinished {
                    pending_id: draft.pending_id,
                    channel_id: draft.channel_id,
                    outcome,
                })
                .await;
        });
    }

    fn spawn_mark_read(&self, channel_id: String) {
        let gateway = Arc::clone(&self.gateway);
        let signals = self.signal_tx.clone();
        tokio::spawn(async move {
            let outcome = gateway.mark_read(&channel_id).await;
            let _ = signals
                .send(RuntimeSignal::MarkReadFinished {
                    channel_id,
                    outcome,
                })
                .await;
        });
    }

    fn emit_fatal(&self, error: &EngineError) {
        self.channels.emit(EngineEvent::FatalError {
            code: error.code.clone(),
            message: error.to_string(),
            recoverable: error.is_recoverable(),
        });
    }

    fn emit_timeline(&self, channel_id: &str) {
        self.channels.emit(EngineEvent::TimelineUpdated {
            channel_id: channel_id.to_owned(),
            posts: self.timeline.posts(channel_id).to_vec(),
            has_more: self.pages.has_more(channel_id),
        });
    }

    fn emit_thread(&self) {
        if let Some(view) = self.timeline.thread() {
            self.channels.emit(EngineEvent::ThreadUpdated {
                root_id: view.root_id.clone(),
                replies: view.replies.clone(),
            });
        }
    }

    fn emit_channels(&self) {
        self.channels.emit(EngineEvent::ChannelListUpdated {
            channels: self.board.channel_list(),
        });
    }

    fn publish_snapshot(&self) {
        let active_channel_id = self.active_channel.clone();
        let timeline = active_channel_id
            .as_deref()
            .map(|id| self.timeline.posts(id).to_vec())
            .unwrap_or_default();
        let timeline_has_more = active_channel_id
            .as_deref()
            .map(|id| self.pages.has_more(id))
            .unwrap_or(false);
        let (active_thread_root_id, thread_replies) = match self.timeline.thread() {
            Some(view) => (Some(view.root_id.clone()), view.replies.clone()),
            None => (None, Vec::new()),
        };

        let _ = self.snapshot_tx.send(EngineSnapshot {
            connection: self.connection.status(),
            channels: self.board.channel_list(),
            active_channel_id,
            timeline,
            timeline_has_more,
            active_thread_root_id,
            thread_replies,
        });
    }
}

/// Own the push stream: connect, pump frames into the runtime, and back off
/// between attempts. Exits on cancellation, an unrecoverable error, or an
/// exhausted attempt ceiling.
async fn supervise_stream(
    gateway: Arc<dyn ChatGateway>,
    signals: mpsc::Sender<RuntimeSignal>,
    stop: CancellationToken,
    retry: RetryPolicy,
    max_attempts: Option<u32>,
) {
    let mut attempt: u32 = 0;
    loop {
        if signals
            .send(RuntimeSignal::StreamConnecting { attempt })
            .await
            .is_err()
        {
            return;
        }

        let connected = tokio::select! {
            _ = stop.cancelled() => return,
            result = gateway.connect() => result,
        };

        let stream_error = match connected {
            Ok(()) => {
                attempt = 0;
                if signals.send(RuntimeSignal::StreamConnected).await.is_err() {
                    return;
                }
                loop {
                    let frame = tokio::select! {
                        _ = stop.cancelled() => return,
                        frame = gateway.next_frame() => frame,
                    };
                    match frame {
                        Ok(GatewayFrame::Heartbeat) => trace!("stream heartbeat"),
                        Ok(GatewayFrame::Event(event)) => {
                            if signals
                                .send(RuntimeSignal::StreamEvent(event))
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                        Err(error) => break error,
                    }
                }
            }
            Err(error) => error,
        };

        if !schedule_retry(&signals, &stop, &retry, &mut attempt, max_attempts, stream_error).await
        {
            return;
        }
    }
}

/// Report the drop and wait out the backoff. Returns `false` when the
/// supervisor should stop instead of reconnecting.
async fn schedule_retry(
    signals: &mpsc::Sender<RuntimeSignal>,
    stop: &CancellationToken,
    retry: &RetryPolicy,
    attempt: &mut u32,
    max_attempts: Option<u32>,
    error: EngineError,
) -> bool {
    let delay = retry.delay_for_attempt(*attempt, error.retry_after_ms);
    *attempt = attempt.saturating_add(1);

    let exhausted = max_attempts.is_some_and(|cap| *attempt > cap);
    let will_retry = error.is_recoverable() && !exhausted;
    if exhausted {
        warn!(attempt = *attempt, "reconnect attempt ceiling reached");
    }

    let down = RuntimeSignal::StreamDown {
        error,
        next_attempt: *attempt,
        retry_in_ms: will_retry.then_some(delay.as_millis() as u64),
        will_retry,
    };
    if signals.send(down).await.is_err() {
        return false;
    }
    if !will_retry {
        return false;
    }

    tokio::select! {
        _ = stop.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
