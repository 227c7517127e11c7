use crate::{
    error::EngineError,
    types::{ConnectionPhase, ConnectionStatus, EngineCommand},
};

/// Tracks the push-stream lifecycle and gates commands against it.
///
/// Transitions are strict: the supervisor drives
/// `Disconnected → Connecting → Connected` (and back to `Disconnected` on
/// failure), while `Terminated` is a sink reachable from anywhere.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    phase: ConnectionPhase,
    reconnect_attempt: u32,
    retry_in_ms: Option<u64>,
}

impl ConnectionTracker {
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Current status payload for frontend emission.
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            phase: self.phase,
            connected: self.phase == ConnectionPhase::Connected,
            reconnect_attempt: self.reconnect_attempt,
            retry_in_ms: self.retry_in_ms,
        }
    }

    /// Reject commands the current phase cannot serve.
    ///
    /// Everything except `Connect` is accepted in any live phase; sends and
    /// opens issued while disconnected are queued or answered best-effort by
    /// the runtime.
    pub fn ensure_accepts(&self, command: &EngineCommand) -> Result<(), EngineError> {
        if self.phase == ConnectionPhase::Terminated {
            return Err(EngineError::invalid_phase(self.phase, command.kind()));
        }

        if matches!(command, EngineCommand::Connect) && self.phase != ConnectionPhase::Disconnected
        {
            return Err(EngineError::invalid_phase(self.phase, command.kind()));
        }

        Ok(())
    }

    /// A connect attempt is starting.
    pub fn begin_connect(&mut self) -> Result<ConnectionStatus, EngineError> {
        if self.phase != ConnectionPhase::Disconnected {
            return Err(EngineError::invalid_phase(self.phase, "begin_connect"));
        }
        self.phase = ConnectionPhase::Connecting;
        self.retry_in_ms = None;
        Ok(self.status())
    }

    /// The stream is established; the attempt counter resets.
    pub fn mark_connected(&mut self) -> Result<ConnectionStatus, EngineError> {
        if self.phase != ConnectionPhase::Connecting {
            return Err(EngineError::invalid_phase(self.phase, "mark_connected"));
        }
        self.phase = ConnectionPhase::Connected;
        self.reconnect_attempt = 0;
        self.retry_in_ms = None;
        Ok(self.status())
    }

    /// The stream dropped or a connect attempt failed.
    pub fn mark_disconnected(
        &mut self,
        reconnect_attempt: u32,
        retry_in_ms: Option<u64>,
    ) -> Result<ConnectionStatus, EngineError> {
        if !matches!(
            self.phase,
            ConnectionPhase::Connecting | ConnectionPhase::Connected
        ) {
            return Err(EngineError::invalid_phase(self.phase, "mark_disconnected"));
        }
        self.phase = ConnectionPhase::Disconnected;
        self.reconnect_attempt = reconnect_attempt;
        self.retry_in_ms = retry_in_ms;
        Ok(self.status())
    }

    /// Enter the terminal phase; valid from anywhere, idempotent.
    pub fn terminate(&mut self) -> ConnectionStatus {
        self.phase = ConnectionPhase::Terminated;
        self.retry_in_ms = None;
        self.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_happy_path_phase_transitions() {
        let mut tracker = ConnectionTracker::default();
        assert_eq!(tracker.phase(), ConnectionPhase::Disconnected);

        tracker.begin_connect().expect("begin_connect must work");
        assert_eq!(tracker.phase(), ConnectionPhase::Connecting);

        let status = tracker.mark_connected().expect("mark_connected must work");
        assert!(status.connected);
        assert_eq!(status.reconnect_attempt, 0);

        let status = tracker
            .mark_disconnected(1, Some(500))
            .expect("mark_disconnected must work");
        assert!(!status.connected);
        assert_eq!(status.reconnect_attempt, 1);
        assert_eq!(status.retry_in_ms, Some(500));

        tracker.begin_connect().expect("reconnect must work");
        let status = tracker.mark_connected().expect("reconnect success");
        assert_eq!(status.reconnect_attempt, 0);
        assert_eq!(status.retry_in_ms, None);
    }

    #[test]
    fn rejects_connect_begin_outside_disconnected() {
        let mut tracker = ConnectionTracker::default();
        tracker.begin_connect().expect("first begin should work");

        let err = tracker
            .begin_connect()
            .expect_err("second begin should fail");
        assert_eq!(err.code, "invalid_state_transition");
    }

    #[test]
    fn rejects_connect_command_unless_disconnected() {
        let mut tracker = ConnectionTracker::default();
        tracker
            .ensure_accepts(&EngineCommand::Connect)
            .expect("connect from disconnected should pass");

        tracker.begin_connect().expect("begin should work");
        let err = tracker
            .ensure_accepts(&EngineCommand::Connect)
            .expect_err("connect while connecting should fail");
        assert_eq!(err.code, "invalid_state_transition");
    }

    #[test]
    fn accepts_channel_commands_while_disconnected() {
        let tracker = ConnectionTracker::default();
        tracker
            .ensure_accepts(&EngineCommand::SendMessage {
                channel_id: "c1".to_owned(),
                body: "hello".to_owned(),
                root_id: None,
            })
            .expect("offline sends are queued, not rejected");
    }

    #[test]
    fn terminate_is_a_sink_for_every_command() {
        let mut tracker = ConnectionTracker::default();
        let status = tracker.terminate();
        assert_eq!(status.phase, ConnectionPhase::Terminated);

        let err = tracker
            .ensure_accepts(&EngineCommand::OpenChannel {
                channel_id: "c1".to_owned(),
            })
            .expect_err("terminated engine should reject commands");
        assert_eq!(err.code, "invalid_state_transition");

        let err = tracker
            .mark_disconnected(0, None)
            .expect_err("terminated engine should reject stream transitions");
        assert_eq!(err.code, "invalid_state_transition");
    }
}
