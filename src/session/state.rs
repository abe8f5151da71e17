/// Where a session is in its connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    /// Tearing down the connection; `reconnect` selects Backoff or Stopped next
    Disconnecting { reconnect: bool },
    Backoff,
    Stopped,
}

/// Inputs to the session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    ConnectFailed,
    /// Gateway reported `disconnect` or a fatal `error`, or the stream closed
    ConnectionLost,
    /// Gateway reported `ready` while already connected
    ForcedLeave,
    ShutdownRequested,
    TeardownComplete,
    BackoffElapsed,
}

impl SessionState {
    /// Next state after `event`; events that do not apply leave the state as is
    pub fn on(self, event: SessionEvent) -> SessionState {
        use SessionEvent::*;
        use SessionState::*;

        match (self, event) {
            (Stopped, _) => Stopped,
            (Active, ShutdownRequested) | (Disconnecting { .. }, ShutdownRequested) => {
                Disconnecting { reconnect: false }
            }
            (Connecting, ShutdownRequested) | (Backoff, ShutdownRequested) => Stopped,

            (Connecting, Connected) => Active,
            (Connecting, ConnectFailed) => Backoff,
            (Active, ConnectionLost) | (Active, ForcedLeave) => Disconnecting { reconnect: true },
            (Disconnecting { reconnect: true }, TeardownComplete) => Backoff,
            (Disconnecting { reconnect: false }, TeardownComplete) => Stopped,
            (Backoff, BackoffElapsed) => Connecting,

            (state, _) => state,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Disconnecting { .. } => "disconnecting",
            SessionState::Backoff => "backoff",
            SessionState::Stopped => "stopped",
        }
    }
}
