use crate::{error::ChatError, types::ConnectionState};

/// `Connecting -> Open -> Closed` lifecycle of one realtime connection.
#[derive(Debug, Clone)]
pub struct ConnectionLifecycle {
    state: ConnectionState,
}

impl Default for ConnectionLifecycle {
    fn default() -> Self {
        Self {
            state: ConnectionState::Connecting,
        }
    }
}

impl ConnectionLifecycle {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Transport confirmed the connection.
    pub fn on_open(&mut self) -> Result<ConnectionState, ChatError> {
        if self.state != ConnectionState::Connecting {
            return Err(ChatError::invalid_state(self.state, "open"));
        }
        self.state = ConnectionState::Open;
        Ok(self.state)
    }

    /// Explicit close or transport closure. Returns `false` when already closed.
    pub fn on_closed(&mut self) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }
        self.state = ConnectionState::Closed;
        true
    }

    /// Guard for operations that need a live connection.
    pub fn require_open(&self, action: &str) -> Result<(), ChatError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ChatError::invalid_state(self.state, action))
        }
    }
}
