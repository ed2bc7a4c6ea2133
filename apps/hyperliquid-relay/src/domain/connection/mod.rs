//! Upstream Connection Lifecycle
//!
//! Pure state machine for the single upstream connection. The connector
//! drives it from its run loop; keeping the transitions here makes the
//! reconnect-timer rules testable without sockets.
//!
//! ```text
//! Disconnected --connect--> Connecting --opened--> Connected
//!      ^                        |                      |
//!      |                      lost                   lost
//!      +--- timer fired <-------+----------------------+
//! ```
//!
//! At most one reconnect timer is ever pending. Shutdown closes the
//! connection deliberately and suppresses any further reconnects.

use std::fmt;

use serde::Serialize;

// =============================================================================
// Types
// =============================================================================

/// Connection state of the upstream feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No socket; a reconnect may be pending.
    #[default]
    Disconnected,
    /// Socket is being opened.
    Connecting,
    /// Socket is open and subscriptions have been replayed.
    Connected,
}

impl ConnectionState {
    /// Get the lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// State Machine
// =============================================================================

/// Upstream connection state plus the reconnect timer guard.
#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    reconnect_pending: bool,
    shut_down: bool,
}

impl ConnectionStateMachine {
    /// Create a machine in the `Disconnected` state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether a reconnect timer is outstanding.
    #[must_use]
    pub const fn is_reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub const fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// `Disconnected → Connecting`.
    ///
    /// Returns false (and stays put) if already connecting, connected, or
    /// shut down.
    pub fn connect(&mut self) -> bool {
        if self.shut_down || self.state != ConnectionState::Disconnected {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    /// `Connecting → Connected`. Cancels any pending reconnect timer.
    ///
    /// Returns true when the caller must replay active subscriptions.
    pub fn opened(&mut self) -> bool {
        if self.shut_down || self.state != ConnectionState::Connecting {
            return false;
        }
        self.state = ConnectionState::Connected;
        self.reconnect_pending = false;
        true
    }

    /// Socket closed or errored: `→ Disconnected`.
    ///
    /// Returns true only when a new reconnect timer must be scheduled. A
    /// second loss while a timer is pending schedules nothing.
    pub fn lost(&mut self) -> bool {
        self.state = ConnectionState::Disconnected;
        if self.shut_down || self.reconnect_pending {
            return false;
        }
        self.reconnect_pending = true;
        true
    }

    /// The reconnect timer fired. Clears the guard and moves to
    /// `Connecting`.
    ///
    /// Returns false for a stale timer (none pending, or shut down).
    pub fn timer_fired(&mut self) -> bool {
        if !self.reconnect_pending {
            return false;
        }
        self.reconnect_pending = false;
        self.connect()
    }

    /// Deliberate close: `→ Disconnected`, no reconnect will follow.
    pub fn shutdown(&mut self) {
        self.shut_down = true;
        self.reconnect_pending = false;
        self.state = ConnectionState::Disconnected;
    }
}

// =============================================================================
// Tests
// =============================================================================
