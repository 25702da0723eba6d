//! Session state and the events published when it changes.

use actuator_protocol::{Frame, FrameError, Mode};

use crate::request::RequestState;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No transport.
    #[default]
    Disconnected,
    /// Transport opening or handshake in progress.
    Connecting,
    /// Ready for requests.
    Connected,
}

impl ConnectionState {
    /// Get the state name for logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best-known driver power state.
///
/// Only updated when an `enable` or `disable` is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PowerState {
    /// Driver off.
    #[default]
    Disabled,
    /// Driver on.
    Enabled,
}

/// Something the session observed.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// The controller acknowledged a mode switch.
    ModeChanged {
        /// Previous mode.
        from: Mode,
        /// New mode.
        to: Mode,
    },
    /// An enable or disable was acknowledged.
    PowerChanged(PowerState),
    /// A request left the in-flight slot.
    RequestFinished {
        /// Request sequence number.
        sequence: u64,
        /// Final state.
        state: RequestState,
    },
    /// A frame arrived that answers no outstanding request.
    Unsolicited(Frame),
    /// Undecodable bytes were skipped.
    FrameError(FrameError),
    /// The link was dropped because of an error.
    Escalated {
        /// Why the link was dropped.
        reason: String,
    },
}
