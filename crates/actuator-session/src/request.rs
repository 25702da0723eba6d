//! Requests and their outcomes.

use std::time::{Duration, Instant};

use actuator_protocol::{Command, Frame, Value};

/// Lifecycle of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// Created, not yet written.
    Pending,
    /// Written, waiting for the reply.
    AwaitingResponse,
    /// A matching reply arrived.
    Completed,
    /// No matching reply before the deadline.
    TimedOut,
    /// Abandoned by cancellation, disconnect or a transport failure.
    Failed,
}

impl RequestState {
    /// Whether the request still occupies the in-flight slot.
    pub fn is_outstanding(self) -> bool {
        matches!(self, RequestState::Pending | RequestState::AwaitingResponse)
    }

    /// Get the state name for logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            RequestState::Pending => "pending",
            RequestState::AwaitingResponse => "awaiting_response",
            RequestState::Completed => "completed",
            RequestState::TimedOut => "timed_out",
            RequestState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transmitted frame and its progress.
#[derive(Debug, Clone)]
pub struct Request {
    /// Monotonic per-session sequence number.
    pub sequence: u64,
    /// The frame as submitted.
    pub frame: Frame,
    /// When the request was created.
    pub created_at: Instant,
    /// Current state.
    pub state: RequestState,
}

impl Request {
    pub(crate) fn new(sequence: u64, frame: Frame) -> Self {
        Request {
            sequence,
            frame,
            created_at: Instant::now(),
            state: RequestState::Pending,
        }
    }

    /// The registered command, or `None` for passthrough traffic.
    pub fn command(&self) -> Option<&Command> {
        self.frame.as_command()
    }

    /// The argument sent with the command.
    pub fn argument(&self) -> Option<Value> {
        self.frame.argument()
    }

    /// Name for logs and errors.
    pub fn label(&self) -> String {
        match self.command() {
            Some(command) => command.name.to_string(),
            None => "passthrough".to_string(),
        }
    }

    /// Time since the request was created.
    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Whether a decoded frame answers this request.
    ///
    /// Replies echo the request's command. In passthrough mode any opaque
    /// data answers an opaque request.
    pub fn is_answered_by(&self, frame: &Frame) -> bool {
        match (&self.frame, frame) {
            (Frame::Command { command: sent, .. }, Frame::Command { command: got, .. }) => {
                sent.id == got.id
            }
            (Frame::Opaque(_), Frame::Opaque(_)) => true,
            _ => false,
        }
    }
}

/// A completed request.
#[derive(Debug, Clone)]
pub struct Reply {
    /// The request, in state [`RequestState::Completed`].
    pub request: Request,
    /// The decoded reply frame.
    pub frame: Frame,
    /// The request argument was clamped to the fixed-point range.
    pub saturated: bool,
    /// Time from submission to reply.
    pub latency: Duration,
}

impl Reply {
    /// The reply's argument, if it carried one.
    pub fn value(&self) -> Option<Value> {
        self.frame.argument()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actuator_protocol::{CommandRegistry, CMD_GET_POSITION, CMD_STOP};

    #[test]
    fn test_reply_matching() {
        let registry = CommandRegistry::standard();
        let get = *registry.lookup_by_id(CMD_GET_POSITION).unwrap();
        let stop = *registry.lookup_by_id(CMD_STOP).unwrap();
        let request = Request::new(1, Frame::command(get, None));

        assert!(request.is_answered_by(&Frame::command(get, Some(Value::Real(3.5)))));
        assert!(!request.is_answered_by(&Frame::command(stop, None)));
        assert!(!request.is_answered_by(&Frame::opaque(&b"3.5"[..])));
        assert_eq!(request.state, RequestState::Pending);
        assert_eq!(request.label(), "get_position");
    }

    #[test]
    fn test_passthrough_matching() {
        let request = Request::new(7, Frame::opaque(&b"M10\n"[..]));
        assert!(request.is_answered_by(&Frame::opaque(&b"ok\n"[..])));
        assert!(request.command().is_none());
        assert_eq!(request.label(), "passthrough");
    }

    #[test]
    fn test_outstanding_states() {
        assert!(RequestState::Pending.is_outstanding());
        assert!(RequestState::AwaitingResponse.is_outstanding());
        assert!(!RequestState::Completed.is_outstanding());
        assert!(!RequestState::TimedOut.is_outstanding());
        assert!(!RequestState::Failed.is_outstanding());
    }
}
