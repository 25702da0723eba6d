//! Session error types.

use std::time::Duration;

use actuator_protocol::{Mode, ProtocolError};
use thiserror::Error;

/// Errors reported by [`Session`](crate::Session) operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The session has no open transport.
    #[error("session is not connected")]
    NotConnected,

    /// `connect` was called while a connection exists or is being set up.
    #[error("session is already connected")]
    AlreadyConnected,

    /// Another request is still waiting for its reply. Nothing was sent.
    #[error("request {sequence} is still in flight")]
    Busy {
        /// Sequence number of the outstanding request.
        sequence: u64,
    },

    /// No matching reply arrived in time. The session stays connected, but
    /// the effect of the command on the actuator is unknown.
    #[error("no reply to {command} within {timeout:?}")]
    Timeout {
        /// Name of the command that timed out.
        command: String,
        /// Timeout that applied.
        timeout: Duration,
    },

    /// Reading or writing the transport failed. The session is disconnected.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The peer closed the transport. The session is disconnected.
    #[error("transport closed by peer")]
    TransportClosed,

    /// Opening the transport or the mode handshake failed.
    #[error("failed to connect to {endpoint}: {source}")]
    Connection {
        /// Endpoint that was being connected.
        endpoint: String,
        /// Underlying failure.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Encoding the request failed, or the command is unknown.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The request was abandoned before a reply arrived.
    #[error("request {sequence} was cancelled; its outcome on the actuator is unknown")]
    Cancelled {
        /// Sequence number of the abandoned request.
        sequence: u64,
    },

    /// The session was disconnected while the request was outstanding.
    #[error("session disconnected while request {sequence} was in flight")]
    Disconnected {
        /// Sequence number of the abandoned request.
        sequence: u64,
    },

    /// An earlier attempt of this command has an unknown outcome and has not
    /// been confirmed.
    #[error("{command} has an unconfirmed earlier attempt; check the actuator and call confirm_ambiguous()")]
    Ambiguous {
        /// Name of the blocked command.
        command: &'static str,
    },

    /// The controller acknowledged a mode switch with a different mode.
    #[error("mode switch to {requested} rejected: controller answered {answered:?}")]
    Rejected {
        /// Mode that was requested.
        requested: Mode,
        /// Enumerant the controller echoed back.
        answered: Option<i16>,
    },

    /// Too many consecutive undecodable frames. The session is disconnected.
    #[error("{0} consecutive frame errors; check wiring, baud rate and mode")]
    FrameErrorLimit(u32),

    /// The reply carried no value where one was expected.
    #[error("reply to {command} carried no value")]
    MissingValue {
        /// Name of the command.
        command: &'static str,
    },

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised while loading or validating a [`SessionConfig`](crate::SessionConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The YAML did not match the config schema.
    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// No endpoint was configured.
    #[error("no endpoint configured")]
    MissingEndpoint,

    /// The endpoint string is not understood.
    #[error("unsupported endpoint {0:?}; expected tcp://host:port")]
    UnsupportedEndpoint(String),

    /// A field holds an unusable value.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
