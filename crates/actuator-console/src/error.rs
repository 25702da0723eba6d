//! Console error types.

use actuator_protocol::ProtocolError;
use actuator_session::{ConfigError, SessionError};
use thiserror::Error;

/// Errors surfaced to the console user.
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The session reported an error.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Input could not be interpreted.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Malformed console input.
    #[error("{0}")]
    Usage(String),
}
