//! Protocol error types.

use bytes::Bytes;
use thiserror::Error;

use crate::types::{ArgumentShape, Mode};

/// Errors that can occur when encoding, decoding or validating frames.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Command id is not in the registry.
    #[error("unknown command id: 0x{0:02X}")]
    UnknownCommandId(u8),

    /// Command name is not in the registry.
    #[error("unknown command: {0:?}")]
    UnknownCommandName(String),

    /// Mode name could not be parsed.
    #[error("unknown mode: {0:?}")]
    UnknownMode(String),

    /// The command requires an argument but none was given.
    #[error("{command} requires an argument")]
    MissingArgument {
        /// Canonical command name.
        command: &'static str,
    },

    /// The command takes no argument but one was given.
    #[error("{command} takes no argument")]
    UnexpectedArgument {
        /// Canonical command name.
        command: &'static str,
    },

    /// The argument variant does not fit the registered shape.
    #[error("expected {expected} argument, got {found}")]
    ShapeMismatch {
        /// Shape registered for the command.
        expected: ArgumentShape,
        /// What was supplied instead.
        found: &'static str,
    },

    /// An integer argument was fractional or outside its range.
    #[error("{value} is not a valid {shape} value")]
    IntegerOutOfRange {
        /// Target shape.
        shape: ArgumentShape,
        /// Offending value.
        value: f64,
    },

    /// Argument text is not a decimal number.
    #[error("invalid number: {0:?}")]
    InvalidNumber(String),

    /// More tokens followed the argument on a text line.
    #[error("unexpected trailing input: {0:?}")]
    TrailingInput(String),

    /// Text frame contained bytes that are not UTF-8.
    #[error("invalid UTF-8 in text frame")]
    InvalidUtf8,

    /// Text line exceeded the maximum length without a terminator.
    #[error("line too long: maximum {max} bytes, got {actual}")]
    LineTooLong {
        /// Maximum accepted length.
        max: usize,
        /// Bytes buffered without a terminator.
        actual: usize,
    },

    /// The codec for this mode cannot carry the given frame.
    #[error("{mode} codec cannot carry {what}")]
    Unsupported {
        /// Codec mode.
        mode: Mode,
        /// What was attempted.
        what: &'static str,
    },

    /// Two registry entries share an id.
    #[error("duplicate command id: 0x{0:02X}")]
    DuplicateCommandId(u8),

    /// Two registry entries share a name.
    #[error("duplicate command name: {0}")]
    DuplicateCommandName(&'static str),

    /// Registry names must be stored lower-case.
    #[error("command name is not canonical lower-case: {0}")]
    NonCanonicalName(&'static str),
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// A malformed or unrecognised frame found while decoding.
///
/// The offending bytes are kept so the caller can log or retry them. The
/// decoder has already decided how much input to skip: one byte for binary
/// streams, one line for text.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("frame error: {reason} (raw: {raw:?})")]
pub struct FrameError {
    /// The bytes that could not be decoded.
    pub raw: Bytes,
    /// How many input bytes to discard before decoding again.
    pub consumed: usize,
    /// Why the frame was rejected.
    pub reason: ProtocolError,
}

impl FrameError {
    /// Create a frame error for the given raw bytes.
    pub fn new(raw: &[u8], consumed: usize, reason: ProtocolError) -> Self {
        FrameError {
            raw: Bytes::copy_from_slice(raw),
            consumed,
            reason,
        }
    }

    /// The raw bytes as text, for line-based diagnostics.
    pub fn raw_lossy(&self) -> String {
        String::from_utf8_lossy(&self.raw).to_string()
    }
}
