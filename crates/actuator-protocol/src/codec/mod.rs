//! Wire codecs.
//!
//! Each [`Mode`] has one codec implementing [`WireCodec`]. Codecs are
//! stateless apart from a shared handle to the [`CommandRegistry`]; the
//! caller owns the receive buffer and re-invokes [`WireCodec::decode`] as more
//! bytes arrive.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{FrameError, ProtocolError, ProtocolResult};
use crate::registry::{Command, CommandRegistry};
use crate::types::{ArgumentShape, Mode, Value};

mod binary;
mod human;
mod passthrough;

pub use binary::BinaryCodec;
pub use human::HumanCodec;
pub use passthrough::PassthroughCodec;

/// Which side of the conversation a frame belongs to.
///
/// Requests and replies for the same command may carry differently shaped
/// arguments (`get_position` sends nothing and receives a Q8.8 value), so
/// codecs need to know which shape applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Host to controller.
    Request,
    /// Controller to host.
    Reply,
}

impl Direction {
    /// The argument shape a command uses in this direction.
    pub fn shape_of(self, command: &Command) -> ArgumentShape {
        match self {
            Direction::Request => command.argument_shape,
            Direction::Reply => command.reply_shape,
        }
    }
}

/// One complete unit of traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A registered command with its optional argument.
    Command {
        /// The command.
        command: Command,
        /// Argument, present exactly when the shape has one.
        argument: Option<Value>,
    },
    /// Bytes the core does not interpret (SimpleFOC passthrough).
    Opaque(Bytes),
}

impl Frame {
    /// Build a command frame.
    pub fn command(command: Command, argument: Option<Value>) -> Self {
        Frame::Command { command, argument }
    }

    /// Build an opaque frame.
    pub fn opaque(data: impl Into<Bytes>) -> Self {
        Frame::Opaque(data.into())
    }

    /// The registered command, if this is a command frame.
    pub fn as_command(&self) -> Option<&Command> {
        match self {
            Frame::Command { command, .. } => Some(command),
            Frame::Opaque(_) => None,
        }
    }

    /// The argument, if any.
    pub fn argument(&self) -> Option<Value> {
        match self {
            Frame::Command { argument, .. } => *argument,
            Frame::Opaque(_) => None,
        }
    }

    /// Short description for logs.
    pub fn describe(&self) -> String {
        match self {
            Frame::Command { command, argument: Some(value) } => {
                format!("{} {}", command.name, value.as_f64())
            }
            Frame::Command { command, argument: None } => command.name.to_string(),
            Frame::Opaque(data) => format!("opaque ({} bytes)", data.len()),
        }
    }
}

/// Bytes ready to be written to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    /// The encoded frame.
    pub bytes: Bytes,
    /// A real-valued argument was clamped to the range of its wire format.
    pub saturated: bool,
}

/// Outcome of one decode attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A complete frame was found at the start of the input.
    Frame {
        /// The decoded frame.
        frame: Frame,
        /// Bytes used, including any terminator.
        consumed: usize,
    },
    /// The input holds only part of a frame.
    NeedMoreData,
    /// The input starts with something that is not a valid frame.
    Error(FrameError),
}

/// Common capability of every wire encoding.
pub trait WireCodec: std::fmt::Debug + Send + Sync {
    /// The mode this codec implements.
    fn mode(&self) -> Mode;

    /// Encode a frame for transmission.
    fn encode(&self, frame: &Frame, direction: Direction) -> ProtocolResult<Encoded>;

    /// Try to decode one frame from the start of `input`.
    fn decode(&self, input: &[u8], direction: Direction) -> Decoded;
}

/// The codec for each mode, selected at runtime.
#[derive(Debug, Clone)]
pub enum Codec {
    /// Line-based text.
    HumanReadable(HumanCodec),
    /// Compact binary.
    Binary(BinaryCodec),
    /// Opaque passthrough.
    Passthrough(PassthroughCodec),
}

impl Codec {
    /// Build the codec for a mode.
    pub fn for_mode(mode: Mode, registry: Arc<CommandRegistry>) -> Self {
        match mode {
            Mode::HumanReadable => Codec::HumanReadable(HumanCodec::new(registry)),
            Mode::Binary => Codec::Binary(BinaryCodec::new(registry)),
            Mode::SimpleFoc => Codec::Passthrough(PassthroughCodec::new()),
        }
    }

    fn inner(&self) -> &dyn WireCodec {
        match self {
            Codec::HumanReadable(c) => c,
            Codec::Binary(c) => c,
            Codec::Passthrough(c) => c,
        }
    }
}

impl WireCodec for Codec {
    fn mode(&self) -> Mode {
        self.inner().mode()
    }

    fn encode(&self, frame: &Frame, direction: Direction) -> ProtocolResult<Encoded> {
        self.inner().encode(frame, direction)
    }

    fn decode(&self, input: &[u8], direction: Direction) -> Decoded {
        self.inner().decode(input, direction)
    }
}

/// Check an argument against the shape the command uses in `direction`.
pub(crate) fn validate_argument(
    command: &Command,
    argument: Option<&Value>,
    direction: Direction,
) -> ProtocolResult<()> {
    let shape = direction.shape_of(command);
    match (shape.has_argument(), argument) {
        (false, None) => Ok(()),
        (false, Some(_)) => Err(ProtocolError::UnexpectedArgument { command: command.name }),
        (true, None) => Err(ProtocolError::MissingArgument { command: command.name }),
        (true, Some(value)) if shape.accepts(value) => Ok(()),
        (true, Some(value)) => Err(ProtocolError::ShapeMismatch {
            expected: shape,
            found: value.kind_str(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::*;

    #[test]
    fn test_codec_for_mode() {
        let registry = Arc::new(CommandRegistry::standard());
        for mode in Mode::ALL {
            assert_eq!(Codec::for_mode(mode, registry.clone()).mode(), mode);
        }
    }

    #[test]
    fn test_direction_shapes() {
        let registry = CommandRegistry::standard();
        let get = registry.lookup_by_id(CMD_GET_POSITION).unwrap();
        assert_eq!(Direction::Request.shape_of(get), ArgumentShape::None);
        assert_eq!(Direction::Reply.shape_of(get), ArgumentShape::Q8_8);
    }

    #[test]
    fn test_validate_argument() {
        let registry = CommandRegistry::standard();
        let set = registry.lookup_by_id(CMD_SET_POSITION).unwrap();
        let stop = registry.lookup_by_id(CMD_STOP).unwrap();

        assert!(validate_argument(set, Some(&Value::Real(1.0)), Direction::Request).is_ok());
        assert_eq!(
            validate_argument(set, None, Direction::Request),
            Err(ProtocolError::MissingArgument { command: "set_position" })
        );
        assert!(matches!(
            validate_argument(set, Some(&Value::Int(1)), Direction::Request),
            Err(ProtocolError::ShapeMismatch { .. })
        ));
        assert_eq!(
            validate_argument(stop, Some(&Value::Real(1.0)), Direction::Request),
            Err(ProtocolError::UnexpectedArgument { command: "stop" })
        );
    }
}
