//! Line-based text encoding.
//!
//! One frame per line: the command name, optionally followed by a single
//! space and a decimal argument, terminated with `\n`. Decoding also accepts
//! `\r` and `\r\n` terminators, surrounding whitespace and any letter case in
//! the name.
//!
//! Real arguments are snapped to the command's fixed-point grid in both
//! directions, so a value read back from a text frame is exactly what the
//! binary encoding would have carried.

use std::sync::Arc;

use bytes::{BufMut, BytesMut};

use super::{validate_argument, Decoded, Direction, Encoded, Frame, WireCodec};
use crate::constants::{LINE_TERMINATOR, MAX_LINE_LENGTH};
use crate::error::{FrameError, ProtocolError, ProtocolResult};
use crate::fixed_point;
use crate::registry::{Command, CommandRegistry};
use crate::types::{ArgumentShape, Mode, Value};

/// Codec for the human-readable mode.
#[derive(Debug, Clone)]
pub struct HumanCodec {
    registry: Arc<CommandRegistry>,
}

impl HumanCodec {
    /// Create a text codec over the given registry.
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        HumanCodec { registry }
    }

    /// Parse one trimmed, non-empty line.
    fn parse_line(&self, line: &str, direction: Direction) -> ProtocolResult<Frame> {
        let mut tokens = line.split_whitespace();
        let name = tokens.next().unwrap_or_default();
        let command = self.registry.require_name(name)?;
        let shape = direction.shape_of(command);

        let argument = match tokens.next() {
            Some(text) => {
                let number: f64 = text
                    .parse()
                    .ok()
                    .filter(|n: &f64| n.is_finite())
                    .ok_or_else(|| ProtocolError::InvalidNumber(text.to_string()))?;
                if !shape.has_argument() {
                    return Err(ProtocolError::UnexpectedArgument { command: command.name });
                }
                let (value, _) = snap(shape.value_from_f64(number)?, shape);
                Some(value)
            }
            None => None,
        };

        let rest: Vec<&str> = tokens.collect();
        if !rest.is_empty() {
            return Err(ProtocolError::TrailingInput(rest.join(" ")));
        }

        validate_argument(command, argument.as_ref(), direction)?;
        Ok(Frame::command(*command, argument))
    }
}

impl WireCodec for HumanCodec {
    fn mode(&self) -> Mode {
        Mode::HumanReadable
    }

    fn encode(&self, frame: &Frame, direction: Direction) -> ProtocolResult<Encoded> {
        let (command, argument) = match frame {
            Frame::Command { command, argument } => (command, argument),
            Frame::Opaque(_) => {
                return Err(ProtocolError::Unsupported {
                    mode: Mode::HumanReadable,
                    what: "opaque frames",
                })
            }
        };
        validate_argument(command, argument.as_ref(), direction)?;

        let line = format_line(command, *argument, direction.shape_of(command));
        let mut buf = BytesMut::with_capacity(line.text.len() + 1);
        buf.put_slice(line.text.as_bytes());
        buf.put_u8(LINE_TERMINATOR);

        if line.saturated {
            log::debug!("{} argument saturated to {} range", command.name, direction.shape_of(command));
        }

        Ok(Encoded {
            bytes: buf.freeze(),
            saturated: line.saturated,
        })
    }

    fn decode(&self, input: &[u8], direction: Direction) -> Decoded {
        // Blank lines are skipped but only reported as consumed together
        // with the frame or error that follows them.
        let mut start = 0;
        loop {
            let rest = &input[start..];
            let Some(end) = rest.iter().position(|&b| b == b'\n' || b == b'\r') else {
                if rest.len() > MAX_LINE_LENGTH {
                    return Decoded::Error(FrameError::new(
                        rest,
                        input.len(),
                        ProtocolError::LineTooLong {
                            max: MAX_LINE_LENGTH,
                            actual: rest.len(),
                        },
                    ));
                }
                return Decoded::NeedMoreData;
            };

            // Swallow the whole terminator run so "\r\n" counts as one line end.
            let mut line_end = end;
            while line_end < rest.len() && (rest[line_end] == b'\r' || rest[line_end] == b'\n') {
                line_end += 1;
            }
            let consumed = start + line_end;

            let raw = &rest[..end];
            let text = match std::str::from_utf8(raw) {
                Ok(text) => text.trim(),
                Err(_) => {
                    return Decoded::Error(FrameError::new(raw, consumed, ProtocolError::InvalidUtf8))
                }
            };
            if text.is_empty() {
                start = consumed;
                continue;
            }

            return match self.parse_line(text, direction) {
                Ok(frame) => Decoded::Frame { frame, consumed },
                Err(reason) => {
                    log::trace!("text decode: rejecting line {:?}: {}", text, reason);
                    Decoded::Error(FrameError::new(raw, consumed, reason))
                }
            };
        }
    }
}

struct Line {
    text: String,
    saturated: bool,
}

fn format_line(command: &Command, argument: Option<Value>, shape: ArgumentShape) -> Line {
    match argument {
        None => Line {
            text: command.name.to_string(),
            saturated: false,
        },
        Some(value) => {
            let (value, saturated) = snap(value, shape);
            let text = match value {
                // Debug keeps a trailing ".0" on whole numbers.
                Value::Real(v) => format!("{} {:?}", command.name, v),
                Value::Int(v) => format!("{} {}", command.name, v),
                Value::UInt(v) => format!("{} {}", command.name, v),
            };
            Line { text, saturated }
        }
    }
}

/// Snap a real value onto the shape's fixed-point grid, if it has one.
fn snap(value: Value, shape: ArgumentShape) -> (Value, bool) {
    match (value, shape.fixed_format()) {
        (Value::Real(v), Some(format)) => {
            let (snapped, saturated) = fixed_point::quantize(v, format);
            (Value::Real(snapped), saturated)
        }
        _ => (value, false),
    }
}
