//! Compact binary encoding.
//!
//! ```text
//! +--------+---------------------------+
//! | cmd_id | argument (0, 2 or 4 bytes) |
//! +--------+---------------------------+
//! ```
//!
//! The argument width and format come from the command's registered shape.
//! Multi-byte arguments are big-endian. There is no length prefix or
//! checksum, so an unknown id can only be skipped one byte at a time.
//! Text-only commands have no binary form and their ids count as unknown.

use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};

use super::{validate_argument, Decoded, Direction, Encoded, Frame, WireCodec};
use crate::error::{FrameError, ProtocolError, ProtocolResult};
use crate::fixed_point;
use crate::registry::CommandRegistry;
use crate::types::{ArgumentShape, Mode, Value};

/// Codec for the binary mode.
#[derive(Debug, Clone)]
pub struct BinaryCodec {
    registry: Arc<CommandRegistry>,
}

impl BinaryCodec {
    /// Create a binary codec over the given registry.
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        BinaryCodec { registry }
    }
}

impl WireCodec for BinaryCodec {
    fn mode(&self) -> Mode {
        Mode::Binary
    }

    fn encode(&self, frame: &Frame, direction: Direction) -> ProtocolResult<Encoded> {
        let (command, argument) = match frame {
            Frame::Command { command, argument } => (command, argument),
            Frame::Opaque(_) => {
                return Err(ProtocolError::Unsupported {
                    mode: Mode::Binary,
                    what: "opaque frames",
                })
            }
        };
        if command.text_only {
            return Err(ProtocolError::Unsupported {
                mode: Mode::Binary,
                what: "text-only commands",
            });
        }
        validate_argument(command, argument.as_ref(), direction)?;

        let shape = direction.shape_of(command);
        let mut buf = BytesMut::with_capacity(1 + shape.width());
        buf.put_u8(command.id);

        let saturated = match argument {
            Some(value) => put_argument(&mut buf, shape, value),
            None => false,
        };
        if saturated {
            log::debug!("{} argument saturated to {} range", command.name, shape);
        }

        Ok(Encoded {
            bytes: buf.freeze(),
            saturated,
        })
    }

    fn decode(&self, input: &[u8], direction: Direction) -> Decoded {
        let Some(&id) = input.first() else {
            return Decoded::NeedMoreData;
        };

        let Some(command) = self.registry.lookup_by_id(id).filter(|c| !c.text_only) else {
            log::trace!("binary decode: unknown command id 0x{:02X}, skipping one byte", id);
            return Decoded::Error(FrameError::new(
                &input[..1],
                1,
                ProtocolError::UnknownCommandId(id),
            ));
        };

        let shape = direction.shape_of(command);
        let frame_len = 1 + shape.width();
        if input.len() < frame_len {
            return Decoded::NeedMoreData;
        }

        let mut payload = &input[1..frame_len];
        let argument = take_argument(&mut payload, shape);

        Decoded::Frame {
            frame: Frame::command(*command, argument),
            consumed: frame_len,
        }
    }
}

/// Write a validated argument. Returns whether a real value was clamped.
fn put_argument(buf: &mut BytesMut, shape: ArgumentShape, value: &Value) -> bool {
    match (shape, *value) {
        (ArgumentShape::Q8_8 | ArgumentShape::Q4_12, Value::Real(v)) => {
            let format = match shape.fixed_format() {
                Some(format) => format,
                None => return false,
            };
            let q = fixed_point::encode_checked(v, format);
            buf.put_i16(q.raw);
            q.saturated
        }
        (ArgumentShape::F32, Value::Real(v)) => {
            let clamped = if v.is_nan() {
                0.0
            } else {
                v.clamp(f32::MIN as f64, f32::MAX as f64)
            };
            buf.put_f32(clamped as f32);
            clamped != v
        }
        (ArgumentShape::Int16, Value::Int(v)) => {
            buf.put_i16(v);
            false
        }
        (ArgumentShape::UInt16, Value::UInt(v)) => {
            buf.put_u16(v);
            false
        }
        // validate_argument has already rejected every other combination.
        _ => false,
    }
}

/// Read an argument of the given shape. `payload` holds exactly `shape.width()` bytes.
fn take_argument(payload: &mut &[u8], shape: ArgumentShape) -> Option<Value> {
    match shape {
        ArgumentShape::None => None,
        ArgumentShape::Q8_8 | ArgumentShape::Q4_12 => {
            let raw = payload.get_i16();
            shape
                .fixed_format()
                .map(|format| Value::Real(fixed_point::decode(raw, format)))
        }
        ArgumentShape::Int16 => Some(Value::Int(payload.get_i16())),
        ArgumentShape::UInt16 => Some(Value::UInt(payload.get_u16())),
        ArgumentShape::F32 => Some(Value::Real(payload.get_f32() as f64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::*;
    use crate::registry::Command;
    use crate::types::CommandKind;

    fn codec() -> (BinaryCodec, Arc<CommandRegistry>) {
        let registry = Arc::new(CommandRegistry::standard());
        (BinaryCodec::new(registry.clone()), registry)
    }

    fn command(id: u8, name: &'static str, shape: ArgumentShape) -> Command {
        Command {
            id,
            name,
            argument_shape: shape,
            reply_shape: shape,
            kind: CommandKind::Control,
            text_only: false,
        }
    }

    /// A table exercising the shapes the standard commands leave unused.
    fn shapes_codec() -> (BinaryCodec, [Command; 3]) {
        let table = [
            command(0x20, "set_gain", ArgumentShape::Q4_12),
            command(0x21, "set_count", ArgumentShape::UInt16),
            command(0x22, "set_limit", ArgumentShape::F32),
        ];
        let registry = CommandRegistry::with_commands(&table).unwrap();
        (BinaryCodec::new(Arc::new(registry)), table)
    }

    fn decode_one(codec: &BinaryCodec, bytes: &[u8]) -> Frame {
        match codec.decode(bytes, Direction::Request) {
            Decoded::Frame { frame, consumed } => {
                assert_eq!(consumed, bytes.len());
                frame
            }
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_set_position() {
        let (codec, registry) = codec();
        let cmd = *registry.lookup_by_id(CMD_SET_POSITION).unwrap();
        let encoded = codec
            .encode(&Frame::command(cmd, Some(Value::Real(10.0))), Direction::Request)
            .unwrap();
        assert_eq!(&encoded.bytes[..], &[0x01, 0x0A, 0x00]);
        assert!(!encoded.saturated);
    }

    #[test]
    fn test_encode_negative_argument() {
        let (codec, registry) = codec();
        let cmd = *registry.lookup_by_id(CMD_SET_VELOCITY).unwrap();
        let encoded = codec
            .encode(&Frame::command(cmd, Some(Value::Real(-1.0))), Direction::Request)
            .unwrap();
        assert_eq!(&encoded.bytes[..], &[0x02, 0xFF, 0x00]);
    }

    #[test]
    fn test_encode_saturates() {
        let (codec, registry) = codec();
        let cmd = *registry.lookup_by_id(CMD_SET_TORQUE).unwrap();
        let encoded = codec
            .encode(&Frame::command(cmd, Some(Value::Real(1000.0))), Direction::Request)
            .unwrap();
        assert_eq!(&encoded.bytes[..], &[0x03, 0x7F, 0xFF]);
        assert!(encoded.saturated);
    }

    #[test]
    fn test_encode_no_argument() {
        let (codec, registry) = codec();
        let cmd = *registry.lookup_by_id(CMD_ENABLE).unwrap();
        let encoded = codec.encode(&Frame::command(cmd, None), Direction::Request).unwrap();
        assert_eq!(&encoded.bytes[..], &[0x07]);
    }

    #[test]
    fn test_encode_cmd_mode() {
        let (codec, registry) = codec();
        let cmd = *registry.lookup_by_id(CMD_MODE).unwrap();
        let encoded = codec
            .encode(&Frame::command(cmd, Some(Value::Int(1))), Direction::Request)
            .unwrap();
        assert_eq!(&encoded.bytes[..], &[0xAB, 0x00, 0x01]);
    }

    #[test]
    fn test_encode_rejects_opaque() {
        let (codec, _) = codec();
        assert!(matches!(
            codec.encode(&Frame::opaque(&b"M10"[..]), Direction::Request),
            Err(ProtocolError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_decode_partial() {
        let (codec, _) = codec();
        assert_eq!(codec.decode(&[], Direction::Request), Decoded::NeedMoreData);
        assert_eq!(codec.decode(&[0x01], Direction::Request), Decoded::NeedMoreData);
        assert_eq!(codec.decode(&[0x01, 0x0A], Direction::Request), Decoded::NeedMoreData);

        match codec.decode(&[0x01, 0x0A, 0x00], Direction::Request) {
            Decoded::Frame { frame, consumed } => {
                assert_eq!(consumed, 3);
                assert_eq!(frame.as_command().unwrap().id, CMD_SET_POSITION);
                assert_eq!(frame.argument(), Some(Value::Real(10.0)));
            }
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_id_consumes_one_byte() {
        let (codec, _) = codec();
        match codec.decode(&[0x55, 0x07], Direction::Request) {
            Decoded::Error(e) => {
                assert_eq!(e.consumed, 1);
                assert_eq!(&e.raw[..], &[0x55]);
                assert_eq!(e.reason, ProtocolError::UnknownCommandId(0x55));
            }
            other => panic!("expected frame error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_reply_uses_reply_shape() {
        let (codec, _) = codec();
        // get_position request has no argument, its reply carries Q8.8.
        assert!(matches!(
            codec.decode(&[0x04], Direction::Request),
            Decoded::Frame { consumed: 1, .. }
        ));
        assert_eq!(codec.decode(&[0x04], Direction::Reply), Decoded::NeedMoreData);
        match codec.decode(&[0x04, 0xFE, 0x80], Direction::Reply) {
            Decoded::Frame { frame, consumed } => {
                assert_eq!(consumed, 3);
                assert_eq!(frame.argument(), Some(Value::Real(-1.5)));
            }
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_f32_reply() {
        let (codec, _) = codec();
        let mut bytes = vec![CMD_GET_CURRENT_A];
        bytes.extend_from_slice(&1.25f32.to_be_bytes());
        match codec.decode(&bytes, Direction::Reply) {
            Decoded::Frame { frame, consumed } => {
                assert_eq!(consumed, 5);
                assert_eq!(frame.argument(), Some(Value::Real(1.25)));
            }
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_q4_12_wire_bytes() {
        let (codec, [gain, _, _]) = shapes_codec();
        let encoded = codec
            .encode(&Frame::command(gain, Some(Value::Real(1.0))), Direction::Request)
            .unwrap();
        assert_eq!(&encoded.bytes[..], &[0x20, 0x10, 0x00]);
        assert!(!encoded.saturated);

        let encoded = codec
            .encode(&Frame::command(gain, Some(Value::Real(-0.25))), Direction::Request)
            .unwrap();
        assert_eq!(&encoded.bytes[..], &[0x20, 0xFC, 0x00]);
        assert_eq!(
            decode_one(&codec, &encoded.bytes).argument(),
            Some(Value::Real(-0.25))
        );

        let encoded = codec
            .encode(&Frame::command(gain, Some(Value::Real(9.0))), Direction::Request)
            .unwrap();
        assert_eq!(&encoded.bytes[..], &[0x20, 0x7F, 0xFF]);
        assert!(encoded.saturated);

        assert_eq!(
            decode_one(&codec, &[0x20, 0x04, 0x00]).argument(),
            Some(Value::Real(0.25))
        );
    }

    #[test]
    fn test_uint16_wire_bytes() {
        let (codec, [_, count, _]) = shapes_codec();
        let encoded = codec
            .encode(&Frame::command(count, Some(Value::UInt(0xBEEF))), Direction::Request)
            .unwrap();
        assert_eq!(&encoded.bytes[..], &[0x21, 0xBE, 0xEF]);
        assert_eq!(
            decode_one(&codec, &encoded.bytes).argument(),
            Some(Value::UInt(0xBEEF))
        );
        assert!(matches!(
            codec.encode(&Frame::command(count, Some(Value::Int(7))), Direction::Request),
            Err(ProtocolError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_f32_encode_clamps_out_of_range() {
        let (codec, [_, _, limit]) = shapes_codec();
        let encoded = codec
            .encode(&Frame::command(limit, Some(Value::Real(1e300))), Direction::Request)
            .unwrap();
        assert_eq!(&encoded.bytes[1..], &f32::MAX.to_be_bytes());
        assert!(encoded.saturated);

        let encoded = codec
            .encode(&Frame::command(limit, Some(Value::Real(-1e300))), Direction::Request)
            .unwrap();
        assert_eq!(&encoded.bytes[1..], &f32::MIN.to_be_bytes());
        assert!(encoded.saturated);

        let encoded = codec
            .encode(&Frame::command(limit, Some(Value::Real(2.5))), Direction::Request)
            .unwrap();
        assert_eq!(&encoded.bytes[..], &[0x22, 0x40, 0x20, 0x00, 0x00]);
        assert!(!encoded.saturated);
    }

    #[test]
    fn test_text_only_commands_have_no_binary_form() {
        let (codec, registry) = codec();
        let cmd = *registry.lookup_by_id(CMD_GET_TEMPERATURE).unwrap();
        assert!(matches!(
            codec.encode(&Frame::command(cmd, None), Direction::Request),
            Err(ProtocolError::Unsupported { mode: Mode::Binary, .. })
        ));
        match codec.decode(&[CMD_GET_TEMPERATURE, 0x00], Direction::Reply) {
            Decoded::Error(e) => {
                assert_eq!(e.consumed, 1);
                assert_eq!(e.reason, ProtocolError::UnknownCommandId(CMD_GET_TEMPERATURE));
            }
            other => panic!("expected frame error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_back_to_back_frames() {
        let (codec, _) = codec();
        let stream = [0x07, 0x01, 0x0A, 0x00, 0x0A];
        let mut offset = 0;
        let mut ids = Vec::new();
        while offset < stream.len() {
            match codec.decode(&stream[offset..], Direction::Request) {
                Decoded::Frame { frame, consumed } => {
                    ids.push(frame.as_command().unwrap().id);
                    offset += consumed;
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(ids, vec![CMD_ENABLE, CMD_SET_POSITION, CMD_STOP]);
    }
}
