//! SimpleFOC passthrough.
//!
//! The controller can hand its serial port to a SimpleFOC commander. Its
//! traffic is not interpreted here: whatever the caller supplies is written
//! as-is, and whatever arrives is handed back as-is.

use bytes::Bytes;

use super::{Decoded, Direction, Encoded, Frame, WireCodec};
use crate::error::{ProtocolError, ProtocolResult};
use crate::types::Mode;

/// Identity codec for the SimpleFOC mode.
#[derive(Debug, Clone, Default)]
pub struct PassthroughCodec;

impl PassthroughCodec {
    /// Create a passthrough codec.
    pub fn new() -> Self {
        PassthroughCodec
    }
}

impl WireCodec for PassthroughCodec {
    fn mode(&self) -> Mode {
        Mode::SimpleFoc
    }

    fn encode(&self, frame: &Frame, _direction: Direction) -> ProtocolResult<Encoded> {
        match frame {
            Frame::Opaque(data) => Ok(Encoded {
                bytes: data.clone(),
                saturated: false,
            }),
            Frame::Command { .. } => Err(ProtocolError::Unsupported {
                mode: Mode::SimpleFoc,
                what: "registered commands",
            }),
        }
    }

    fn decode(&self, input: &[u8], _direction: Direction) -> Decoded {
        if input.is_empty() {
            return Decoded::NeedMoreData;
        }
        Decoded::Frame {
            frame: Frame::Opaque(Bytes::copy_from_slice(input)),
            consumed: input.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CommandRegistry;

    #[test]
    fn test_encode_is_identity() {
        let codec = PassthroughCodec::new();
        let encoded = codec
            .encode(&Frame::opaque(&b"M1.5\n"[..]), Direction::Request)
            .unwrap();
        assert_eq!(&encoded.bytes[..], b"M1.5\n");
        assert!(!encoded.saturated);
    }

    #[test]
    fn test_decode_is_identity() {
        let codec = PassthroughCodec::new();
        let input = [0x00, 0xAB, b'\n', 0xFF];
        match codec.decode(&input, Direction::Reply) {
            Decoded::Frame { frame, consumed } => {
                assert_eq!(consumed, input.len());
                assert_eq!(frame, Frame::opaque(Bytes::copy_from_slice(&input)));
            }
            other => panic!("expected frame, got {:?}", other),
        }
        assert_eq!(codec.decode(&[], Direction::Reply), Decoded::NeedMoreData);
    }

    #[test]
    fn test_rejects_registered_commands() {
        let registry = CommandRegistry::standard();
        let stop = *registry.lookup_by_name("stop").unwrap();
        assert!(matches!(
            PassthroughCodec::new().encode(&Frame::command(stop, None), Direction::Request),
            Err(ProtocolError::Unsupported { mode: Mode::SimpleFoc, .. })
        ));
    }
}
