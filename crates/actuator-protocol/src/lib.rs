//! Actuator Controller Command Protocol
//!
//! This crate provides the types and codecs used to talk to an actuator
//! controller over a serial link. The controller understands the same command
//! set in three interchangeable wire encodings:
//!
//! - **Human-readable**: one ASCII line per frame, `<name>[ <decimal>]\n`
//! - **Binary**: `[command id][0, 2 or 4 bytes of big-endian argument]`
//! - **SimpleFOC passthrough**: opaque bytes forwarded unmodified
//!
//! # Protocol Overview
//!
//! Every command is described once in the [`CommandRegistry`]: its id, its
//! canonical lower-case name, the [`ArgumentShape`] of the request and the
//! shape of the reply the controller echoes back. Real-valued arguments travel
//! as Q8.8 or Q4.12 fixed point (see [`fixed_point`]); the codecs convert
//! them transparently so callers only ever handle `f64`.
//!
//! Decoding never buffers: each [`WireCodec::decode`] call inspects the bytes
//! it is given and reports either a complete frame and how many bytes it used,
//! that more data is needed, or a [`FrameError`] carrying the offending bytes.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use actuator_protocol::{BinaryCodec, CommandRegistry, Direction, Frame, Value, WireCodec};
//!
//! let registry = Arc::new(CommandRegistry::standard());
//! let codec = BinaryCodec::new(registry.clone());
//!
//! let command = *registry.lookup_by_name("set_position").unwrap();
//! let frame = Frame::command(command, Some(Value::Real(10.0)));
//! let encoded = codec.encode(&frame, Direction::Request).unwrap();
//! assert_eq!(&encoded.bytes[..], &[0x01, 0x0A, 0x00]);
//! ```

pub mod codec;
mod constants;
mod error;
pub mod fixed_point;
mod registry;
mod types;

pub use codec::*;
pub use constants::*;
pub use error::*;
pub use fixed_point::{QFormat, Quantized};
pub use registry::*;
pub use types::*;
