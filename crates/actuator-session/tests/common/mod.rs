//! Simulated actuator controller for session tests.
//!
//! The simulator sits on the far end of a `tokio::io::duplex` pipe, decodes
//! requests with the same codecs the host uses and answers the way the
//! firmware does: setters echo their (quantized) argument, getters reply with
//! the stored value, actions echo their name and `cmd_mode` echoes its
//! enumerant before switching encoding.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use actuator_protocol::{
    Codec, CommandRegistry, Decoded, Direction, Frame, Mode, Value, WireCodec, CMD_GET_BUS_VOLTAGE,
    CMD_GET_CURRENT_A, CMD_GET_CURRENT_B, CMD_GET_CURRENT_C, CMD_GET_DOWNSAMPLE,
    CMD_GET_INTERNAL_TEMPERATURE, CMD_GET_POLE_PAIRS, CMD_GET_POSITION, CMD_GET_TEMPERATURE,
    CMD_GET_TORQUE, CMD_GET_VELOCITY, CMD_MODE, CMD_SET_DOWNSAMPLE, CMD_SET_POLE_PAIRS,
    CMD_SET_POSITION, CMD_SET_TORQUE, CMD_SET_VELOCITY,
};
use actuator_session::{ModeEnumerants, SessionConfig};
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

/// Phase currents the simulator reports.
pub const PHASE_CURRENTS: [f64; 3] = [0.5, -0.25, -0.25];

/// Board temperature, bus voltage and die temperature the simulator reports.
pub const HOUSEKEEPING: [f64; 3] = [36.5, 24.0, 41.25];

/// Reply sent to any passthrough traffic.
pub const PASSTHROUGH_REPLY: &[u8] = b"OK\r\n";

/// Simulated controller state.
pub struct Actuator {
    registry: Arc<CommandRegistry>,
    enumerants: ModeEnumerants,
    mode: Mode,
    position: f64,
    velocity: f64,
    torque: f64,
    downsample: u16,
    pole_pairs: u16,
    /// Command ids the controller receives but never answers.
    ignore: Vec<u8>,
    seen: mpsc::UnboundedSender<Frame>,
}

impl Actuator {
    /// Spawn a simulator speaking `mode` on `io`. Every decoded request is
    /// forwarded on the returned channel.
    pub fn spawn(io: DuplexStream, mode: Mode, ignore: &[u8]) -> mpsc::UnboundedReceiver<Frame> {
        let (seen, rx) = mpsc::unbounded_channel();
        let actuator = Actuator {
            registry: Arc::new(CommandRegistry::standard()),
            enumerants: ModeEnumerants::default(),
            mode,
            position: 0.0,
            velocity: 0.0,
            torque: 0.0,
            downsample: 1,
            pole_pairs: 7,
            ignore: ignore.to_vec(),
            seen,
        };
        tokio::spawn(actuator.run(io));
        rx
    }

    async fn run(mut self, mut io: DuplexStream) {
        let mut buf = BytesMut::new();
        loop {
            match io.read_buf(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            loop {
                let codec = Codec::for_mode(self.mode, self.registry.clone());
                match codec.decode(&buf[..], Direction::Request) {
                    Decoded::NeedMoreData => break,
                    Decoded::Error(e) => buf.advance(e.consumed),
                    Decoded::Frame { frame, consumed } => {
                        buf.advance(consumed);
                        let _ = self.seen.send(frame.clone());
                        let Some((reply, next_mode)) = self.reply_to(&frame) else {
                            continue;
                        };
                        let encoded = codec
                            .encode(&reply, Direction::Reply)
                            .expect("simulator reply should encode");
                        if io.write_all(&encoded.bytes).await.is_err() {
                            return;
                        }
                        if let Some(mode) = next_mode {
                            self.mode = mode;
                        }
                    }
                }
            }
        }
    }

    fn reply_to(&mut self, frame: &Frame) -> Option<(Frame, Option<Mode>)> {
        let Frame::Command { command, argument } = frame else {
            return Some((Frame::opaque(Bytes::from_static(PASSTHROUGH_REPLY)), None));
        };
        if self.ignore.contains(&command.id) {
            return None;
        }

        let real = |v: f64| Some(Value::Real(v));
        let given = argument.map(|v| v.as_f64()).unwrap_or_default();
        let mut next_mode = None;
        let reply = match command.id {
            CMD_SET_POSITION => {
                self.position = given;
                *argument
            }
            CMD_SET_VELOCITY => {
                self.velocity = given;
                *argument
            }
            CMD_SET_TORQUE => {
                self.torque = given;
                *argument
            }
            CMD_GET_POSITION => real(self.position),
            CMD_GET_VELOCITY => real(self.velocity),
            CMD_GET_TORQUE => real(self.torque),
            CMD_GET_CURRENT_A => real(PHASE_CURRENTS[0]),
            CMD_GET_CURRENT_B => real(PHASE_CURRENTS[1]),
            CMD_GET_CURRENT_C => real(PHASE_CURRENTS[2]),
            CMD_GET_TEMPERATURE => real(HOUSEKEEPING[0]),
            CMD_GET_BUS_VOLTAGE => real(HOUSEKEEPING[1]),
            CMD_GET_INTERNAL_TEMPERATURE => real(HOUSEKEEPING[2]),
            CMD_GET_DOWNSAMPLE => Some(Value::UInt(self.downsample)),
            CMD_GET_POLE_PAIRS => Some(Value::UInt(self.pole_pairs)),
            CMD_SET_DOWNSAMPLE => {
                if let Some(Value::UInt(factor)) = argument {
                    self.downsample = *factor;
                }
                *argument
            }
            CMD_SET_POLE_PAIRS => {
                if let Some(Value::UInt(pole_pairs)) = argument {
                    self.pole_pairs = *pole_pairs;
                }
                *argument
            }
            CMD_MODE => {
                if let Some(Value::Int(enumerant)) = argument {
                    next_mode = self.enumerants.mode_of(*enumerant);
                }
                *argument
            }
            _ => *argument,
        };
        Some((Frame::command(*command, reply), next_mode))
    }
}

/// Config with short timeouts for tests.
pub fn test_config(mode: Mode) -> SessionConfig {
    SessionConfig {
        name: "test".to_string(),
        default_mode: mode,
        response_timeout_ms: 150,
        handshake_timeout_ms: 150,
        ..SessionConfig::default()
    }
}

/// Read one `\n`-terminated line from the far end.
pub async fn read_line(io: &mut DuplexStream) -> String {
    let mut line = Vec::new();
    loop {
        let byte = tokio::time::timeout(Duration::from_secs(1), io.read_u8())
            .await
            .expect("timed out waiting for a line")
            .expect("far end read failed");
        line.push(byte);
        if byte == b'\n' {
            return String::from_utf8(line).expect("line should be UTF-8");
        }
    }
}

/// Read exactly `n` bytes from the far end.
pub async fn read_bytes(io: &mut DuplexStream, n: usize) -> Vec<u8> {
    let mut data = vec![0u8; n];
    tokio::time::timeout(Duration::from_secs(1), io.read_exact(&mut data))
        .await
        .expect("timed out waiting for bytes")
        .expect("far end read failed");
    data
}

/// Assert nothing arrives on the far end for a short while.
pub async fn assert_quiet(io: &mut DuplexStream) {
    let mut byte = [0u8; 1];
    let result = tokio::time::timeout(Duration::from_millis(50), io.read(&mut byte)).await;
    assert!(result.is_err(), "unexpected bytes on the wire: {:?}", result);
}

/// Poll `condition` until it holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
