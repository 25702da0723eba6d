//! The session state machine.
//!
//! A [`Session`] owns one transport and talks to one controller. The link is
//! half-duplex: a request is written, then the session waits for the reply
//! before anything else may be sent. A background reader task is the only
//! place bytes are decoded, so it alone completes requests, commits mode
//! switches and reports unsolicited traffic.
//!
//! ```text
//! Disconnected --connect--> Connecting --handshake ok--> Connected
//!      ^                        |                            |
//!      +------- failure --------+---- disconnect / error ----+
//! ```

use std::sync::Arc;
use std::time::Duration;

use actuator_protocol::{
    Codec, Command, CommandRegistry, Decoded, Direction, Frame, Mode, Value, WireCodec,
    CMD_BROADCAST, CMD_DISABLE, CMD_ENABLE, CMD_GET_BUS_VOLTAGE, CMD_GET_CURRENT_A,
    CMD_GET_CURRENT_B, CMD_GET_CURRENT_C, CMD_GET_DOWNSAMPLE, CMD_GET_INTERNAL_TEMPERATURE,
    CMD_GET_POLE_PAIRS, CMD_GET_POSITION, CMD_GET_TEMPERATURE, CMD_GET_TORQUE, CMD_GET_VELOCITY,
    CMD_HOME, CMD_MODE, CMD_RECALIBRATE_SENSORS, CMD_RESET_POSITION, CMD_SAVE_CONFIG,
    CMD_SET_DOWNSAMPLE, CMD_SET_POLE_PAIRS, CMD_SET_POSITION, CMD_SET_TORQUE, CMD_SET_VELOCITY,
    CMD_STOP,
};
use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::events::{ConnectionState, PowerState, SessionEvent};
use crate::request::{Reply, Request, RequestState};
use crate::telemetry::{metric_defs, Metric};
use crate::transport::{self, BoxedTransport, Transport};

type ReplySender = oneshot::Sender<SessionResult<Frame>>;

// ============================================================================
// Shared State
// ============================================================================

/// The request occupying the single in-flight slot.
struct InFlight {
    request: Request,
    /// Mode to adopt once this `cmd_mode` is acknowledged.
    switch_to: Option<Mode>,
    /// Set once this request owns the writer and its bytes start going out.
    on_wire: bool,
    reply: ReplySender,
}

struct Shared {
    state: ConnectionState,
    mode: Mode,
    codec: Codec,
    power: PowerState,
    /// Bumped on every connect and teardown so a stale reader task cannot
    /// touch a newer connection.
    generation: u64,
    next_sequence: u64,
    in_flight: Option<InFlight>,
    last_request: Option<Request>,
    /// Commands whose last attempt has an unknown outcome.
    ambiguous: Vec<Command>,
    /// Ids of abandoned requests whose echo may still arrive. The first
    /// matching frame is unsolicited rather than a reply to a newer request.
    stale: Vec<u8>,
    consecutive_frame_errors: u32,
    reader: Option<JoinHandle<()>>,
}

struct Inner {
    config: SessionConfig,
    registry: Arc<CommandRegistry>,
    shared: Mutex<Shared>,
    writer: tokio::sync::Mutex<Option<WriteHalf<BoxedTransport>>>,
    events: broadcast::Sender<SessionEvent>,
}

// ============================================================================
// Session
// ============================================================================

/// Handle to a controller session.
///
/// Cloning the handle is cheap; all clones drive the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.inner.config.name)
            .field("state", &self.state())
            .field("mode", &self.mode())
            .finish()
    }
}

impl Session {
    /// Create a disconnected session using the standard command table.
    pub fn new(config: SessionConfig) -> SessionResult<Self> {
        Self::with_registry(config, Arc::new(CommandRegistry::standard()))
    }

    /// Create a disconnected session over a custom command table.
    pub fn with_registry(config: SessionConfig, registry: Arc<CommandRegistry>) -> SessionResult<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);
        let mode = config.default_mode;
        let shared = Shared {
            state: ConnectionState::Disconnected,
            mode,
            codec: Codec::for_mode(mode, registry.clone()),
            power: PowerState::Disabled,
            generation: 0,
            next_sequence: 0,
            in_flight: None,
            last_request: None,
            ambiguous: Vec::new(),
            stale: Vec::new(),
            consecutive_frame_errors: 0,
            reader: None,
        };
        Ok(Session {
            inner: Arc::new(Inner {
                config,
                registry,
                shared: Mutex::new(shared),
                writer: tokio::sync::Mutex::new(None),
                events,
            }),
        })
    }

    /// Session name from the configuration.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// The configuration the session was created with.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// The command table.
    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.inner.registry
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    /// Mode the active codec speaks.
    pub fn mode(&self) -> Mode {
        self.inner.shared.lock().mode
    }

    /// Best-known driver power state.
    pub fn power_state(&self) -> PowerState {
        self.inner.shared.lock().power
    }

    /// Snapshot of the request currently in flight.
    pub fn in_flight(&self) -> Option<Request> {
        self.inner
            .shared
            .lock()
            .in_flight
            .as_ref()
            .map(|f| f.request.clone())
    }

    /// The most recent request to leave the in-flight slot, in its final state.
    pub fn last_request(&self) -> Option<Request> {
        self.inner.shared.lock().last_request.clone()
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Names of the commands blocked by an unknown outcome, oldest first.
    pub fn ambiguous(&self) -> Vec<&'static str> {
        self.inner.shared.lock().ambiguous.iter().map(|c| c.name).collect()
    }

    /// Acknowledge that the caller has checked the actuator after commands
    /// timed out or were cancelled, unblocking them. Returns their names.
    pub fn confirm_ambiguous(&self) -> Vec<&'static str> {
        let cleared: Vec<&'static str> = std::mem::take(&mut self.inner.shared.lock().ambiguous)
            .iter()
            .map(|c| c.name)
            .collect();
        if !cleared.is_empty() {
            debug!("Session[{}]: {:?} confirmed by caller", self.name(), cleared);
        }
        cleared
    }

    // ========================================================================
    // Connection Lifecycle
    // ========================================================================

    /// Open the configured endpoint and handshake in the default mode.
    pub async fn connect(&self) -> SessionResult<()> {
        let endpoint = self.inner.config.endpoint()?;
        self.begin_connect()?;
        debug!("Session[{}]: connecting to {}", self.name(), endpoint);

        let io = match transport::open(&endpoint).await {
            Ok(io) => io,
            Err(e) => {
                warn!("Session[{}]: cannot open {}: {}", self.name(), endpoint, e);
                self.abort_connect();
                return Err(SessionError::Connection {
                    endpoint: endpoint.to_string(),
                    source: Box::new(e),
                });
            }
        };
        self.establish(io, endpoint.to_string()).await
    }

    /// Take ownership of an already open byte stream and handshake over it.
    pub async fn connect_with<T: Transport>(&self, io: T) -> SessionResult<()> {
        self.begin_connect()?;
        self.establish(Box::new(io), "stream".to_string()).await
    }

    /// Drop the transport. Works from any state; an outstanding request
    /// fails with [`SessionError::Disconnected`].
    pub async fn disconnect(&self) {
        let (previous, in_flight, reader) = {
            let mut shared = self.inner.shared.lock();
            let previous = shared.state;
            shared.state = ConnectionState::Disconnected;
            shared.generation += 1;
            (previous, shared.in_flight.take(), shared.reader.take())
        };

        if let Some(reader) = reader {
            reader.abort();
        }
        if let Some(in_flight) = in_flight {
            let sequence = in_flight.request.sequence;
            self.inner
                .finish_failed(in_flight, SessionError::Disconnected { sequence });
        }
        self.inner.close_writer().await;

        if previous != ConnectionState::Disconnected {
            info!("Session[{}]: disconnected", self.name());
            self.inner.emit(SessionEvent::StateChanged(ConnectionState::Disconnected));
        }
    }

    fn begin_connect(&self) -> SessionResult<()> {
        {
            let mut shared = self.inner.shared.lock();
            if shared.state != ConnectionState::Disconnected {
                return Err(SessionError::AlreadyConnected);
            }
            shared.state = ConnectionState::Connecting;
        }
        self.inner.emit(SessionEvent::StateChanged(ConnectionState::Connecting));
        Ok(())
    }

    fn abort_connect(&self) {
        let reverted = {
            let mut shared = self.inner.shared.lock();
            let reverted = shared.state == ConnectionState::Connecting;
            if reverted {
                shared.state = ConnectionState::Disconnected;
            }
            reverted
        };
        if reverted {
            self.inner.emit(SessionEvent::StateChanged(ConnectionState::Disconnected));
        }
    }

    async fn establish(&self, io: BoxedTransport, endpoint: String) -> SessionResult<()> {
        let (read_half, write_half) = tokio::io::split(io);

        let generation = {
            let mut shared = self.inner.shared.lock();
            if shared.state != ConnectionState::Connecting {
                return Err(SessionError::NotConnected);
            }
            shared.generation += 1;
            shared.mode = self.inner.config.default_mode;
            shared.codec = Codec::for_mode(shared.mode, self.inner.registry.clone());
            shared.power = PowerState::Disabled;
            shared.ambiguous.clear();
            shared.stale.clear();
            shared.consecutive_frame_errors = 0;
            shared.generation
        };
        *self.inner.writer.lock().await = Some(write_half);

        let reader = tokio::spawn(read_loop(self.inner.clone(), read_half, generation));
        self.inner.shared.lock().reader = Some(reader);

        if let Err(e) = self.handshake().await {
            warn!("Session[{}]: handshake with {} failed: {}", self.name(), endpoint, e);
            self.disconnect().await;
            return Err(SessionError::Connection {
                endpoint,
                source: Box::new(e),
            });
        }

        {
            let mut shared = self.inner.shared.lock();
            if shared.generation != generation || shared.state != ConnectionState::Connecting {
                return Err(SessionError::NotConnected);
            }
            shared.state = ConnectionState::Connected;
        }
        info!(
            "Session[{}]: connected to {} in {} mode",
            self.name(),
            endpoint,
            self.inner.config.default_mode
        );
        self.inner.emit(SessionEvent::StateChanged(ConnectionState::Connected));
        Ok(())
    }

    /// Confirm the controller speaks the default mode.
    ///
    /// Passthrough has no registered commands, so a session that starts in
    /// SimpleFOC mode trusts the configuration.
    async fn handshake(&self) -> SessionResult<()> {
        let mode = self.inner.config.default_mode;
        if !self.inner.config.handshake || mode == Mode::SimpleFoc {
            return Ok(());
        }
        let frame = self.mode_frame(mode)?;
        let timeout = self.inner.config.handshake_timeout();
        self.transmit(frame, timeout, Some(mode), ConnectionState::Connecting)
            .await
            .map(|_| ())
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Send a command and wait for its reply with the configured timeout.
    pub async fn send(&self, command: Command, argument: Option<Value>) -> SessionResult<Reply> {
        let timeout = self.inner.config.response_timeout();
        self.send_with_timeout(command, argument, timeout).await
    }

    /// Send a command and wait up to `timeout` for its reply.
    ///
    /// Fails with [`SessionError::Busy`] without writing anything if another
    /// request is in flight. On timeout the session stays connected and the
    /// request is recorded as [`RequestState::TimedOut`].
    pub async fn send_with_timeout(
        &self,
        command: Command,
        argument: Option<Value>,
        timeout: Duration,
    ) -> SessionResult<Reply> {
        // A raw cmd_mode still has to move the codec once acknowledged.
        let switch_to = match (command.id, argument) {
            (CMD_MODE, Some(Value::Int(enumerant))) => {
                self.inner.config.mode_enumerants.mode_of(enumerant)
            }
            _ => None,
        };
        let frame = Frame::command(command, argument);
        self.transmit(frame, timeout, switch_to, ConnectionState::Connected)
            .await
    }

    /// Send a command by name with an optional decimal argument.
    pub async fn send_named(&self, name: &str, argument: Option<f64>) -> SessionResult<Reply> {
        let command = *self.inner.registry.require_name(name)?;
        let argument = match argument {
            Some(number) => Some(command.argument_shape.value_from_f64(number)?),
            None => None,
        };
        self.send(command, argument).await
    }

    /// Send opaque bytes in SimpleFOC passthrough mode and wait for whatever
    /// the controller answers.
    pub async fn send_raw(&self, data: impl Into<Bytes>) -> SessionResult<Reply> {
        let timeout = self.inner.config.response_timeout();
        self.transmit(Frame::opaque(data), timeout, None, ConnectionState::Connected)
            .await
    }

    /// Ask the controller to change encoding.
    ///
    /// The command goes out in the current encoding and the session keeps
    /// decoding with the current codec until the acknowledgement arrives.
    /// If no acknowledgement arrives the mode is unchanged. Passthrough mode
    /// cannot carry `cmd_mode`, so leaving it requires a reconnect.
    pub async fn switch_mode(&self, mode: Mode) -> SessionResult<()> {
        let frame = self.mode_frame(mode)?;
        let timeout = self.inner.config.response_timeout();
        self.transmit(frame, timeout, Some(mode), ConnectionState::Connected)
            .await
            .map(|_| ())
    }

    /// Abandon the request in flight, if any.
    ///
    /// The waiting caller gets [`SessionError::Cancelled`]. A request that is
    /// still waiting for the writer is never sent. Once its bytes have gone
    /// out the actuator may still act on the command.
    pub fn cancel(&self) -> Option<Request> {
        let sequence = self.inner.shared.lock().in_flight.as_ref()?.request.sequence;
        let in_flight = self.inner.abandon(sequence, RequestState::Failed)?;
        debug!("Session[{}]: request {} cancelled", self.name(), sequence);
        let request = in_flight.request.clone();
        let _ = in_flight.reply.send(Err(SessionError::Cancelled { sequence }));
        Some(request)
    }

    fn mode_frame(&self, mode: Mode) -> SessionResult<Frame> {
        let command = *self.inner.registry.require_id(CMD_MODE)?;
        let enumerant = self.inner.config.mode_enumerants.value_of(mode);
        Ok(Frame::command(command, Some(Value::Int(enumerant))))
    }

    async fn transmit(
        &self,
        frame: Frame,
        timeout: Duration,
        switch_to: Option<Mode>,
        required: ConnectionState,
    ) -> SessionResult<Reply> {
        let inner = &self.inner;
        let (request, encoded, mut reply_rx, generation, mode) = {
            let mut shared = inner.shared.lock();
            if shared.state != required {
                return Err(SessionError::NotConnected);
            }
            if let Some(busy) = &shared.in_flight {
                let sequence = busy.request.sequence;
                inner.count(&metric_defs::BUSY_REJECTIONS, shared.mode);
                debug!(
                    "Session[{}]: rejecting {}: request {} in flight",
                    inner.config.name,
                    frame.describe(),
                    sequence
                );
                return Err(SessionError::Busy { sequence });
            }
            if let Some(command) = frame.as_command() {
                if shared.ambiguous.iter().any(|blocked| blocked.id == command.id) {
                    return Err(SessionError::Ambiguous { command: command.name });
                }
            }

            let encoded = shared.codec.encode(&frame, Direction::Request)?;
            shared.next_sequence += 1;
            let request = Request::new(shared.next_sequence, frame);
            let (reply, reply_rx) = oneshot::channel();
            shared.in_flight = Some(InFlight {
                request: request.clone(),
                switch_to,
                on_wire: false,
                reply,
            });
            (request, encoded, reply_rx, shared.generation, shared.mode)
        };
        let sequence = request.sequence;
        let _guard = InFlightGuard {
            inner: inner.clone(),
            sequence,
        };

        let written = {
            let mut writer = inner.writer.lock().await;
            // Cancelled or torn down while waiting for the writer.
            if !inner.begin_write(sequence) {
                return Err(reply_rx
                    .try_recv()
                    .ok()
                    .and_then(Result::err)
                    .unwrap_or(SessionError::Cancelled { sequence }));
            }
            match writer.as_mut() {
                Some(writer) => {
                    match writer.write_all(&encoded.bytes).await {
                        Ok(()) => writer.flush().await,
                        Err(e) => Err(e),
                    }
                }
                None => return Err(SessionError::NotConnected),
            }
        };
        if let Err(e) = written {
            inner.fail_link(generation, SessionError::Transport(e)).await;
            return Err(reply_rx
                .try_recv()
                .ok()
                .and_then(Result::err)
                .unwrap_or(SessionError::Disconnected { sequence }));
        }

        inner.mark_awaiting(sequence);
        inner.count(&metric_defs::FRAMES_SENT, mode);
        trace!(
            "Session[{}]: request {} sent: {} ({} bytes)",
            inner.config.name,
            sequence,
            request.frame.describe(),
            encoded.bytes.len()
        );

        let outcome = match tokio::time::timeout(timeout, &mut reply_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(SessionError::Disconnected { sequence }),
            Err(_) => {
                if inner.abandon(sequence, RequestState::TimedOut).is_some() {
                    inner.count(&metric_defs::TIMEOUTS, mode);
                    warn!(
                        "Session[{}]: no reply to {} within {:?}",
                        inner.config.name,
                        request.label(),
                        timeout
                    );
                    return Err(SessionError::Timeout {
                        command: request.label(),
                        timeout,
                    });
                }
                // The reply won the race against the timer.
                reply_rx
                    .try_recv()
                    .unwrap_or(Err(SessionError::Disconnected { sequence }))
            }
        };
        let frame = outcome?;

        let latency = request.elapsed();
        let latency_metric = &metric_defs::REPLY_LATENCY;
        metrics::histogram!(
            latency_metric.name,
            latency_metric.labels_for(&inner.config.name, mode)
        )
        .record(latency.as_micros() as f64);

        let mut request = request;
        request.state = RequestState::Completed;
        Ok(Reply {
            request,
            frame,
            saturated: encoded.saturated,
            latency,
        })
    }

    // ========================================================================
    // Typed Operations
    // ========================================================================

    async fn send_id(&self, id: u8, argument: Option<Value>) -> SessionResult<Reply> {
        let command = *self.inner.registry.require_id(id)?;
        self.send(command, argument).await
    }

    async fn query(&self, id: u8) -> SessionResult<f64> {
        let reply = self.send_id(id, None).await?;
        match reply.value() {
            Some(value) => Ok(value.as_f64()),
            None => Err(SessionError::MissingValue {
                command: reply.request.command().map(|c| c.name).unwrap_or("passthrough"),
            }),
        }
    }

    async fn query_count(&self, id: u8) -> SessionResult<u16> {
        let reply = self.send_id(id, None).await?;
        match reply.value() {
            Some(Value::UInt(count)) => Ok(count),
            _ => Err(SessionError::MissingValue {
                command: reply.request.command().map(|c| c.name).unwrap_or("passthrough"),
            }),
        }
    }

    /// Command an absolute position.
    pub async fn set_position(&self, position: f64) -> SessionResult<Reply> {
        self.send_id(CMD_SET_POSITION, Some(Value::Real(position))).await
    }

    /// Command a velocity.
    pub async fn set_velocity(&self, velocity: f64) -> SessionResult<Reply> {
        self.send_id(CMD_SET_VELOCITY, Some(Value::Real(velocity))).await
    }

    /// Command a torque.
    pub async fn set_torque(&self, torque: f64) -> SessionResult<Reply> {
        self.send_id(CMD_SET_TORQUE, Some(Value::Real(torque))).await
    }

    /// Read the position.
    pub async fn get_position(&self) -> SessionResult<f64> {
        self.query(CMD_GET_POSITION).await
    }

    /// Read the velocity.
    pub async fn get_velocity(&self) -> SessionResult<f64> {
        self.query(CMD_GET_VELOCITY).await
    }

    /// Read the torque.
    pub async fn get_torque(&self) -> SessionResult<f64> {
        self.query(CMD_GET_TORQUE).await
    }

    /// Read the three phase currents, one request each.
    pub async fn get_phase_currents(&self) -> SessionResult<[f64; 3]> {
        Ok([
            self.query(CMD_GET_CURRENT_A).await?,
            self.query(CMD_GET_CURRENT_B).await?,
            self.query(CMD_GET_CURRENT_C).await?,
        ])
    }

    /// Power the driver.
    pub async fn enable(&self) -> SessionResult<Reply> {
        self.send_id(CMD_ENABLE, None).await
    }

    /// Unpower the driver.
    pub async fn disable(&self) -> SessionResult<Reply> {
        self.send_id(CMD_DISABLE, None).await
    }

    /// Run the homing routine.
    pub async fn home(&self) -> SessionResult<Reply> {
        self.send_id(CMD_HOME, None).await
    }

    /// Stop motion.
    pub async fn stop(&self) -> SessionResult<Reply> {
        self.send_id(CMD_STOP, None).await
    }

    /// Declare the current position to be zero.
    pub async fn reset_position(&self) -> SessionResult<Reply> {
        self.send_id(CMD_RESET_POSITION, None).await
    }

    /// Set the telemetry broadcast rate in Hz. Zero turns broadcasts off.
    pub async fn set_broadcast_frequency(&self, hz: f64) -> SessionResult<Reply> {
        self.send_id(CMD_BROADCAST, Some(Value::Real(hz))).await
    }

    // ========================================================================
    // Text-only Operations
    // ========================================================================

    // In binary mode these fail with `ProtocolError::Unsupported` before
    // anything is written.

    /// Read the board temperature in degrees Celsius.
    pub async fn get_temperature(&self) -> SessionResult<f64> {
        self.query(CMD_GET_TEMPERATURE).await
    }

    /// Read the bus voltage in volts.
    pub async fn get_bus_voltage(&self) -> SessionResult<f64> {
        self.query(CMD_GET_BUS_VOLTAGE).await
    }

    /// Read the microcontroller die temperature in degrees Celsius.
    pub async fn get_internal_temperature(&self) -> SessionResult<f64> {
        self.query(CMD_GET_INTERNAL_TEMPERATURE).await
    }

    /// Read the motion loop downsampling factor.
    pub async fn get_downsample(&self) -> SessionResult<u16> {
        self.query_count(CMD_GET_DOWNSAMPLE).await
    }

    /// Run the motion loop every `factor`-th control loop.
    pub async fn set_downsample(&self, factor: u16) -> SessionResult<Reply> {
        self.send_id(CMD_SET_DOWNSAMPLE, Some(Value::UInt(factor))).await
    }

    /// Read the motor pole pair count.
    pub async fn get_pole_pairs(&self) -> SessionResult<u16> {
        self.query_count(CMD_GET_POLE_PAIRS).await
    }

    /// Set the motor pole pair count.
    pub async fn set_pole_pairs(&self, pole_pairs: u16) -> SessionResult<Reply> {
        self.send_id(CMD_SET_POLE_PAIRS, Some(Value::UInt(pole_pairs))).await
    }

    /// Persist the controller configuration.
    pub async fn save_config(&self) -> SessionResult<Reply> {
        self.send_id(CMD_SAVE_CONFIG, None).await
    }

    /// Re-run sensor calibration, waiting up to `timeout` for it to finish.
    ///
    /// The motor moves during calibration. Progress lines the controller
    /// prints meanwhile are reported as frame errors or unsolicited frames.
    pub async fn recalibrate_sensors(&self, timeout: Duration) -> SessionResult<Reply> {
        let command = *self.inner.registry.require_id(CMD_RECALIBRATE_SENSORS)?;
        self.send_with_timeout(command, None, timeout).await
    }
}

/// Releases the in-flight slot if the waiting future is dropped.
struct InFlightGuard {
    inner: Arc<Inner>,
    sequence: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.abandon(self.sequence, RequestState::Failed).is_some() {
            debug!(
                "Session[{}]: request {} dropped before its reply",
                self.inner.config.name, self.sequence
            );
        }
    }
}

// ============================================================================
// Inner
// ============================================================================

impl Inner {
    fn emit(&self, event: SessionEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn count(&self, metric: &Metric, mode: Mode) {
        metrics::counter!(metric.name, metric.labels_for(&self.config.name, mode)).increment(1);
    }

    /// Claim the wire for request `sequence`. False if it no longer owns the
    /// in-flight slot.
    fn begin_write(&self, sequence: u64) -> bool {
        let mut shared = self.shared.lock();
        match shared
            .in_flight
            .as_mut()
            .filter(|f| f.request.sequence == sequence)
        {
            Some(in_flight) => {
                in_flight.on_wire = true;
                true
            }
            None => false,
        }
    }

    fn mark_awaiting(&self, sequence: u64) {
        let mut shared = self.shared.lock();
        if let Some(in_flight) = shared
            .in_flight
            .as_mut()
            .filter(|f| f.request.sequence == sequence)
        {
            in_flight.request.state = RequestState::AwaitingResponse;
        }
    }

    /// Remove request `sequence` from the slot with a final state.
    ///
    /// A command that may have reached the controller has an unknown
    /// outcome: its late echo is quarantined and, apart from `stop` and
    /// `disable`, it is blocked until the caller confirms.
    fn abandon(&self, sequence: u64, state: RequestState) -> Option<InFlight> {
        let in_flight = {
            let mut shared = self.shared.lock();
            if shared.in_flight.as_ref().map(|f| f.request.sequence) != Some(sequence) {
                return None;
            }
            let mut in_flight = shared.in_flight.take()?;
            in_flight.request.state = state;
            match in_flight.request.command().copied() {
                Some(command) if in_flight.on_wire => {
                    shared.stale.push(command.id);
                    let blocked = shared.ambiguous.iter().any(|c| c.id == command.id);
                    if !blocked && !matches!(command.id, CMD_STOP | CMD_DISABLE) {
                        shared.ambiguous.push(command);
                    }
                }
                _ => {}
            }
            shared.last_request = Some(in_flight.request.clone());
            in_flight
        };
        self.emit(SessionEvent::RequestFinished { sequence, state });
        Some(in_flight)
    }

    fn finish_failed(&self, mut in_flight: InFlight, error: SessionError) {
        in_flight.request.state = RequestState::Failed;
        let sequence = in_flight.request.sequence;
        self.shared.lock().last_request = Some(in_flight.request.clone());
        self.emit(SessionEvent::RequestFinished {
            sequence,
            state: RequestState::Failed,
        });
        let _ = in_flight.reply.send(Err(error));
    }

    async fn close_writer(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await;
        }
    }

    /// Tear the link down after a fatal error on connection `generation`.
    async fn fail_link(&self, generation: u64, error: SessionError) {
        let (in_flight, reader) = {
            let mut shared = self.shared.lock();
            if shared.generation != generation || shared.state == ConnectionState::Disconnected {
                return;
            }
            shared.state = ConnectionState::Disconnected;
            shared.generation += 1;
            (shared.in_flight.take(), shared.reader.take())
        };

        let reason = error.to_string();
        warn!("Session[{}]: link dropped: {}", self.config.name, reason);
        if let Some(in_flight) = in_flight {
            self.finish_failed(in_flight, error);
        }
        self.close_writer().await;
        self.emit(SessionEvent::Escalated { reason });
        self.emit(SessionEvent::StateChanged(ConnectionState::Disconnected));

        // Last: this may be the reader task itself.
        if let Some(reader) = reader {
            reader.abort();
        }
    }

    /// Decode everything complete in `buf`. Returns `Ok(false)` when the
    /// connection this reader belongs to is gone.
    fn drain(&self, generation: u64, buf: &mut BytesMut) -> SessionResult<bool> {
        let mut events = Vec::new();
        let mut replies = Vec::new();

        let result = {
            let mut shared = self.shared.lock();
            if shared.generation != generation || shared.state == ConnectionState::Disconnected {
                return Ok(false);
            }
            loop {
                let mode = shared.mode;
                match shared.codec.decode(&buf[..], Direction::Reply) {
                    Decoded::NeedMoreData => break Ok(()),
                    Decoded::Frame { frame, consumed } => {
                        buf.advance(consumed);
                        shared.consecutive_frame_errors = 0;
                        self.count(&metric_defs::FRAMES_RECEIVED, mode);
                        self.dispatch(&mut shared, frame, &mut events, &mut replies);
                    }
                    Decoded::Error(error) => {
                        buf.advance(error.consumed);
                        shared.consecutive_frame_errors += 1;
                        self.count(&metric_defs::FRAME_ERRORS, mode);
                        warn!(
                            "Session[{}]: skipped {} bytes: {} ({:?})",
                            self.config.name,
                            error.consumed,
                            error.reason,
                            error.raw_lossy()
                        );
                        let count = shared.consecutive_frame_errors;
                        events.push(SessionEvent::FrameError(error));
                        if count >= self.config.frame_error_threshold {
                            break Err(SessionError::FrameErrorLimit(count));
                        }
                    }
                }
            }
        };

        for (reply, outcome) in replies {
            let _ = reply.send(outcome);
        }
        for event in events {
            self.emit(event);
        }
        result.map(|()| true)
    }

    /// Route one decoded frame to the in-flight request or to subscribers.
    fn dispatch(
        &self,
        shared: &mut Shared,
        frame: Frame,
        events: &mut Vec<SessionEvent>,
        replies: &mut Vec<(ReplySender, SessionResult<Frame>)>,
    ) {
        let stale = frame
            .as_command()
            .and_then(|command| shared.stale.iter().position(|&id| id == command.id));
        if let Some(index) = stale {
            shared.stale.remove(index);
            debug!("Session[{}]: late reply {}", self.config.name, frame.describe());
            events.push(SessionEvent::Unsolicited(frame));
            return;
        }

        let answers = shared
            .in_flight
            .as_ref()
            .is_some_and(|f| f.request.is_answered_by(&frame));
        if !answers {
            debug!("Session[{}]: unsolicited {}", self.config.name, frame.describe());
            events.push(SessionEvent::Unsolicited(frame));
            return;
        }
        let Some(mut in_flight) = shared.in_flight.take() else {
            return;
        };

        let outcome = self.apply_reply(shared, &in_flight, &frame, events);
        in_flight.request.state = match outcome {
            Ok(()) => RequestState::Completed,
            Err(_) => RequestState::Failed,
        };
        trace!(
            "Session[{}]: request {} {} by {}",
            self.config.name,
            in_flight.request.sequence,
            in_flight.request.state,
            frame.describe()
        );
        // The controller answers in order, so any echo still owed by an
        // abandoned request would have come first.
        shared.stale.clear();
        shared.last_request = Some(in_flight.request.clone());
        events.push(SessionEvent::RequestFinished {
            sequence: in_flight.request.sequence,
            state: in_flight.request.state,
        });
        replies.push((in_flight.reply, outcome.map(|()| frame)));
    }

    /// Side effects of an acknowledged request, applied under the state lock
    /// so bytes after a mode acknowledgement are decoded with the new codec.
    fn apply_reply(
        &self,
        shared: &mut Shared,
        in_flight: &InFlight,
        frame: &Frame,
        events: &mut Vec<SessionEvent>,
    ) -> SessionResult<()> {
        if let Some(target) = in_flight.switch_to {
            let answered = match frame.argument() {
                Some(Value::Int(enumerant)) => Some(enumerant),
                _ => None,
            };
            if answered != Some(self.config.mode_enumerants.value_of(target)) {
                warn!(
                    "Session[{}]: switch to {} answered with {:?}",
                    self.config.name, target, answered
                );
                return Err(SessionError::Rejected {
                    requested: target,
                    answered,
                });
            }
            let from = shared.mode;
            if from != target {
                shared.mode = target;
                shared.codec = Codec::for_mode(target, self.registry.clone());
                info!("Session[{}]: mode {} -> {}", self.config.name, from, target);
                events.push(SessionEvent::ModeChanged { from, to: target });
            }
        }

        let power = match frame.as_command().map(|c| c.id) {
            Some(CMD_ENABLE) => Some(PowerState::Enabled),
            Some(CMD_DISABLE) => Some(PowerState::Disabled),
            _ => None,
        };
        if let Some(power) = power {
            if shared.power != power {
                shared.power = power;
                events.push(SessionEvent::PowerChanged(power));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Reader Task
// ============================================================================

async fn read_loop(inner: Arc<Inner>, mut reader: ReadHalf<BoxedTransport>, generation: u64) {
    let mut buf = BytesMut::with_capacity(inner.config.read_buffer_size);
    let failure = loop {
        match reader.read_buf(&mut buf).await {
            Ok(0) => break SessionError::TransportClosed,
            Ok(n) => {
                trace!("Session[{}]: read {} bytes", inner.config.name, n);
                match inner.drain(generation, &mut buf) {
                    Ok(true) => {}
                    Ok(false) => return,
                    Err(e) => break e,
                }
            }
            Err(e) => break SessionError::Transport(e),
        }
    };
    inner.fail_link(generation, failure).await;
}
