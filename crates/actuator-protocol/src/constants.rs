//! Protocol constants
//!
//! Command ids shared by every wire encoding. The human-readable encoding uses
//! the registered names instead, but the ids are what the binary encoding puts
//! on the wire and what replies are matched against.

// ============================================================================
// Motion and telemetry
// ============================================================================

/// Move to an absolute position (Q8.8).
pub const CMD_SET_POSITION: u8 = 0x01;
/// Set the target velocity (Q8.8).
pub const CMD_SET_VELOCITY: u8 = 0x02;
/// Set the target torque (Q8.8).
pub const CMD_SET_TORQUE: u8 = 0x03;
/// Read the current position.
pub const CMD_GET_POSITION: u8 = 0x04;
/// Read the current velocity.
pub const CMD_GET_VELOCITY: u8 = 0x05;
/// Read the current torque.
pub const CMD_GET_TORQUE: u8 = 0x06;

// ============================================================================
// Power and actions
// ============================================================================

/// Energise the motor driver.
pub const CMD_ENABLE: u8 = 0x07;
/// De-energise the motor driver.
pub const CMD_DISABLE: u8 = 0x08;
/// Run the homing sequence.
pub const CMD_HOME: u8 = 0x09;
/// Stop all motion immediately.
pub const CMD_STOP: u8 = 0x0A;
/// Take the current position as the new zero reference.
pub const CMD_RESET_POSITION: u8 = 0x0B;

// ============================================================================
// Phase currents
// ============================================================================

/// Read phase A current (reply is f32).
pub const CMD_GET_CURRENT_A: u8 = 0x0C;
/// Read phase B current (reply is f32).
pub const CMD_GET_CURRENT_B: u8 = 0x0D;
/// Read phase C current (reply is f32).
pub const CMD_GET_CURRENT_C: u8 = 0x0E;

// ============================================================================
// Text-only commands
// ============================================================================
//
// The firmware only handles these in the human-readable encoding. The ids
// identify them in the registry and for reply matching and never appear on
// the binary wire.

/// Read the board temperature in degrees Celsius (reply is f32).
pub const CMD_GET_TEMPERATURE: u8 = 0x10;
/// Read the bus voltage in volts (reply is f32).
pub const CMD_GET_BUS_VOLTAGE: u8 = 0x11;
/// Read the microcontroller die temperature in degrees Celsius (reply is f32).
pub const CMD_GET_INTERNAL_TEMPERATURE: u8 = 0x12;
/// Read the motion loop downsampling factor (reply is u16).
pub const CMD_GET_DOWNSAMPLE: u8 = 0x13;
/// Run the motion loop every n-th control loop (u16).
pub const CMD_SET_DOWNSAMPLE: u8 = 0x14;
/// Read the motor pole pair count (reply is u16).
pub const CMD_GET_POLE_PAIRS: u8 = 0x15;
/// Set the motor pole pair count (u16).
pub const CMD_SET_POLE_PAIRS: u8 = 0x16;
/// Persist the current configuration to EEPROM.
pub const CMD_SAVE_CONFIG: u8 = 0x17;
/// Re-run sensor calibration. The motor moves while it runs.
pub const CMD_RECALIBRATE_SENSORS: u8 = 0x18;

// ============================================================================
// Link control
// ============================================================================

/// Switch the wire encoding (Int16 mode enumerant).
pub const CMD_MODE: u8 = 0xAB;
/// Set the telemetry broadcast frequency in Hz (Q8.8, 0 disables).
pub const CMD_BROADCAST: u8 = 0xAC;

// ============================================================================
// Framing limits
// ============================================================================

/// Longest human-readable line accepted before the decoder gives up on it.
pub const MAX_LINE_LENGTH: usize = 160;

/// Line terminator appended by the human-readable encoder.
pub const LINE_TERMINATOR: u8 = b'\n';
