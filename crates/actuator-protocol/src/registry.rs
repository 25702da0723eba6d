//! The command registry.
//!
//! A single immutable table of every command the controller understands. All
//! wire codecs resolve ids and names through it, so adding a command here is
//! enough to make it available in every encoding.

use std::collections::HashMap;

use crate::constants::*;
use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{ArgumentShape, CommandKind};

/// A registered command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command {
    /// Wire id used by the binary encoding.
    pub id: u8,
    /// Canonical lower-case name used by the text encoding.
    pub name: &'static str,
    /// Shape of the argument sent with the command.
    pub argument_shape: ArgumentShape,
    /// Shape of the argument the controller echoes in its reply.
    pub reply_shape: ArgumentShape,
    /// Effect of the command on the actuator.
    pub kind: CommandKind,
    /// Only the human-readable encoding can carry this command.
    pub text_only: bool,
}

impl Command {
    const fn new(
        id: u8,
        name: &'static str,
        argument_shape: ArgumentShape,
        reply_shape: ArgumentShape,
        kind: CommandKind,
    ) -> Self {
        Command { id, name, argument_shape, reply_shape, kind, text_only: false }
    }

    const fn text_only(self) -> Self {
        Command { text_only: true, ..self }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (0x{:02X})", self.name, self.id)
    }
}

/// The controller's command table, in id order.
pub const COMMAND_TABLE: &[Command] = &[
    Command::new(CMD_SET_POSITION, "set_position", ArgumentShape::Q8_8, ArgumentShape::Q8_8, CommandKind::Motion),
    Command::new(CMD_SET_VELOCITY, "set_velocity", ArgumentShape::Q8_8, ArgumentShape::Q8_8, CommandKind::Motion),
    Command::new(CMD_SET_TORQUE, "set_torque", ArgumentShape::Q8_8, ArgumentShape::Q8_8, CommandKind::Motion),
    Command::new(CMD_GET_POSITION, "get_position", ArgumentShape::None, ArgumentShape::Q8_8, CommandKind::Query),
    Command::new(CMD_GET_VELOCITY, "get_velocity", ArgumentShape::None, ArgumentShape::Q8_8, CommandKind::Query),
    Command::new(CMD_GET_TORQUE, "get_torque", ArgumentShape::None, ArgumentShape::Q8_8, CommandKind::Query),
    Command::new(CMD_ENABLE, "enable", ArgumentShape::None, ArgumentShape::None, CommandKind::Control),
    Command::new(CMD_DISABLE, "disable", ArgumentShape::None, ArgumentShape::None, CommandKind::Control),
    Command::new(CMD_HOME, "home", ArgumentShape::None, ArgumentShape::None, CommandKind::Motion),
    Command::new(CMD_STOP, "stop", ArgumentShape::None, ArgumentShape::None, CommandKind::Control),
    Command::new(CMD_RESET_POSITION, "reset_position", ArgumentShape::None, ArgumentShape::None, CommandKind::Motion),
    Command::new(CMD_GET_CURRENT_A, "get_current_a", ArgumentShape::None, ArgumentShape::F32, CommandKind::Query),
    Command::new(CMD_GET_CURRENT_B, "get_current_b", ArgumentShape::None, ArgumentShape::F32, CommandKind::Query),
    Command::new(CMD_GET_CURRENT_C, "get_current_c", ArgumentShape::None, ArgumentShape::F32, CommandKind::Query),
    Command::new(CMD_GET_TEMPERATURE, "get_temperature", ArgumentShape::None, ArgumentShape::F32, CommandKind::Query).text_only(),
    Command::new(CMD_GET_BUS_VOLTAGE, "get_bus_voltage", ArgumentShape::None, ArgumentShape::F32, CommandKind::Query).text_only(),
    Command::new(CMD_GET_INTERNAL_TEMPERATURE, "get_internal_temperature", ArgumentShape::None, ArgumentShape::F32, CommandKind::Query).text_only(),
    Command::new(CMD_GET_DOWNSAMPLE, "get_downsample", ArgumentShape::None, ArgumentShape::UInt16, CommandKind::Query).text_only(),
    Command::new(CMD_SET_DOWNSAMPLE, "set_downsample", ArgumentShape::UInt16, ArgumentShape::UInt16, CommandKind::Control).text_only(),
    Command::new(CMD_GET_POLE_PAIRS, "get_pole_pairs", ArgumentShape::None, ArgumentShape::UInt16, CommandKind::Query).text_only(),
    Command::new(CMD_SET_POLE_PAIRS, "set_pole_pairs", ArgumentShape::UInt16, ArgumentShape::UInt16, CommandKind::Control).text_only(),
    Command::new(CMD_SAVE_CONFIG, "save_config", ArgumentShape::None, ArgumentShape::None, CommandKind::Control).text_only(),
    Command::new(CMD_RECALIBRATE_SENSORS, "recalibrate_sensors", ArgumentShape::None, ArgumentShape::None, CommandKind::Motion).text_only(),
    Command::new(CMD_MODE, "cmd_mode", ArgumentShape::Int16, ArgumentShape::Int16, CommandKind::Control),
    Command::new(CMD_BROADCAST, "broadcast", ArgumentShape::Q8_8, ArgumentShape::Q8_8, CommandKind::Control),
];

/// Lookup table over a fixed set of commands.
///
/// Build it once and share it (`Arc<CommandRegistry>`) between codecs.
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    commands: Vec<Command>,
    by_id: HashMap<u8, usize>,
    by_name: HashMap<&'static str, usize>,
}

impl CommandRegistry {
    /// Build the registry for the standard controller command table.
    pub fn standard() -> Self {
        // The static table is covered by tests; it cannot fail validation.
        match Self::with_commands(COMMAND_TABLE) {
            Ok(registry) => registry,
            Err(e) => unreachable!("standard command table is invalid: {e}"),
        }
    }

    /// Build a registry from an arbitrary table.
    ///
    /// Rejects duplicate ids, duplicate names and names that are not
    /// lower-case.
    pub fn with_commands(table: &[Command]) -> ProtocolResult<Self> {
        let mut by_id = HashMap::with_capacity(table.len());
        let mut by_name = HashMap::with_capacity(table.len());

        for (index, command) in table.iter().enumerate() {
            if command.name.is_empty() || command.name != command.name.to_ascii_lowercase() {
                return Err(ProtocolError::NonCanonicalName(command.name));
            }
            if by_id.insert(command.id, index).is_some() {
                return Err(ProtocolError::DuplicateCommandId(command.id));
            }
            if by_name.insert(command.name, index).is_some() {
                return Err(ProtocolError::DuplicateCommandName(command.name));
            }
        }

        Ok(CommandRegistry {
            commands: table.to_vec(),
            by_id,
            by_name,
        })
    }

    /// Find a command by its wire id.
    pub fn lookup_by_id(&self, id: u8) -> Option<&Command> {
        self.by_id.get(&id).map(|&index| &self.commands[index])
    }

    /// Find a command by name, ignoring case and surrounding whitespace.
    pub fn lookup_by_name(&self, name: &str) -> Option<&Command> {
        let canonical = name.trim().to_ascii_lowercase();
        self.by_name
            .get(canonical.as_str())
            .map(|&index| &self.commands[index])
    }

    /// Like [`lookup_by_id`](Self::lookup_by_id), with an error for unknown ids.
    pub fn require_id(&self, id: u8) -> ProtocolResult<&Command> {
        self.lookup_by_id(id).ok_or(ProtocolError::UnknownCommandId(id))
    }

    /// Like [`lookup_by_name`](Self::lookup_by_name), with an error for unknown names.
    pub fn require_name(&self, name: &str) -> ProtocolResult<&Command> {
        self.lookup_by_name(name)
            .ok_or_else(|| ProtocolError::UnknownCommandName(name.to_string()))
    }

    /// All commands in table order.
    pub fn all(&self) -> &[Command] {
        &self.commands
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
