//! Common types used throughout the protocol.

use crate::error::ProtocolError;
use crate::fixed_point::QFormat;

/// Shape of the single argument carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgumentShape {
    /// No argument.
    None,
    /// Real value, Q8.8 on the binary wire.
    Q8_8,
    /// Real value, Q4.12 on the binary wire.
    Q4_12,
    /// Signed 16-bit integer.
    Int16,
    /// Unsigned 16-bit integer.
    UInt16,
    /// IEEE-754 single precision. Only used in replies.
    F32,
}

impl ArgumentShape {
    /// Number of bytes the argument occupies in a binary frame.
    pub const fn width(self) -> usize {
        match self {
            ArgumentShape::None => 0,
            ArgumentShape::Q8_8
            | ArgumentShape::Q4_12
            | ArgumentShape::Int16
            | ArgumentShape::UInt16 => 2,
            ArgumentShape::F32 => 4,
        }
    }

    /// The fixed-point format backing this shape, if any.
    pub const fn fixed_format(self) -> Option<QFormat> {
        match self {
            ArgumentShape::Q8_8 => Some(QFormat::Q8_8),
            ArgumentShape::Q4_12 => Some(QFormat::Q4_12),
            _ => None,
        }
    }

    /// Whether a frame with this shape carries an argument at all.
    pub const fn has_argument(self) -> bool {
        !matches!(self, ArgumentShape::None)
    }

    /// Get the shape name as used in diagnostics.
    pub const fn as_str(self) -> &'static str {
        match self {
            ArgumentShape::None => "none",
            ArgumentShape::Q8_8 => "Q8.8",
            ArgumentShape::Q4_12 => "Q4.12",
            ArgumentShape::Int16 => "i16",
            ArgumentShape::UInt16 => "u16",
            ArgumentShape::F32 => "f32",
        }
    }

    /// Build a [`Value`] of this shape from a decimal number.
    ///
    /// Integer shapes only accept whole numbers inside their range; nothing is
    /// truncated or wrapped.
    pub fn value_from_f64(self, number: f64) -> Result<Value, ProtocolError> {
        match self {
            ArgumentShape::None => Err(ProtocolError::ShapeMismatch {
                expected: self,
                found: "a number",
            }),
            ArgumentShape::Q8_8 | ArgumentShape::Q4_12 | ArgumentShape::F32 => {
                Ok(Value::Real(number))
            }
            ArgumentShape::Int16 => {
                if number.fract() != 0.0 || number < i16::MIN as f64 || number > i16::MAX as f64 {
                    return Err(ProtocolError::IntegerOutOfRange { shape: self, value: number });
                }
                Ok(Value::Int(number as i16))
            }
            ArgumentShape::UInt16 => {
                if number.fract() != 0.0 || number < 0.0 || number > u16::MAX as f64 {
                    return Err(ProtocolError::IntegerOutOfRange { shape: self, value: number });
                }
                Ok(Value::UInt(number as u16))
            }
        }
    }

    /// Check that a value has the variant this shape expects.
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ArgumentShape::Q8_8, Value::Real(_))
                | (ArgumentShape::Q4_12, Value::Real(_))
                | (ArgumentShape::F32, Value::Real(_))
                | (ArgumentShape::Int16, Value::Int(_))
                | (ArgumentShape::UInt16, Value::UInt(_))
        )
    }
}

impl std::fmt::Display for ArgumentShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded argument value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Real value (fixed-point or f32 on the wire).
    Real(f64),
    /// Signed integer.
    Int(i16),
    /// Unsigned integer.
    UInt(u16),
}

impl Value {
    /// The value as a float, whatever its variant.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Real(v) => v,
            Value::Int(v) => v as f64,
            Value::UInt(v) => v as f64,
        }
    }

    /// Variant name used in diagnostics.
    pub const fn kind_str(&self) -> &'static str {
        match self {
            Value::Real(_) => "real",
            Value::Int(_) => "signed integer",
            Value::UInt(_) => "unsigned integer",
        }
    }
}

/// How a command affects the actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Causes or alters physical motion.
    Motion,
    /// Reads telemetry without side effects.
    Query,
    /// Power, mode and link management.
    Control,
}

impl CommandKind {
    /// Get the kind name.
    pub const fn as_str(self) -> &'static str {
        match self {
            CommandKind::Motion => "motion",
            CommandKind::Query => "query",
            CommandKind::Control => "control",
        }
    }
}

/// Wire encoding spoken on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Mode {
    /// Line-based ASCII commands.
    #[default]
    HumanReadable,
    /// Compact binary frames.
    Binary,
    /// Opaque SimpleFOC commander traffic.
    #[cfg_attr(feature = "serde", serde(rename = "simplefoc"))]
    SimpleFoc,
}

impl Mode {
    /// All modes in their documented order.
    pub const ALL: [Mode; 3] = [Mode::HumanReadable, Mode::Binary, Mode::SimpleFoc];

    /// Get the short mode name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Mode::HumanReadable => "human",
            Mode::Binary => "binary",
            Mode::SimpleFoc => "simplefoc",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "human" | "human_readable" | "text" => Ok(Mode::HumanReadable),
            "binary" => Ok(Mode::Binary),
            "simplefoc" | "simple_foc" | "foc" => Ok(Mode::SimpleFoc),
            _ => Err(ProtocolError::UnknownMode(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_widths() {
        assert_eq!(ArgumentShape::None.width(), 0);
        assert_eq!(ArgumentShape::Q8_8.width(), 2);
        assert_eq!(ArgumentShape::Int16.width(), 2);
        assert_eq!(ArgumentShape::F32.width(), 4);
    }

    #[test]
    fn test_value_from_f64_integer_shapes() {
        assert_eq!(ArgumentShape::Int16.value_from_f64(1.0).unwrap(), Value::Int(1));
        assert_eq!(ArgumentShape::Int16.value_from_f64(-3.0).unwrap(), Value::Int(-3));
        assert!(ArgumentShape::Int16.value_from_f64(1.5).is_err());
        assert!(ArgumentShape::Int16.value_from_f64(40000.0).is_err());
        assert!(ArgumentShape::UInt16.value_from_f64(-1.0).is_err());
        assert_eq!(ArgumentShape::UInt16.value_from_f64(65535.0).unwrap(), Value::UInt(65535));
    }

    #[test]
    fn test_value_from_f64_none_shape() {
        assert!(ArgumentShape::None.value_from_f64(1.0).is_err());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("human".parse::<Mode>().unwrap(), Mode::HumanReadable);
        assert_eq!("BINARY".parse::<Mode>().unwrap(), Mode::Binary);
        assert_eq!("simplefoc".parse::<Mode>().unwrap(), Mode::SimpleFoc);
        assert!("morse".parse::<Mode>().is_err());
    }
}
