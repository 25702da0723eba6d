//! Session configuration.
//!
//! Every field has a default, so a YAML file only needs to name what it
//! changes:
//!
//! ```yaml
//! name: left-knee
//! endpoint: tcp://192.168.1.40:4000
//! default_mode: binary
//! response_timeout_ms: 250
//! ```

use std::path::Path;
use std::time::Duration;

use actuator_protocol::Mode;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::transport::Endpoint;

/// Configuration for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session name used in logs and metric labels.
    pub name: String,
    /// Transport address, e.g. `tcp://127.0.0.1:4000`.
    pub endpoint: Option<String>,
    /// Mode the controller is expected to speak after connecting.
    pub default_mode: Mode,
    /// Default time to wait for a reply.
    pub response_timeout_ms: u64,
    /// Send `cmd_mode <default_mode>` on connect and wait for the echo.
    pub handshake: bool,
    /// Time to wait for the handshake echo.
    pub handshake_timeout_ms: u64,
    /// Consecutive frame errors tolerated before the link is dropped.
    pub frame_error_threshold: u32,
    /// Initial capacity of the receive buffer.
    pub read_buffer_size: usize,
    /// Events buffered per subscriber before the slowest one lags.
    pub event_capacity: usize,
    /// Wire values of `cmd_mode` for each mode.
    pub mode_enumerants: ModeEnumerants,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            name: "actuator".to_string(),
            endpoint: None,
            default_mode: Mode::HumanReadable,
            response_timeout_ms: 1000,
            handshake: true,
            handshake_timeout_ms: 1000,
            frame_error_threshold: 16,
            read_buffer_size: 1024,
            event_capacity: 64,
            mode_enumerants: ModeEnumerants::default(),
        }
    }
}

impl SessionConfig {
    /// Parse a YAML document and validate it.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Check field values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.response_timeout_ms == 0 {
            return Err(invalid("response_timeout_ms", "must be greater than zero"));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(invalid("handshake_timeout_ms", "must be greater than zero"));
        }
        if self.frame_error_threshold == 0 {
            return Err(invalid("frame_error_threshold", "must be greater than zero"));
        }
        if self.read_buffer_size == 0 {
            return Err(invalid("read_buffer_size", "must be greater than zero"));
        }
        if self.event_capacity == 0 {
            return Err(invalid("event_capacity", "must be greater than zero"));
        }
        self.mode_enumerants.validate()?;
        if let Some(endpoint) = &self.endpoint {
            Endpoint::parse(endpoint)?;
        }
        Ok(())
    }

    /// The configured endpoint, parsed.
    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        match &self.endpoint {
            Some(endpoint) => Endpoint::parse(endpoint),
            None => Err(ConfigError::MissingEndpoint),
        }
    }

    /// Default reply timeout.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Handshake timeout.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

/// `cmd_mode` argument values.
///
/// Firmware builds disagree on the numbering, so it is configurable. The
/// default is 0 = human, 1 = binary, 2 = SimpleFOC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeEnumerants {
    /// Value selecting the human-readable mode.
    pub human: i16,
    /// Value selecting the binary mode.
    pub binary: i16,
    /// Value selecting SimpleFOC passthrough.
    pub simplefoc: i16,
}

impl Default for ModeEnumerants {
    fn default() -> Self {
        ModeEnumerants {
            human: 0,
            binary: 1,
            simplefoc: 2,
        }
    }
}

impl ModeEnumerants {
    /// Wire value for a mode.
    pub fn value_of(&self, mode: Mode) -> i16 {
        match mode {
            Mode::HumanReadable => self.human,
            Mode::Binary => self.binary,
            Mode::SimpleFoc => self.simplefoc,
        }
    }

    /// Mode for a wire value, if any.
    pub fn mode_of(&self, value: i16) -> Option<Mode> {
        Mode::ALL.into_iter().find(|mode| self.value_of(*mode) == value)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.human == self.binary || self.human == self.simplefoc || self.binary == self.simplefoc {
            return Err(ConfigError::Invalid {
                field: "mode_enumerants",
                reason: format!(
                    "values must be distinct (human={}, binary={}, simplefoc={})",
                    self.human, self.binary, self.simplefoc
                ),
            });
        }
        Ok(())
    }
}
