//! Actuator Controller Session
//!
//! This crate drives one actuator controller over a byte stream using the
//! codecs from [`actuator_protocol`]. The link is half-duplex: the host sends
//! one command and waits for the controller to echo it before sending the
//! next.
//!
//! # Overview
//!
//! - [`Session`] owns the transport, the active wire encoding and the single
//!   in-flight request. A background task reads and decodes replies.
//! - [`SessionConfig`] carries timeouts, the default mode and the `cmd_mode`
//!   numbering, and loads from YAML.
//! - [`SessionEvent`]s report state changes, unsolicited frames and frame
//!   errors to any number of subscribers.
//!
//! # Example
//!
//! ```rust,ignore
//! use actuator_session::{Session, SessionConfig};
//! use actuator_protocol::Mode;
//!
//! let session = Session::new(SessionConfig {
//!     endpoint: Some("tcp://127.0.0.1:4000".to_string()),
//!     ..SessionConfig::default()
//! })?;
//! session.connect().await?;
//! session.switch_mode(Mode::Binary).await?;
//! session.enable().await?;
//! session.set_position(10.0).await?;
//! let position = session.get_position().await?;
//! session.disconnect().await;
//! ```

mod config;
mod error;
mod events;
mod request;
mod session;
pub mod telemetry;
pub mod transport;

pub use config::*;
pub use error::*;
pub use events::*;
pub use request::*;
pub use session::Session;
pub use telemetry::describe_metrics;
pub use transport::{BoxedTransport, Endpoint, Transport};
