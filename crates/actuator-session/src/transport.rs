//! Byte transports.
//!
//! The session only needs an async byte stream. A `tcp://` endpoint (a
//! serial-over-TCP bridge such as ser2net, or a simulator) is opened here;
//! anything else that implements [`Transport`] can be handed straight to
//! [`Session::connect_with`](crate::Session::connect_with).
//!
//! Reads that have nothing to deliver park the reader task instead of
//! returning `WouldBlock`. A read of zero bytes means the peer closed.

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::ConfigError;

/// A bidirectional byte stream the session can own.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// A boxed transport.
pub type BoxedTransport = Box<dyn Transport>;

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `host:port` reached over TCP.
    Tcp(String),
}

impl Endpoint {
    /// Parse an endpoint string such as `tcp://127.0.0.1:4000`.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let s = s.trim();
        match s.strip_prefix("tcp://") {
            Some(addr) if addr.contains(':') && !addr.ends_with(':') => {
                Ok(Endpoint::Tcp(addr.to_string()))
            }
            _ => Err(ConfigError::UnsupportedEndpoint(s.to_string())),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
        }
    }
}

/// Open a transport for an endpoint.
pub async fn open(endpoint: &Endpoint) -> std::io::Result<BoxedTransport> {
    match endpoint {
        Endpoint::Tcp(addr) => {
            let stream = TcpStream::connect(addr.as_str()).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp() {
        assert_eq!(
            Endpoint::parse("tcp://localhost:4000").unwrap(),
            Endpoint::Tcp("localhost:4000".to_string())
        );
        assert_eq!(
            Endpoint::parse("tcp://10.0.0.2:23").unwrap().to_string(),
            "tcp://10.0.0.2:23"
        );
    }

    #[test]
    fn test_parse_rejects() {
        for bad in ["localhost:4000", "tcp://localhost", "tcp://host:", "udp://a:1", "/dev/ttyACM0"] {
            assert!(Endpoint::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_open_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        let endpoint = Endpoint::Tcp(addr.to_string());
        assert!(open(&endpoint).await.is_ok());
        assert!(accept.await.unwrap().is_ok());
    }
}
