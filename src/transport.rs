//! Transport abstraction for the pump link.
//!
//! Sessions never assume a transport technology beyond "address-addressable,
//! stream-oriented, connect/send/receive/close". The shipped implementation
//! speaks TCP to a serial/radio gateway; tests script an in-memory link.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {address} failed: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },

    #[error("send failed: {0}")]
    Send(std::io::Error),

    #[error("receive failed: {0}")]
    Receive(std::io::Error),
}

/// One established stream to one pump.
#[async_trait]
pub trait Link: Send {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Next chunk of bytes off the stream. `Ok(None)` means the peer closed.
    /// Chunks carry no framing; the caller reassembles frames itself.
    async fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    async fn close(&mut self);
}

/// Connection factory, one per process, shared by every session.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Box<dyn Link>, TransportError>;
}

/// TCP transport to pumps exposed through a serial-to-network gateway.
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, address: &str) -> Result<Box<dyn Link>, TransportError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|source| TransportError::Connect {
                address: address.to_string(),
                source,
            })?;
        debug!("TCP link established to {}", address);
        Ok(Box::new(TcpLink { stream }))
    }
}

struct TcpLink {
    stream: TcpStream,
}

#[async_trait]
impl Link for TcpLink {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.stream
            .write_all(bytes)
            .await
            .map_err(TransportError::Send)
    }

    async fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut buf = [0u8; 256];
        let n = self
            .stream
            .read(&mut buf)
            .await
            .map_err(TransportError::Receive)?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(buf[..n].to_vec()))
    }

    async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}
