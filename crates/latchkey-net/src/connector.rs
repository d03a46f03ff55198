//! Transport establishment.
//!
//! The session engine speaks to the transport through [`Connector`] so
//! the reconnect loop, handshake, and pinning policy can be exercised
//! against an in-memory stream. A TLS connector slots in here by
//! returning the peer certificate digest alongside the stream; the
//! plain TCP connector returns none.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

/// Opens one transport connection to the control server.
pub trait Connector {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    /// Connect and return the stream plus the peer's certificate
    /// digest, when the transport has one.
    async fn connect(&mut self, host: &str, port: u16)
    -> std::io::Result<(Self::Stream, Option<[u8; 32]>)>;
}

/// Plain TCP transport.
#[derive(Debug, Default, Clone)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(
        &mut self,
        host: &str,
        port: u16,
    ) -> std::io::Result<(TcpStream, Option<[u8; 32]>)> {
        debug!(host, port, "connecting");
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok((stream, None))
    }
}
