//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`crate::packet::Frame`]s on the send side and raw datagrams on the
//! receive side.  Receiving stays raw because the collector must see the
//! datagram length and must log frames that fail to decode.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::packet::{Frame, FrameError};

/// Receive buffer size: a little above the 200-byte frame limit so an
/// oversized datagram is seen whole rather than silently clipped.
pub const RECV_BUFFER_LEN: usize = 256;

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The outbound frame could not be encoded.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

/// An async, frame-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared across tasks through
/// an `Arc`; the sender's main path and its reconciler both use one socket.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Encode `frame` and send it as a single datagram; returns the bytes sent.
    pub async fn send_frame(&self, frame: &Frame, dest: SocketAddr) -> Result<Vec<u8>, SocketError> {
        let bytes = frame.encode()?;
        self.send_raw(&bytes, dest).await?;
        Ok(bytes)
    }

    /// Send already-encoded bytes unchanged (used for retransmission).
    pub async fn send_raw(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(bytes, dest).await?;
        Ok(())
    }

    /// Receive the next datagram.
    pub async fn recv_raw(&self) -> Result<(Vec<u8>, SocketAddr), SocketError> {
        let mut buf = vec![0u8; RECV_BUFFER_LEN];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, addr))
    }

    /// Receive with an upper bound on waiting.
    ///
    /// `Ok(None)` means the poll interval elapsed with nothing to read,
    /// which is a normal outcome rather than an error.
    pub async fn recv_timeout(
        &self,
        limit: Duration,
    ) -> Result<Option<(Vec<u8>, SocketAddr)>, SocketError> {
        match tokio::time::timeout(limit, self.recv_raw()).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }
}
