//! Collector-side acknowledgements.
//!
//! Every DATA frame that decodes is acknowledged, whatever its checksum,
//! duplicate, or gap status: an ACK says "this sequence number reached the
//! collector", nothing more.  Acknowledging duplicates is what stops a
//! sender whose earlier ACK was lost from retransmitting forever.
//! HEARTBEAT, ACK, and unknown frames are never acknowledged.

use std::net::SocketAddr;

use crate::packet::{Frame, FrameError, MsgType};
use crate::socket::{Socket, SocketError};

#[derive(Debug, Default, Clone, Copy)]
pub struct AckResponder;

impl AckResponder {
    pub fn new() -> Self {
        Self
    }

    /// ACK frame for `frame`, or `None` if the frame is not DATA.
    pub fn ack_for(&self, frame: &Frame) -> Option<Frame> {
        match frame.msg_type {
            MsgType::Data => Some(Frame::ack(frame.device_id, frame.seq_num, frame.timestamp)),
            _ => None,
        }
    }

    /// Encoded ACK for `frame`, if one is due.
    pub fn ack_bytes(&self, frame: &Frame) -> Result<Option<Vec<u8>>, FrameError> {
        self.ack_for(frame).map(|ack| ack.encode()).transpose()
    }

    /// Send `ack` back to the peer the acknowledged frame came from.
    pub async fn send_ack(
        &self,
        socket: &Socket,
        ack: &Frame,
        peer: SocketAddr,
    ) -> Result<(), SocketError> {
        socket.send_frame(ack, peer).await?;
        log::debug!(
            "[collector] → ACK dev={} seq={} to {peer}",
            ack.device_id,
            ack.seq_num
        );
        Ok(())
    }
}
