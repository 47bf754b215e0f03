//! Wire-format definitions for telemetry frames.
//!
//! Every datagram exchanged between a sensor and the collector is a
//! [`Frame`].  This module is responsible for:
//! - Defining the on-wire binary layout (fixed header plus opaque payload).
//! - Serialising a [`Frame`] into a byte buffer ready for transmission.
//! - Parsing a raw byte slice back into a [`Decoded`] frame, reporting the
//!   checksum verdict as a flag rather than an error.
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Msg Type    |           Device ID           |  Seq Num ...  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  ... Seq Num  |                   Timestamp ...               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | ... Timestamp |  Batch Count  |           Checksum            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Payload (0–188 bytes) ...                 |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 12 bytes.
//! type(1) + device(2) + seq(2) + timestamp(4) + batch(1) + checksum(2)
//!
//! # Checksum
//!
//! The checksum is the plain sum of every frame byte (checksum field zeroed)
//! modulo 65536.  It catches any single-byte corruption but not, for
//! example, two bytes swapped or two changes that cancel out.  It is an
//! integrity hint, not a security mechanism.

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 12;

/// Largest datagram either side will ever emit.
pub const MAX_FRAME_LEN: usize = 200;

/// Largest payload that fits in one frame.
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - HEADER_LEN;

/// Separator placed between readings folded into one payload.
pub const READING_DELIMITER: u8 = b'|';

/// `batch_count` value meaning "payload was truncated, count unknown".
pub const BATCH_TRUNCATED: u8 = 0;

// Byte offsets of each field within the serialised header.
const OFF_TYPE: usize = 0;
const OFF_DEVICE: usize = 1;
const OFF_SEQ: usize = 3;
const OFF_TIMESTAMP: usize = 5;
const OFF_BATCH: usize = 9;
const OFF_CHECKSUM: usize = 10;

/// Role of a frame, carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    /// Sensor readings; acknowledged by the collector.
    Data,
    /// Liveness beacon with an empty payload; never acknowledged.
    Heartbeat,
    /// Collector acknowledgement of one DATA sequence number.
    Ack,
    /// Any other value seen on the wire; kept so it can still be logged.
    Unknown(u8),
}

impl MsgType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => MsgType::Data,
            2 => MsgType::Heartbeat,
            3 => MsgType::Ack,
            other => MsgType::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            MsgType::Data => 1,
            MsgType::Heartbeat => 2,
            MsgType::Ack => 3,
            MsgType::Unknown(v) => v,
        }
    }
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MsgType::Data => write!(f, "DATA"),
            MsgType::Heartbeat => write!(f, "HEARTBEAT"),
            MsgType::Ack => write!(f, "ACK"),
            MsgType::Unknown(v) => write!(f, "UNKNOWN({v})"),
        }
    }
}

/// A telemetry frame: header fields plus opaque payload bytes.
///
/// The checksum is not stored here; [`Frame::encode`] computes it and
/// [`decode`] reports it alongside the frame in [`Decoded`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: MsgType,
    pub device_id: u16,
    /// Per-device sequence number; wraps at 65536.
    pub seq_num: u16,
    /// Seconds since the Unix epoch, stamped by the producer.
    pub timestamp: u32,
    /// Number of readings in `payload`, or [`BATCH_TRUNCATED`].
    pub batch_count: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Empty-payload acknowledgement echoing `device_id` / `seq_num`.
    pub fn ack(device_id: u16, seq_num: u16, timestamp: u32) -> Self {
        Self {
            msg_type: MsgType::Ack,
            device_id,
            seq_num,
            timestamp,
            batch_count: 0,
            payload: Vec::new(),
        }
    }

    /// Serialise this frame into a newly allocated byte vector.
    ///
    /// Returns [`FrameError::PayloadTooLarge`] when the payload exceeds
    /// [`MAX_PAYLOAD_LEN`]; callers truncate before getting here.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge {
                len: self.payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }

        let mut buf = vec![0u8; HEADER_LEN + self.payload.len()];
        buf[OFF_TYPE] = self.msg_type.to_u8();
        buf[OFF_DEVICE..OFF_DEVICE + 2].copy_from_slice(&self.device_id.to_be_bytes());
        buf[OFF_SEQ..OFF_SEQ + 2].copy_from_slice(&self.seq_num.to_be_bytes());
        buf[OFF_TIMESTAMP..OFF_TIMESTAMP + 4].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[OFF_BATCH] = self.batch_count;
        // Checksum field stays zero while the sum is taken.
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        let csum = checksum(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());

        Ok(buf)
    }
}

/// Result of parsing one datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub frame: Frame,
    /// Checksum as carried on the wire.
    pub checksum: u16,
    /// `true` when `checksum` matches the recomputed sum.
    pub valid_checksum: bool,
}

/// Parse a frame from a raw datagram.
///
/// Only a buffer shorter than [`HEADER_LEN`] is an error.  A checksum
/// mismatch still yields a frame, flagged through
/// [`Decoded::valid_checksum`], so malformed traffic can be recorded.
pub fn decode(buf: &[u8]) -> Result<Decoded, FrameError> {
    if buf.len() < HEADER_LEN {
        return Err(FrameError::ShortFrame { len: buf.len() });
    }

    let stored = u16::from_be_bytes([buf[OFF_CHECKSUM], buf[OFF_CHECKSUM + 1]]);
    let frame = Frame {
        msg_type: MsgType::from_u8(buf[OFF_TYPE]),
        device_id: u16::from_be_bytes([buf[OFF_DEVICE], buf[OFF_DEVICE + 1]]),
        seq_num: u16::from_be_bytes([buf[OFF_SEQ], buf[OFF_SEQ + 1]]),
        timestamp: u32::from_be_bytes([
            buf[OFF_TIMESTAMP],
            buf[OFF_TIMESTAMP + 1],
            buf[OFF_TIMESTAMP + 2],
            buf[OFF_TIMESTAMP + 3],
        ]),
        batch_count: buf[OFF_BATCH],
        payload: buf[HEADER_LEN..].to_vec(),
    };

    // Summing with the checksum bytes skipped is the same as zeroing them.
    let expected = checksum(&buf[..OFF_CHECKSUM]).wrapping_add(checksum(&buf[HEADER_LEN..]));

    Ok(Decoded {
        frame,
        checksum: stored,
        valid_checksum: stored == expected,
    })
}

/// Additive checksum: sum of all bytes modulo 65536.
///
/// The caller must zero any checksum field within `data` first.
pub fn checksum(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

/// Errors raised while building or parsing frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("short frame: {len} bytes, header needs {HEADER_LEN}")]
    ShortFrame { len: usize },
    #[error("payload of {len} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge { len: usize, max: usize },
}
