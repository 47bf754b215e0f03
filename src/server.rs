//! Collector: the receive side of the telemetry link.
//!
//! One sequential loop; each datagram is fully handled before the next is
//! read:
//!
//! ```text
//!  recv (bounded by recv_poll) ─▶ decode ─▶ classify ─▶ record ─▶ ACK
//!        │ timeout                  │ short frame
//!        ▼                          ▼
//!  check shutdown flag            drop, log
//! ```
//!
//! Records therefore land in strict receive order.  On shutdown, or when
//! the socket or the record sink fails, the full history is handed to the
//! sink for its timestamp-sorted copy before [`Collector::run`] returns.

use std::net::SocketAddr;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::watch;

use crate::packet::{decode, Frame, MsgType, READING_DELIMITER};
use crate::recorder::{summarize, ClassifiedRecord, RecordSink};
use crate::responder::AckResponder;
use crate::socket::{Socket, SocketError};
use crate::timer::TimerConfig;
use crate::tracker::{Classification, SequenceTracker};

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error("record sink failed: {0}")]
    Record(#[from] std::io::Error),
}

/// A processed datagram: what was recorded and the ACK owed for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    pub record: ClassifiedRecord,
    pub ack: Option<Frame>,
}

pub struct Collector<S: RecordSink> {
    socket: Socket,
    tracker: SequenceTracker,
    responder: AckResponder,
    sink: S,
    history: Vec<ClassifiedRecord>,
    timers: TimerConfig,
}

impl<S: RecordSink> Collector<S> {
    pub fn new(socket: Socket, sink: S, timers: TimerConfig) -> Self {
        Self {
            socket,
            tracker: SequenceTracker::new(),
            responder: AckResponder::new(),
            sink,
            history: Vec::new(),
            timers,
        }
    }

    /// Bind to `addr` and build a collector around the new socket.
    pub async fn bind(addr: SocketAddr, sink: S, timers: TimerConfig) -> Result<Self, SocketError> {
        let socket = Socket::bind(addr).await?;
        Ok(Self::new(socket, sink, timers))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Every record produced so far, in receive order.
    pub fn history(&self) -> &[ClassifiedRecord] {
        &self.history
    }

    pub fn tracker(&self) -> &SequenceTracker {
        &self.tracker
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Decode, classify, and record one datagram.
    ///
    /// Returns `Ok(None)` for datagrams too short to carry a header; those
    /// leave no record.  Corrupt but parseable frames are recorded with
    /// `valid_checksum = false` and still earn an ACK if they are DATA.
    pub fn ingest(&mut self, bytes: &[u8], arrival: SystemTime) -> std::io::Result<Option<Ingested>> {
        let started = Instant::now();

        let decoded = match decode(bytes) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("[collector] dropped datagram: {e}");
                return Ok(None);
            }
        };
        let frame = decoded.frame;

        let flags = match frame.msg_type {
            MsgType::Data | MsgType::Heartbeat => self.tracker.classify(frame.device_id, frame.seq_num),
            MsgType::Ack | MsgType::Unknown(_) => Classification::default(),
        };

        log::info!(
            "[collector] ← {} dev={} seq={} batch={} valid={} dup={} gap={}",
            frame.msg_type,
            frame.device_id,
            frame.seq_num,
            frame.batch_count,
            decoded.valid_checksum,
            flags.duplicate,
            flags.gap
        );
        if !frame.payload.is_empty() {
            for (i, reading) in frame.payload.split(|&b| b == READING_DELIMITER).enumerate() {
                log::debug!("[collector]   reading {i}: {}", String::from_utf8_lossy(reading));
            }
        }

        let ack = self.responder.ack_for(&frame);
        let record = ClassifiedRecord {
            msg_type: frame.msg_type,
            device_id: frame.device_id,
            seq_num: frame.seq_num,
            timestamp: frame.timestamp,
            batch_count: frame.batch_count,
            payload: frame.payload,
            valid_checksum: decoded.valid_checksum,
            duplicate: flags.duplicate,
            gap: flags.gap,
            arrival: arrival
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            processing: started.elapsed(),
            frame_len: bytes.len(),
        };

        self.sink.append(&record)?;
        self.history.push(record.clone());
        Ok(Some(Ingested { record, ack }))
    }

    /// Serve until `shutdown` reads `true`, then flush.
    ///
    /// The flag is checked between receives, so shutdown takes at most one
    /// [`TimerConfig::recv_poll`].  Socket or sink failures take the same
    /// flush path before being returned.
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) -> Result<(), CollectorError> {
        log::info!("[collector] listening on {}", self.socket.local_addr);

        let outcome = self.serve(&shutdown).await;
        if let Err(e) = &outcome {
            log::error!("[collector] stopping after failure: {e}");
        }
        let flushed = self.flush();
        outcome.and(flushed)
    }

    async fn serve(&mut self, shutdown: &watch::Receiver<bool>) -> Result<(), CollectorError> {
        while !*shutdown.borrow() {
            let Some((bytes, peer)) = self.socket.recv_timeout(self.timers.recv_poll).await? else {
                continue;
            };
            let Some(ingested) = self.ingest(&bytes, SystemTime::now())? else {
                continue;
            };
            if let Some(ack) = ingested.ack {
                self.responder.send_ack(&self.socket, &ack, peer).await?;
            }
        }
        Ok(())
    }

    /// Hand the history to the sink and log per-device figures.
    pub fn flush(&mut self) -> Result<(), CollectorError> {
        log::info!("[collector] stopped after {} frame(s)", self.history.len());
        for (device, s) in summarize(&self.history) {
            log::info!(
                "[collector] dev={device} data={} duplicate_rate={:.3} loss_rate={:.3} gaps={} invalid={}",
                s.data_frames,
                s.duplicate_rate(),
                s.loss_rate(),
                s.gaps,
                s.invalid
            );
        }
        self.sink.finish(&self.history)?;
        Ok(())
    }
}
