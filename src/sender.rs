//! Send-side reliability: sequence numbering, framing, retransmission.
//!
//! Two halves share one socket and one [`PendingTable`]:
//!
//! ```text
//!   readings ──▶ ReliableSender ──frame──▶ Socket ──▶ collector
//!                      │ insert                 ▲
//!                      ▼                        │ resend
//!              Arc<Mutex<PendingTable>>         │
//!                      ▲ ack / sweep            │
//!                      │                        │
//!                 Reconciler (task) ◀── ACK ────┘
//! ```
//!
//! - [`ReliableSender`] is owned by the reading loop.  It assigns sequence
//!   numbers (one counter shared by DATA and HEARTBEAT frames), frames the
//!   payload, transmits it and, for DATA, registers a pending entry.
//! - [`Reconciler`] runs as an independent tokio task.  It consumes ACK
//!   frames and sweeps the table on a fixed interval, resending the exact
//!   original bytes until the retry budget runs out.
//!
//! The mutex is only ever held for table operations, never across an
//! `.await`, so neither half can stall the other on network I/O.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::packet::{
    decode, Frame, MsgType, BATCH_TRUNCATED, MAX_PAYLOAD_LEN, READING_DELIMITER,
};
use crate::pending::{PendingTable, Sweep};
use crate::socket::{Socket, SocketError};
use crate::timer::TimerConfig;

/// Seconds since the Unix epoch, saturating into the 32-bit header field.
pub fn unix_seconds() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

/// Join `readings` into one payload.
///
/// Returns the payload and its batch count.  A payload longer than
/// [`MAX_PAYLOAD_LEN`] is cut to exactly that length and the count becomes
/// [`BATCH_TRUNCATED`], since the readings it holds are no longer whole.
pub fn batch_payload<S: AsRef<str>>(readings: &[S]) -> (Vec<u8>, u8) {
    let mut payload = Vec::new();
    for (i, reading) in readings.iter().enumerate() {
        if i > 0 {
            payload.push(READING_DELIMITER);
        }
        payload.extend_from_slice(reading.as_ref().as_bytes());
    }

    if payload.len() > MAX_PAYLOAD_LEN {
        payload.truncate(MAX_PAYLOAD_LEN);
        return (payload, BATCH_TRUNCATED);
    }
    let count = u8::try_from(readings.len()).unwrap_or(BATCH_TRUNCATED);
    (payload, count)
}

/// Payload for one reading sent on its own, cut to [`MAX_PAYLOAD_LEN`].
pub fn single_payload(reading: &str) -> Vec<u8> {
    let bytes = reading.as_bytes();
    bytes[..bytes.len().min(MAX_PAYLOAD_LEN)].to_vec()
}

type SharedTable = Arc<Mutex<PendingTable>>;

fn lock(table: &SharedTable) -> MutexGuard<'_, PendingTable> {
    // A panic elsewhere cannot leave the table half-updated; keep going.
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// ReliableSender
// ---------------------------------------------------------------------------

/// Sensor-side sender for one device.
#[derive(Debug)]
pub struct ReliableSender {
    socket: Arc<Socket>,
    collector: SocketAddr,
    device_id: u16,
    /// Last sequence number handed out; the first frame carries 1.
    last_seq: u16,
    pending: SharedTable,
    timers: TimerConfig,
}

impl ReliableSender {
    pub fn new(
        socket: Arc<Socket>,
        collector: SocketAddr,
        device_id: u16,
        timers: TimerConfig,
    ) -> Self {
        Self {
            socket,
            collector,
            device_id,
            last_seq: 0,
            pending: Arc::new(Mutex::new(PendingTable::new())),
            timers,
        }
    }

    pub fn device_id(&self) -> u16 {
        self.device_id
    }

    /// Sequence number of the most recently sent frame (0 before any send).
    pub fn last_seq(&self) -> u16 {
        self.last_seq
    }

    /// Handle for the background task that owns ACK handling and sweeps.
    pub fn reconciler(&self) -> Reconciler {
        Reconciler {
            socket: Arc::clone(&self.socket),
            collector: self.collector,
            device_id: self.device_id,
            pending: Arc::clone(&self.pending),
            timers: self.timers,
        }
    }

    /// Number of DATA frames still waiting for an ACK.
    pub fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_pending(&self, seq: u16) -> bool {
        lock(&self.pending).contains(seq)
    }

    /// Send an unacknowledged liveness frame; returns its sequence number.
    pub async fn send_heartbeat(&mut self) -> Result<u16, SocketError> {
        let frame = Frame {
            msg_type: MsgType::Heartbeat,
            device_id: self.device_id,
            seq_num: self.advance_seq(),
            timestamp: unix_seconds(),
            batch_count: 0,
            payload: Vec::new(),
        };
        self.socket.send_frame(&frame, self.collector).await?;
        log::debug!("[sensor] → HEARTBEAT seq={}", frame.seq_num);
        Ok(frame.seq_num)
    }

    /// Fold all `readings` into one DATA frame; returns its sequence number.
    pub async fn send_batch<S: AsRef<str>>(&mut self, readings: &[S]) -> Result<u16, SocketError> {
        let (payload, batch_count) = batch_payload(readings);
        if batch_count == BATCH_TRUNCATED && !readings.is_empty() {
            log::warn!(
                "[sensor] batch of {} readings truncated to {} bytes",
                readings.len(),
                MAX_PAYLOAD_LEN
            );
        }
        self.send_tracked(payload, batch_count).await
    }

    /// Send each reading as its own DATA frame; returns the sequence numbers.
    pub async fn send_individually<S: AsRef<str>>(
        &mut self,
        readings: &[S],
    ) -> Result<Vec<u16>, SocketError> {
        let mut seqs = Vec::with_capacity(readings.len());
        for reading in readings {
            let seq = self.send_tracked(single_payload(reading.as_ref()), 1).await?;
            seqs.push(seq);
        }
        Ok(seqs)
    }

    /// Frame, register, and transmit one DATA payload.
    ///
    /// The entry is registered before the datagram leaves so an ACK can
    /// never arrive for a number the table has not seen yet.
    async fn send_tracked(&mut self, payload: Vec<u8>, batch_count: u8) -> Result<u16, SocketError> {
        let frame = Frame {
            msg_type: MsgType::Data,
            device_id: self.device_id,
            seq_num: self.advance_seq(),
            timestamp: unix_seconds(),
            batch_count,
            payload,
        };
        let bytes = frame.encode()?;
        let seq = frame.seq_num;

        lock(&self.pending).insert(seq, bytes.clone(), Instant::now());

        if let Err(e) = self.socket.send_raw(&bytes, self.collector).await {
            lock(&self.pending).acknowledge(seq);
            return Err(e);
        }
        log::debug!(
            "[sensor] → DATA seq={} batch={} len={}",
            seq,
            batch_count,
            bytes.len()
        );
        Ok(seq)
    }

    fn advance_seq(&mut self) -> u16 {
        self.last_seq = self.last_seq.wrapping_add(1);
        self.last_seq
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Background half of the sender: ACK intake and timeout sweeps.
#[derive(Debug, Clone)]
pub struct Reconciler {
    socket: Arc<Socket>,
    collector: SocketAddr,
    device_id: u16,
    pending: SharedTable,
    timers: TimerConfig,
}

impl Reconciler {
    /// Resolve the pending entry for `seq`; unknown numbers are ignored.
    pub fn on_ack(&self, seq: u16) -> bool {
        let removed = lock(&self.pending).acknowledge(seq);
        if removed {
            log::debug!("[sensor] ← ACK seq={seq}");
        } else {
            log::trace!("[sensor] ← ACK seq={seq} (not pending)");
        }
        removed
    }

    /// Inspect one inbound datagram and apply it if it is a usable ACK.
    ///
    /// Frames that are short, corrupt, not ACKs, or addressed to another
    /// device are dropped.
    pub fn handle_datagram(&self, bytes: &[u8]) -> bool {
        let decoded = match decode(bytes) {
            Ok(d) => d,
            Err(e) => {
                log::debug!("[sensor] dropping inbound datagram: {e}");
                return false;
            }
        };
        let frame = &decoded.frame;
        if !decoded.valid_checksum || frame.msg_type != MsgType::Ack || frame.device_id != self.device_id {
            log::debug!(
                "[sensor] ignoring {} dev={} seq={} valid={}",
                frame.msg_type,
                frame.device_id,
                frame.seq_num,
                decoded.valid_checksum
            );
            return false;
        }
        self.on_ack(frame.seq_num)
    }

    /// Retransmit or abandon every entry whose ack timeout has elapsed.
    pub async fn sweep_timeouts(&self, now: Instant) -> Result<Sweep, SocketError> {
        let sweep = lock(&self.pending).sweep(now, &self.timers);

        for (seq, bytes) in &sweep.retransmit {
            self.socket.send_raw(bytes, self.collector).await?;
            log::debug!("[sensor] timeout, retransmitted seq={seq}");
        }
        for seq in &sweep.expired {
            log::warn!(
                "[sensor] seq={seq} lost: no ACK after {} retransmissions",
                self.timers.max_retries
            );
        }
        Ok(sweep)
    }

    /// Drive ACK intake and periodic sweeps until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), SocketError> {
        let mut ticker = tokio::time::interval(self.timers.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.sweep_timeouts(Instant::now()).await?;
                }
                result = self.socket.recv_raw() => {
                    let (bytes, _addr) = result?;
                    self.handle_datagram(&bytes);
                }
            }
        }
        log::debug!("[sensor] reconciler stopped with {} frame(s) pending", lock(&self.pending).len());
        Ok(())
    }

    /// Spawn [`Reconciler::run`] on the current tokio runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<Result<(), SocketError>> {
        tokio::spawn(self.run(shutdown))
    }
}
