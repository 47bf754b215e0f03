//! Durable record sink for classified frames.
//!
//! The collector hands every processed frame to a [`RecordSink`] in receive
//! order, then at shutdown hands over the whole in-memory history so the
//! sink can re-emit it ordered by the sensor's own timestamp.
//!
//! [`CsvRecorder`] is the production sink: one live CSV flushed after every
//! row, and a second CSV written once at shutdown.  [`MemoryRecorder`]
//! keeps everything in memory for tests and embedding.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::packet::MsgType;

/// Column header shared by the live and sorted CSV files.
pub const CSV_HEADER: &str = "Message Type,Device_ID,Sequence Number,Timestamp,Batch Count,\
Valid Checksum,Arrival,Duplicate Flag,Gap Flag,Bytes Per Report,CPU Time Per Report(ms)";

/// Outcome of processing one inbound frame.  Never mutated once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedRecord {
    pub msg_type: MsgType,
    pub device_id: u16,
    pub seq_num: u16,
    pub timestamp: u32,
    pub batch_count: u8,
    pub payload: Vec<u8>,
    pub valid_checksum: bool,
    pub duplicate: bool,
    pub gap: bool,
    /// Wall-clock arrival, seconds since the Unix epoch.
    pub arrival: f64,
    /// Time spent decoding and classifying the frame.
    pub processing: Duration,
    /// Datagram length in bytes, header included.
    pub frame_len: usize,
}

impl ClassifiedRecord {
    /// One CSV row in [`CSV_HEADER`] column order, without a newline.
    pub fn csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{:.6},{},{},{},{:.4}",
            self.msg_type.to_u8(),
            self.device_id,
            self.seq_num,
            self.timestamp,
            self.batch_count,
            self.valid_checksum,
            self.arrival,
            u8::from(self.duplicate),
            u8::from(self.gap),
            self.frame_len,
            self.processing.as_secs_f64() * 1000.0,
        )
    }
}

/// Destination for classified records.
pub trait RecordSink {
    /// Persist one record; called in receive order.
    fn append(&mut self, record: &ClassifiedRecord) -> io::Result<()>;

    /// Called once at shutdown with every record seen, in receive order.
    fn finish(&mut self, snapshot: &[ClassifiedRecord]) -> io::Result<()>;
}

/// Copy of `records` ordered by embedded timestamp; ties keep receive order.
pub fn sort_by_timestamp(records: &[ClassifiedRecord]) -> Vec<ClassifiedRecord> {
    let mut sorted = records.to_vec();
    sorted.sort_by_key(|r| r.timestamp);
    sorted
}

// ---------------------------------------------------------------------------
// CsvRecorder
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct CsvRecorder {
    live: BufWriter<File>,
    sorted_path: PathBuf,
}

impl CsvRecorder {
    /// Create (truncating) the live log at `live_path`; the sorted copy is
    /// written to `sorted_path` by [`RecordSink::finish`].
    pub fn create(live_path: impl AsRef<Path>, sorted_path: impl Into<PathBuf>) -> io::Result<Self> {
        let mut live = BufWriter::new(File::create(live_path)?);
        writeln!(live, "{CSV_HEADER}")?;
        live.flush()?;
        Ok(Self {
            live,
            sorted_path: sorted_path.into(),
        })
    }
}

impl RecordSink for CsvRecorder {
    fn append(&mut self, record: &ClassifiedRecord) -> io::Result<()> {
        writeln!(self.live, "{}", record.csv_row())?;
        self.live.flush()
    }

    fn finish(&mut self, snapshot: &[ClassifiedRecord]) -> io::Result<()> {
        self.live.flush()?;
        let mut out = BufWriter::new(File::create(&self.sorted_path)?);
        writeln!(out, "{CSV_HEADER}")?;
        for record in sort_by_timestamp(snapshot) {
            writeln!(out, "{}", record.csv_row())?;
        }
        out.flush()?;
        log::info!(
            "[collector] wrote {} record(s) sorted by timestamp to {}",
            snapshot.len(),
            self.sorted_path.display()
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryRecorder
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryRecorder {
    pub appended: Vec<ClassifiedRecord>,
    /// Set by `finish`.
    pub sorted: Option<Vec<ClassifiedRecord>>,
}

impl RecordSink for MemoryRecorder {
    fn append(&mut self, record: &ClassifiedRecord) -> io::Result<()> {
        self.appended.push(record.clone());
        Ok(())
    }

    fn finish(&mut self, snapshot: &[ClassifiedRecord]) -> io::Result<()> {
        self.sorted = Some(sort_by_timestamp(snapshot));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Per-device DATA statistics over a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceSummary {
    pub data_frames: usize,
    pub duplicates: usize,
    pub gaps: usize,
    pub invalid: usize,
    distinct: BTreeSet<u16>,
}

impl DeviceSummary {
    pub fn duplicate_rate(&self) -> f64 {
        if self.data_frames == 0 {
            return 0.0;
        }
        self.duplicates as f64 / self.data_frames as f64
    }

    /// Share of the observed sequence span that never arrived.
    ///
    /// The span is `max - min + 1` over raw values, so a run that crosses
    /// the 16-bit wrap overstates loss.
    pub fn loss_rate(&self) -> f64 {
        let (Some(&min), Some(&max)) = (self.distinct.first(), self.distinct.last()) else {
            return 0.0;
        };
        let expected = usize::from(max - min) + 1;
        (expected - self.distinct.len()) as f64 / expected as f64
    }
}

/// Summarise DATA frames per device, ordered by device id.
pub fn summarize(records: &[ClassifiedRecord]) -> BTreeMap<u16, DeviceSummary> {
    let mut out: BTreeMap<u16, DeviceSummary> = BTreeMap::new();
    for r in records.iter().filter(|r| r.msg_type == MsgType::Data) {
        let s = out.entry(r.device_id).or_default();
        s.data_frames += 1;
        s.duplicates += usize::from(r.duplicate);
        s.gaps += usize::from(r.gap);
        s.invalid += usize::from(!r.valid_checksum);
        s.distinct.insert(r.seq_num);
    }
    out
}
