//! Unacknowledged-send bookkeeping.
//!
//! [`PendingTable`] maps each in-flight DATA sequence number to the exact
//! bytes that went on the wire.  Unlike a sliding window, entries are
//! independent: an ACK removes exactly one entry, and each entry times out
//! and retries on its own.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.  [`crate::sender`] wraps the table in a mutex shared by
//! the send path and the background reconciler.
//!
//! # Lifecycle of an entry
//!
//! ```text
//!  insert ──▶ waiting ──ACK──▶ removed
//!                │  ▲
//!        timeout │  │ resend same bytes, retries += 1
//!                ▼  │
//!            retries == max ──timeout──▶ removed (permanent loss)
//! ```

use std::collections::HashMap;
use std::time::Instant;

use crate::timer::TimerConfig;

/// A DATA frame that has been sent but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    /// Encoded frame exactly as first transmitted.
    pub bytes: Vec<u8>,
    /// Time of the most recent transmission.
    pub sent_at: Instant,
    /// Retransmissions performed so far (0 = only the original send).
    pub retries: u32,
}

/// Work produced by one [`PendingTable::sweep`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Sweep {
    /// `(seq, bytes)` to put back on the wire, oldest sequence first.
    pub retransmit: Vec<(u16, Vec<u8>)>,
    /// Sequence numbers abandoned after exhausting their retries.
    pub expired: Vec<u16>,
}

impl Sweep {
    pub fn is_empty(&self) -> bool {
        self.retransmit.is_empty() && self.expired.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct PendingTable {
    entries: HashMap<u16, PendingSend>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly transmitted frame.
    ///
    /// A stale entry under the same number (possible only after the
    /// counter has wrapped all the way around) is replaced.
    pub fn insert(&mut self, seq: u16, bytes: Vec<u8>, now: Instant) {
        self.entries.insert(
            seq,
            PendingSend {
                bytes,
                sent_at: now,
                retries: 0,
            },
        );
    }

    /// Drop the entry for `seq`.
    ///
    /// Returns `false` for numbers that are unknown or already resolved;
    /// callers ignore those.
    pub fn acknowledge(&mut self, seq: u16) -> bool {
        self.entries.remove(&seq).is_some()
    }

    /// Collect timed-out entries.
    ///
    /// Entries with retries left are re-armed (`sent_at = now`,
    /// `retries += 1`) and returned for retransmission.  Entries that have
    /// already used `max_retries` are removed and reported as expired.
    pub fn sweep(&mut self, now: Instant, timers: &TimerConfig) -> Sweep {
        let mut sweep = Sweep::default();

        for (&seq, entry) in self.entries.iter_mut() {
            if !timers.is_expired(entry.sent_at, now) {
                continue;
            }
            if entry.retries < timers.max_retries {
                entry.retries += 1;
                entry.sent_at = now;
                sweep.retransmit.push((seq, entry.bytes.clone()));
            } else {
                sweep.expired.push(seq);
            }
        }
        for seq in &sweep.expired {
            self.entries.remove(seq);
        }

        sweep.retransmit.sort_by_key(|(seq, _)| *seq);
        sweep.expired.sort_unstable();
        sweep
    }

    pub fn get(&self, seq: u16) -> Option<&PendingSend> {
        self.entries.get(&seq)
    }

    pub fn contains(&self, seq: u16) -> bool {
        self.entries.contains_key(&seq)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn timers(max_retries: u32) -> TimerConfig {
        TimerConfig {
            ack_timeout: Duration::from_secs(1),
            max_retries,
            ..TimerConfig::default()
        }
    }

    #[test]
    fn ack_removes_entry() {
        let t0 = Instant::now();
        let mut table = PendingTable::new();
        table.insert(1, vec![1, 2, 3], t0);
        assert!(table.contains(1));

        assert!(table.acknowledge(1));
        assert!(table.is_empty());
    }

    #[test]
    fn unknown_ack_ignored() {
        let mut table = PendingTable::new();
        table.insert(1, vec![1], Instant::now());
        assert!(!table.acknowledge(2));
        assert!(table.acknowledge(1));
        assert!(!table.acknowledge(1)); // already resolved
        assert!(table.is_empty());
    }

    #[test]
    fn nothing_due_before_timeout() {
        let t0 = Instant::now();
        let mut table = PendingTable::new();
        table.insert(1, vec![9], t0);
        let sweep = table.sweep(t0 + Duration::from_millis(500), &timers(3));
        assert!(sweep.is_empty());
        assert_eq!(table.get(1).unwrap().retries, 0);
    }

    #[test]
    fn timeout_retransmits_identical_bytes() {
        let t0 = Instant::now();
        let mut table = PendingTable::new();
        table.insert(7, b"frame-7".to_vec(), t0);

        let t1 = t0 + Duration::from_secs(1);
        let sweep = table.sweep(t1, &timers(3));
        assert_eq!(sweep.retransmit, vec![(7, b"frame-7".to_vec())]);
        assert!(sweep.expired.is_empty());

        let entry = table.get(7).unwrap();
        assert_eq!(entry.retries, 1);
        assert_eq!(entry.sent_at, t1);
        assert_eq!(entry.bytes, b"frame-7");
    }

    #[test]
    fn budget_exhaustion_drops_entry() {
        let t0 = Instant::now();
        let cfg = timers(2);
        let mut table = PendingTable::new();
        table.insert(3, vec![3], t0);

        let mut now = t0;
        for expected in 1..=2 {
            now += cfg.ack_timeout;
            let sweep = table.sweep(now, &cfg);
            assert_eq!(sweep.retransmit.len(), 1);
            assert_eq!(table.get(3).unwrap().retries, expected);
        }

        now += cfg.ack_timeout;
        let sweep = table.sweep(now, &cfg);
        assert!(sweep.retransmit.is_empty());
        assert_eq!(sweep.expired, vec![3]);
        assert!(!table.contains(3));

        // Gone for good.
        now += cfg.ack_timeout;
        assert!(table.sweep(now, &cfg).is_empty());
    }

    #[test]
    fn zero_retries_drops_on_first_timeout() {
        let t0 = Instant::now();
        let mut table = PendingTable::new();
        table.insert(1, vec![1], t0);
        let sweep = table.sweep(t0 + Duration::from_secs(1), &timers(0));
        assert_eq!(sweep.expired, vec![1]);
        assert!(table.is_empty());
    }

    #[test]
    fn entries_time_out_independently() {
        let t0 = Instant::now();
        let cfg = timers(3);
        let mut table = PendingTable::new();
        table.insert(1, vec![1], t0);
        table.insert(2, vec![2], t0 + Duration::from_millis(600));

        let sweep = table.sweep(t0 + Duration::from_secs(1), &cfg);
        assert_eq!(sweep.retransmit, vec![(1, vec![1])]);

        let sweep = table.sweep(t0 + Duration::from_millis(1600), &cfg);
        assert_eq!(sweep.retransmit, vec![(2, vec![2])]);
    }

    #[test]
    fn late_ack_after_retransmit_still_clears() {
        let t0 = Instant::now();
        let cfg = timers(3);
        let mut table = PendingTable::new();
        table.insert(1, vec![1], t0);
        table.sweep(t0 + cfg.ack_timeout, &cfg);
        assert!(table.acknowledge(1));
        assert!(table.sweep(t0 + cfg.ack_timeout * 5, &cfg).is_empty());
    }
}
