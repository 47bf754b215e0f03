//! Receive-side sequence classification.
//!
//! [`SequenceTracker`] keeps one [`DeviceSequenceState`] per device id and
//! labels every inbound sequence number as fresh, duplicate, or gapped.  It
//! never reorders or buffers payloads; classification is its only job.
//!
//! # Window
//!
//! Each device remembers the highest sequence number seen plus a bitmap of
//! the [`WINDOW`] numbers just below it.  Memory per device is constant no
//! matter how long the collector runs.
//!
//! ```text
//!        oldest tracked                     highest
//!             │                                │
//!  ───────────┼────────────────────────────────┼──────▶ seq space
//!   duplicate │ <──── bitmap: seen / unseen ──▶│  fresh (gap if > +1)
//! ```
//!
//! A number older than the window cannot be checked and is reported as a
//! duplicate.  Comparisons use 16-bit serial arithmetic: a number up to
//! 32767 ahead of `highest` counts as newer, so the 65535 → 0 wrap is an
//! ordinary step forward.

use std::collections::HashMap;

/// How many sequence numbers below the highest are remembered per device.
pub const WINDOW: usize = 1024;

const WORDS: usize = WINDOW / 64;

/// Half the 16-bit sequence space; distances below this count as "ahead".
const HALF_RANGE: u16 = 0x8000;

/// Verdict for one inbound sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Classification {
    pub duplicate: bool,
    pub gap: bool,
}

/// Sequence history for one device.
#[derive(Debug, Clone)]
pub struct DeviceSequenceState {
    highest: u16,
    /// Bit `i` set ⇔ `highest - i` has been observed.
    seen: [u64; WORDS],
}

impl DeviceSequenceState {
    fn new(first: u16) -> Self {
        let mut state = Self {
            highest: first,
            seen: [0; WORDS],
        };
        state.mark(0);
        state
    }

    /// Highest sequence number observed so far (serial order).
    pub fn highest(&self) -> u16 {
        self.highest
    }

    fn observe(&mut self, seq: u16) -> Classification {
        let ahead = seq.wrapping_sub(self.highest);

        if ahead == 0 {
            return Classification {
                duplicate: true,
                gap: false,
            };
        }

        if ahead < HALF_RANGE {
            self.shift(usize::from(ahead));
            self.highest = seq;
            self.mark(0);
            return Classification {
                duplicate: false,
                gap: ahead > 1,
            };
        }

        // Behind the highest: either a late arrival or a repeat.
        let behind = usize::from(self.highest.wrapping_sub(seq));
        if behind >= WINDOW || self.is_marked(behind) {
            return Classification {
                duplicate: true,
                gap: false,
            };
        }
        self.mark(behind);
        Classification::default()
    }

    fn mark(&mut self, offset: usize) {
        self.seen[offset / 64] |= 1u64 << (offset % 64);
    }

    fn is_marked(&self, offset: usize) -> bool {
        (self.seen[offset / 64] >> (offset % 64)) & 1 == 1
    }

    /// Age every remembered offset by `n`, dropping what falls off the end.
    fn shift(&mut self, n: usize) {
        if n >= WINDOW {
            self.seen = [0; WORDS];
            return;
        }
        let words = n / 64;
        let bits = n % 64;
        // Walk high → low so each source word is read before it is replaced.
        for w in (0..WORDS).rev() {
            let mut v = 0u64;
            if w >= words {
                v = self.seen[w - words] << bits;
                if bits > 0 && w > words {
                    v |= self.seen[w - words - 1] >> (64 - bits);
                }
            }
            self.seen[w] = v;
        }
    }
}

/// Per-device duplicate/gap classifier.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    devices: HashMap<u16, DeviceSequenceState>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `seq` for `device_id` and record it as observed.
    ///
    /// The first number seen from a device is always fresh with no gap.
    pub fn classify(&mut self, device_id: u16, seq: u16) -> Classification {
        match self.devices.get_mut(&device_id) {
            Some(state) => state.observe(seq),
            None => {
                self.devices.insert(device_id, DeviceSequenceState::new(seq));
                Classification::default()
            }
        }
    }

    pub fn device(&self, device_id: u16) -> Option<&DeviceSequenceState> {
        self.devices.get(&device_id)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}
