//! Retransmit and polling timer parameters.
//!
//! The reliability layer uses a fixed acknowledgement timeout rather than
//! an adaptive RTO: telemetry volume is low and every frame is independent,
//! so there is no RTT estimate worth maintaining.
//!
//! - The sender's reconciler wakes every [`TimerConfig::sweep_interval`]
//!   and retransmits any pending frame older than
//!   [`TimerConfig::ack_timeout`], at most [`TimerConfig::max_retries`]
//!   times.
//! - The collector bounds each receive by [`TimerConfig::recv_poll`], which
//!   is also the worst-case latency for noticing a shutdown request.

use std::time::{Duration, Instant};

/// Adjustable timeout parameters shared by both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    /// How long a DATA frame may wait for its ACK before being resent.
    pub ack_timeout: Duration,
    /// Retransmissions allowed after the first send before giving up.
    pub max_retries: u32,
    /// Period of the sender's timeout sweep.
    pub sweep_interval: Duration,
    /// Upper bound on a single blocking receive.
    pub recv_poll: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(1),
            max_retries: 3,
            sweep_interval: Duration::from_millis(100),
            recv_poll: Duration::from_millis(500),
        }
    }
}

impl TimerConfig {
    /// `true` once a frame sent at `sent_at` has waited a full ack timeout.
    pub fn is_expired(&self, sent_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(sent_at) >= self.ack_timeout
    }
}
