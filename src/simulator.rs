//! Fault-injecting UDP relay for exercising the reliability layer.
//!
//! Real networks drop and duplicate datagrams.  To watch retransmission
//! and duplicate detection at work without depending on actual network
//! conditions, [`Relay`] sits between sensors and the collector and applies
//! a configurable fault model to each direction:
//!
//! | Fault            | Description                                          |
//! |------------------|------------------------------------------------------|
//! | Upstream loss    | Drop a sensor → collector datagram (DATA lost).      |
//! | Downstream loss  | Drop a collector → sensor datagram (ACK lost).       |
//! | Duplication      | Deliver a surviving datagram twice.                  |
//!
//! ```text
//!  sensor ──▶ front ─(fault)─▶ back ──▶ collector
//!  sensor ◀── front ◀─(fault)─ back ◀── collector
//! ```
//!
//! ACKs are routed to the sensor address the relay heard from most
//! recently, so one relay serves one sensor at a time.  A seed makes runs
//! reproducible.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;

use crate::config::clamp_probability;
use crate::socket::{Socket, SocketError};

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone, Default)]
pub struct SimulatorConfig {
    /// Probability that a sensor → collector datagram is dropped.
    pub upstream_loss: f64,
    /// Probability that a collector → sensor datagram is dropped.
    pub downstream_loss: f64,
    /// Probability that a datagram that survived is delivered twice.
    pub duplicate_rate: f64,
    /// RNG seed; `None` picks one at random.
    pub seed: Option<u64>,
}

/// Which way a datagram is travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upstream,
    Downstream,
}

/// Counters reported when the relay stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub forwarded: u64,
    pub dropped: u64,
    pub duplicated: u64,
}

/// Decides the fate of each datagram.
#[derive(Debug)]
pub struct FaultModel {
    config: SimulatorConfig,
    rng: StdRng,
}

impl FaultModel {
    pub fn new(config: SimulatorConfig) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// How many copies of the next datagram to deliver (0, 1 or 2).
    pub fn copies(&mut self, direction: Direction) -> usize {
        let loss = match direction {
            Direction::Upstream => self.config.upstream_loss,
            Direction::Downstream => self.config.downstream_loss,
        };
        if self.rng.random_bool(clamp_probability(loss)) {
            return 0;
        }
        if self.rng.random_bool(clamp_probability(self.config.duplicate_rate)) {
            2
        } else {
            1
        }
    }
}

/// A lossy relay between sensors and a collector.
#[derive(Debug)]
pub struct Relay {
    front: Socket,
    back: Socket,
    upstream: SocketAddr,
    model: FaultModel,
    sensor: Option<SocketAddr>,
    stats: RelayStats,
}

impl Relay {
    /// Listen for sensors on `listen` and forward to the collector at `upstream`.
    pub async fn bind(
        listen: SocketAddr,
        upstream: SocketAddr,
        config: SimulatorConfig,
    ) -> Result<Self, SocketError> {
        let front = Socket::bind(listen).await?;
        let any: IpAddr = match upstream {
            SocketAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
            SocketAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
        };
        let back = Socket::bind(SocketAddr::new(any, 0)).await?;
        Ok(Self {
            front,
            back,
            upstream,
            model: FaultModel::new(config),
            sensor: None,
            stats: RelayStats::default(),
        })
    }

    /// Address sensors should send to.
    pub fn local_addr(&self) -> SocketAddr {
        self.front.local_addr
    }

    /// Relay traffic until `shutdown` reads `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<RelayStats, SocketError> {
        log::info!(
            "[relay] {} ⇄ {} ({:?})",
            self.front.local_addr,
            self.upstream,
            self.model.config
        );
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                result = self.front.recv_raw() => {
                    let (bytes, from) = result?;
                    self.sensor = Some(from);
                    let copies = self.model.copies(Direction::Upstream);
                    self.forward(&bytes, copies, Direction::Upstream).await?;
                }
                result = self.back.recv_raw() => {
                    let (bytes, from) = result?;
                    if from == self.upstream {
                        let copies = self.model.copies(Direction::Downstream);
                        self.forward(&bytes, copies, Direction::Downstream).await?;
                    }
                }
            }
        }
        log::info!(
            "[relay] stopped: forwarded={} dropped={} duplicated={}",
            self.stats.forwarded,
            self.stats.dropped,
            self.stats.duplicated
        );
        Ok(self.stats)
    }

    async fn forward(&mut self, bytes: &[u8], copies: usize, direction: Direction) -> Result<(), SocketError> {
        let (socket, dest) = match direction {
            Direction::Upstream => (&self.back, self.upstream),
            Direction::Downstream => match self.sensor {
                Some(sensor) => (&self.front, sensor),
                None => return Ok(()),
            },
        };
        if copies == 0 {
            self.stats.dropped += 1;
            log::debug!("[relay] dropped {:?} datagram ({} bytes)", direction, bytes.len());
            return Ok(());
        }
        for _ in 0..copies {
            socket.send_raw(bytes, dest).await?;
        }
        self.stats.forwarded += 1;
        if copies > 1 {
            self.stats.duplicated += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(upstream_loss: f64, downstream_loss: f64, duplicate_rate: f64) -> FaultModel {
        FaultModel::new(SimulatorConfig {
            upstream_loss,
            downstream_loss,
            duplicate_rate,
            seed: Some(42),
        })
    }

    #[test]
    fn default_is_transparent() {
        let mut m = FaultModel::new(SimulatorConfig::default());
        for _ in 0..100 {
            assert_eq!(m.copies(Direction::Upstream), 1);
            assert_eq!(m.copies(Direction::Downstream), 1);
        }
    }

    #[test]
    fn loss_applies_per_direction() {
        let mut m = model(0.0, 1.0, 0.0);
        assert_eq!(m.copies(Direction::Upstream), 1);
        assert_eq!(m.copies(Direction::Downstream), 0);
    }

    #[test]
    fn full_duplication() {
        let mut m = model(0.0, 0.0, 1.0);
        assert_eq!(m.copies(Direction::Upstream), 2);
    }

    #[test]
    fn nan_rates_never_fire() {
        let mut m = model(f64::NAN, f64::NAN, f64::NAN);
        for _ in 0..20 {
            assert_eq!(m.copies(Direction::Upstream), 1);
            assert_eq!(m.copies(Direction::Downstream), 1);
        }
    }

    #[test]
    fn seeded_models_agree() {
        let mut a = model(0.3, 0.3, 0.3);
        let mut b = model(0.3, 0.3, 0.3);
        for _ in 0..50 {
            assert_eq!(a.copies(Direction::Upstream), b.copies(Direction::Upstream));
        }
    }
}
