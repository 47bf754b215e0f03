//! Synthetic sensor readings.
//!
//! Stands in for real hardware: each tick yields a handful of
//! `temp=..,hum=..` strings.  The reliability layer treats them as opaque
//! text.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::clamp_probability;

#[derive(Debug, Clone)]
pub struct ReadingSource<R = StdRng> {
    rng: R,
    max_readings: usize,
}

impl ReadingSource<StdRng> {
    /// Randomly seeded source yielding 1..=`max_readings` readings per batch.
    pub fn new(max_readings: usize) -> Self {
        Self::seeded(rand::random(), max_readings)
    }

    /// Reproducible source for tests and simulations.
    pub fn seeded(seed: u64, max_readings: usize) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), max_readings)
    }
}

impl<R: Rng> ReadingSource<R> {
    pub fn with_rng(rng: R, max_readings: usize) -> Self {
        Self {
            rng,
            max_readings: max_readings.max(1),
        }
    }

    /// One reading: temperature in [20, 30) °C, humidity in [40, 60) %.
    pub fn reading(&mut self) -> String {
        let temp: f64 = self.rng.random_range(20.0..30.0);
        let hum: f64 = self.rng.random_range(40.0..60.0);
        format!("temp={temp:.2},hum={hum:.2}")
    }

    pub fn next_batch(&mut self) -> Vec<String> {
        let count = self.rng.random_range(1..=self.max_readings);
        (0..count).map(|_| self.reading()).collect()
    }

    /// Coin flip with probability `p` (clamped to [0, 1], NaN never hits).
    pub fn chance(&mut self, p: f64) -> bool {
        self.rng.random_bool(clamp_probability(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_within_bounds() {
        let mut source = ReadingSource::seeded(7, 3);
        for _ in 0..200 {
            let n = source.next_batch().len();
            assert!((1..=3).contains(&n), "got {n} readings");
        }
    }

    #[test]
    fn reading_format() {
        let mut source = ReadingSource::seeded(1, 1);
        let reading = source.reading();
        let (temp, hum) = reading.split_once(',').unwrap();
        let temp: f64 = temp.strip_prefix("temp=").unwrap().parse().unwrap();
        let hum: f64 = hum.strip_prefix("hum=").unwrap().parse().unwrap();
        assert!((20.0..=30.0).contains(&temp));
        assert!((40.0..=60.0).contains(&hum));
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = ReadingSource::seeded(99, 3);
        let mut b = ReadingSource::seeded(99, 3);
        assert_eq!(a.next_batch(), b.next_batch());
    }

    #[test]
    fn chance_extremes() {
        let mut source = ReadingSource::seeded(3, 1);
        assert!(source.chance(1.0));
        assert!(!source.chance(0.0));
        assert!(source.chance(7.5)); // clamped
        assert!(!source.chance(f64::NAN));
    }

    #[test]
    fn zero_max_still_yields_one() {
        let mut source = ReadingSource::seeded(3, 0);
        assert_eq!(source.next_batch().len(), 1);
    }
}
