//! Network condition simulation for testing

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Network condition simulator
///
/// Decisions come from a private RNG so a seeded simulator replays the same
/// losses and reorders on every run.
#[derive(Clone, Debug)]
pub struct NetworkSimulator {
    /// Packet loss probability (0.0 to 1.0)
    pub loss_rate: f64,
    /// Jitter range (max delay added)
    pub jitter_ms: u32,
    /// Base delay added to all packets
    pub delay_ms: u32,
    /// Probability of swapping a packet with the one after it
    pub reorder_rate: f64,
    rng: StdRng,
}

impl NetworkSimulator {
    fn with_rates(loss_rate: f64, jitter_ms: u32, delay_ms: u32, reorder_rate: f64) -> Self {
        Self {
            loss_rate,
            jitter_ms,
            delay_ms,
            reorder_rate,
            rng: StdRng::from_entropy(),
        }
    }

    /// Perfect network (no issues)
    #[must_use]
    pub fn perfect() -> Self {
        Self::with_rates(0.0, 0, 0, 0.0)
    }

    /// Good `WiFi` conditions
    #[must_use]
    pub fn good_wifi() -> Self {
        Self::with_rates(0.001, 5, 2, 0.001)
    }

    /// Poor `WiFi` conditions
    #[must_use]
    pub fn poor_wifi() -> Self {
        Self::with_rates(0.05, 50, 30, 0.05)
    }

    /// Loss and reordering without added delay
    #[must_use]
    pub fn lossy(loss_rate: f64, reorder_rate: f64) -> Self {
        Self::with_rates(loss_rate, 0, 0, reorder_rate)
    }

    /// Replace the RNG with one seeded from `seed`
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Should this packet be dropped?
    pub fn should_drop(&mut self) -> bool {
        if self.loss_rate <= 0.0 {
            return false;
        }
        self.rng.gen_bool(self.loss_rate)
    }

    /// Get delay for this packet
    pub fn get_delay(&mut self) -> Duration {
        let jitter: u32 = if self.jitter_ms > 0 {
            self.rng.gen_range(0..self.jitter_ms)
        } else {
            0
        };

        Duration::from_millis(u64::from(self.delay_ms + jitter))
    }

    /// Should this packet be reordered?
    pub fn should_reorder(&mut self) -> bool {
        if self.reorder_rate <= 0.0 {
            return false;
        }
        self.rng.gen_bool(self.reorder_rate)
    }

    /// Apply loss, then reordering, to a batch of packets in send order
    ///
    /// Returns the packets in the order they arrive. A reordered packet swaps
    /// places with its successor; a swapped pair is not reordered again.
    pub fn schedule<T>(&mut self, packets: Vec<T>) -> Vec<T> {
        let mut delivered: Vec<T> = packets
            .into_iter()
            .filter(|_| !self.should_drop())
            .collect();

        let mut i = 0;
        while i + 1 < delivered.len() {
            if self.should_reorder() {
                delivered.swap(i, i + 1);
                i += 2;
            } else {
                i += 1;
            }
        }
        delivered
    }
}
