//! Exponential service-time sampling.

use rand::Rng;

/// Exponential service-time distribution for one port.
///
/// Every port holds its own `ExpService`, but all draws consume the single
/// trial-wide uniform stream (passed in by the runner at dispatch), so the
/// seed deterministically fixes the whole run.
#[derive(Debug, Clone, Copy)]
pub struct ExpService {
    rate: f64,
}

impl ExpService {
    /// Sentinel rate meaning zero service time (the port is transparent).
    pub const INSTANT: f64 = -1.0;

    pub fn new(rate: f64) -> Self {
        Self { rate }
    }

    /// Whether this port services payloads in zero time.
    pub fn is_instant(&self) -> bool {
        self.rate <= 0.0
    }

    /// Draw a service time via the inverse CDF: `-ln(1 - u) / rate`.
    ///
    /// The instant sentinel returns exactly `0.0` without consuming the
    /// uniform stream.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        if self.is_instant() {
            return 0.0;
        }
        let u: f64 = rng.gen();
        -(1.0 - u).ln() / self.rate
    }
}
