//! Core types for the LatticeBFT simulator.
//!
//! This crate provides the foundational types used throughout the
//! simulation:
//!
//! - **Time**: [`SimTime`], the simulated clock
//! - **Identifiers**: [`NodeId`], [`ValidatorId`], [`Height`], [`View`]
//! - **Messaging**: [`Payload`], the in-flight message wrapper
//! - **Quorum arithmetic**: [`max_faulty`], [`quorum`], [`supermajority`]
//!
//! # Design Philosophy
//!
//! This crate is self-contained with no dependencies. It does not depend on
//! any other workspace crates, making it the foundation layer.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Add;

/// A point on the simulated clock, in seconds.
///
/// Simulated time is continuous (service times are exponential draws), so
/// the representation is `f64`. Ordering goes through [`f64::total_cmp`],
/// which is a total order; times are never NaN by construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimTime(f64);

impl SimTime {
    /// The start of the simulation.
    pub const ZERO: SimTime = SimTime(0.0);

    /// Create a time from seconds.
    pub fn from_secs(seconds: f64) -> Self {
        Self(seconds)
    }

    /// Seconds since the start of the simulation.
    pub fn as_secs(self) -> f64 {
        self.0
    }

    /// The time `delta` seconds after this one.
    pub fn after(self, delta: f64) -> Self {
        Self(self.0 + delta)
    }

    /// Elapsed seconds since `earlier`.
    pub fn since(self, earlier: SimTime) -> f64 {
        self.0 - earlier.0
    }
}

impl PartialEq for SimTime {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for SimTime {}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Add<f64> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: f64) -> SimTime {
        SimTime(self.0 + rhs)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

/// Index of a port (endpoint or switch) in the fabric arena.
///
/// All neighbor lists and routing-table entries are `NodeId`s, never owning
/// references; the fabric arena is the single owner of every port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Consensus identity of a validator, in `[0, N)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValidatorId(pub u32);

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Consensus instance number. Instance `h` decides one value; validators
/// advance to `h + 1` after deciding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Height(pub u64);

impl Height {
    /// The next consensus instance.
    pub fn next(self) -> Height {
        Height(self.0 + 1)
    }
}

impl fmt::Display for Height {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// View (round) number within a consensus instance, incremented on timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct View(pub u64);

impl View {
    /// The next view.
    pub fn next(self) -> View {
        View(self.0 + 1)
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view {}", self.0)
    }
}

/// One in-flight message.
///
/// Immutable once created, except `last_hop` which each forwarding port
/// rewrites to itself. Owned by at most one ingress queue at a time.
#[derive(Debug, Clone)]
pub struct Payload<M> {
    /// The carried message.
    pub message: M,
    /// The port that most recently forwarded this payload.
    pub last_hop: NodeId,
    /// The endpoint this payload is ultimately delivered to.
    pub destination: NodeId,
}

impl<M> Payload<M> {
    /// Create a payload originating at `origin` for `destination`.
    pub fn new(message: M, origin: NodeId, destination: NodeId) -> Self {
        Self {
            message,
            last_hop: origin,
            destination,
        }
    }
}

impl<M: fmt::Display> fmt::Display for Payload<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.message, self.destination)
    }
}

/// Maximum number of faulty validators tolerated: `f = (n - 1) / 3`.
pub fn max_faulty(n: usize) -> usize {
    (n.saturating_sub(1)) / 3
}

/// Byzantine quorum: `2f + 1` matching messages.
pub fn quorum(n: usize) -> usize {
    2 * max_faulty(n) + 1
}

/// HotStuff-style supermajority: `n - f` matching votes.
pub fn supermajority(n: usize) -> usize {
    n - max_faulty(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_time_total_order() {
        let a = SimTime::from_secs(1.0);
        let b = SimTime::from_secs(2.0);
        assert!(a < b);
        assert_eq!(a, SimTime::ZERO.after(1.0));
        assert_eq!(b.since(a), 1.0);
    }

    #[test]
    fn sim_time_display_rounds_to_millis() {
        assert_eq!(SimTime::from_secs(1.23456).to_string(), "1.235");
    }

    #[test]
    fn quorum_arithmetic() {
        assert_eq!(max_faulty(4), 1);
        assert_eq!(quorum(4), 3);
        assert_eq!(supermajority(4), 3);

        assert_eq!(max_faulty(7), 2);
        assert_eq!(quorum(7), 5);
        assert_eq!(supermajority(7), 5);

        assert_eq!(max_faulty(10), 3);
        assert_eq!(quorum(10), 7);
        assert_eq!(supermajority(10), 7);
    }
}
