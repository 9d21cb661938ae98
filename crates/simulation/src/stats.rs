//! Per-validator consensus statistics.

use latticebft_types::SimTime;
use std::collections::BTreeMap;
use std::fmt;

/// Time-in-state accounting for one validator.
///
/// Mutated only by the runner when the owning validator finishes
/// processing an event: the elapsed simulated time since the previous
/// completion is charged to whichever state the validator occupied
/// *during* that interval (its state before any transitions the event
/// caused).
#[derive(Debug, Clone)]
pub struct ConsensusStatistics {
    times: BTreeMap<&'static str, f64>,
    consensus_count: u64,
    last_event_time: SimTime,
}

impl ConsensusStatistics {
    /// Initialize with every state the protocol can occupy, so the final
    /// snapshot lists untouched states at zero.
    pub fn new(states: &'static [&'static str]) -> Self {
        Self {
            times: states.iter().map(|&s| (s, 0.0)).collect(),
            consensus_count: 0,
            last_event_time: SimTime::ZERO,
        }
    }

    /// Charge the interval since the previous completion to `state`, then
    /// advance the completion marker and refresh the consensus count.
    ///
    /// A processing completion is stamped with its end time, so a timer
    /// that fires inside another event's service window carries an earlier
    /// timestamp than the marker; it charges nothing and the marker stays
    /// put (the interval is already accounted for).
    pub fn record(&mut self, state: &'static str, completed_at: SimTime, consensus_count: u64) {
        let elapsed = completed_at.since(self.last_event_time);
        if elapsed > 0.0 {
            *self.times.entry(state).or_insert(0.0) += elapsed;
            self.last_event_time = completed_at;
        }
        self.consensus_count = consensus_count;
    }

    /// Cumulative time spent in `state`.
    pub fn time_in(&self, state: &str) -> f64 {
        self.times.get(state).copied().unwrap_or(0.0)
    }

    /// Sum of all state sojourn times; equals the validator's final
    /// simulated time within floating tolerance.
    pub fn total_time(&self) -> f64 {
        self.times.values().sum()
    }

    /// Simulated time of the validator's last completed event.
    pub fn last_event_time(&self) -> SimTime {
        self.last_event_time
    }

    pub fn consensus_count(&self) -> u64 {
        self.consensus_count
    }

    /// `(state, cumulative_time)` pairs in state-name order.
    pub fn by_state(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        self.times.iter().map(|(&state, &time)| (state, time))
    }
}

impl fmt::Display for ConsensusStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (state, time) in &self.times {
            write!(f, "{state}: {time:.3}, ")?;
        }
        write!(f, "consensus count: {}", self.consensus_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATES: &[&str] = &["A", "B"];

    #[test]
    fn charges_elapsed_time_to_the_occupied_state() {
        let mut stats = ConsensusStatistics::new(STATES);
        stats.record("A", SimTime::from_secs(2.0), 0);
        stats.record("A", SimTime::from_secs(3.0), 0);
        stats.record("B", SimTime::from_secs(7.5), 1);

        assert_eq!(stats.time_in("A"), 3.0);
        assert_eq!(stats.time_in("B"), 4.5);
        assert_eq!(stats.consensus_count(), 1);
    }

    #[test]
    fn total_time_matches_last_event_time() {
        let mut stats = ConsensusStatistics::new(STATES);
        stats.record("A", SimTime::from_secs(1.25), 0);
        stats.record("B", SimTime::from_secs(9.0), 2);

        let total = stats.total_time();
        assert!((total - stats.last_event_time().as_secs()).abs() < 1e-9);
    }

    #[test]
    fn untouched_states_report_zero() {
        let stats = ConsensusStatistics::new(STATES);
        assert_eq!(stats.time_in("A"), 0.0);
        assert_eq!(stats.time_in("B"), 0.0);
        assert_eq!(stats.total_time(), 0.0);
    }
}
