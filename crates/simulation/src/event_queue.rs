//! Event queue with deterministic ordering.

use latticebft_core::Event;
use latticebft_types::SimTime;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Key for ordering events in the queue.
///
/// Events are ordered by:
/// 1. Time (earlier first)
/// 2. Insertion sequence (FIFO at equal timestamps)
///
/// The sequence tie-break is what makes runs reproducible: two events due
/// at the same instant always dispatch in the order they were scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventKey {
    /// When this event dispatches.
    pub time: SimTime,
    /// Monotonic insertion counter.
    pub sequence: u64,
}

impl Ord for EventKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.time.cmp(&other.time) {
            Ordering::Equal => self.sequence.cmp(&other.sequence),
            ord => ord,
        }
    }
}

impl PartialOrd for EventKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-first event queue over a `BTreeMap`.
#[derive(Debug)]
pub struct EventQueue<M> {
    events: BTreeMap<EventKey, Event<M>>,
    sequence: u64,
}

impl<M> EventQueue<M> {
    pub fn new() -> Self {
        Self {
            events: BTreeMap::new(),
            sequence: 0,
        }
    }

    /// Insert an event keyed by its time and the next sequence number.
    pub fn schedule(&mut self, event: Event<M>) -> EventKey {
        self.sequence += 1;
        let key = EventKey {
            time: event.time(),
            sequence: self.sequence,
        };
        self.events.insert(key, event);
        key
    }

    /// Remove and return the earliest event.
    pub fn pop_first(&mut self) -> Option<(EventKey, Event<M>)> {
        self.events.pop_first()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl<M> Default for EventQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latticebft_types::NodeId;

    #[test]
    fn earlier_time_dispatches_first() {
        let earlier = EventKey {
            time: SimTime::from_secs(1.0),
            sequence: 9,
        };
        let later = EventKey {
            time: SimTime::from_secs(2.0),
            sequence: 1,
        };
        assert!(earlier < later);
    }

    #[test]
    fn equal_times_dispatch_in_insertion_order() {
        let first = EventKey {
            time: SimTime::from_secs(1.0),
            sequence: 1,
        };
        let second = EventKey {
            time: SimTime::from_secs(1.0),
            sequence: 2,
        };
        assert!(first < second);
    }

    #[test]
    fn queue_pops_in_key_order() {
        let mut queue: EventQueue<u64> = EventQueue::new();
        queue.schedule(Event::PollQueue {
            time: SimTime::from_secs(2.0),
            node: NodeId(0),
        });
        queue.schedule(Event::PollQueue {
            time: SimTime::from_secs(1.0),
            node: NodeId(1),
        });
        queue.schedule(Event::PollQueue {
            time: SimTime::from_secs(1.0),
            node: NodeId(2),
        });

        let (_, first) = queue.pop_first().expect("three events");
        let (_, second) = queue.pop_first().expect("two events");
        let (_, third) = queue.pop_first().expect("one event");
        assert_eq!(first.node(), NodeId(1), "earliest time first");
        assert_eq!(second.node(), NodeId(2), "FIFO at equal times");
        assert_eq!(third.node(), NodeId(0));
        assert!(queue.is_empty());
    }
}
