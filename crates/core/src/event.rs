//! Event types for the deterministic simulation.

use crate::TimerTag;
use latticebft_types::{NodeId, Payload, SimTime};

/// All possible events the simulation dispatches.
///
/// Events at distinct times dispatch in time order; events at equal times
/// dispatch in insertion order. The ordering metadata lives in the queue
/// key, not here.
#[derive(Debug, Clone)]
pub enum Event<M> {
    /// A payload arrives at a port's ingress queue.
    QueueMessage {
        time: SimTime,
        node: NodeId,
        payload: Payload<M>,
    },

    /// A port begins servicing one payload. Dispatch draws the service
    /// time `s`, hands the payload to the port, and schedules the produced
    /// payloads plus a `PollQueue` at `time + s`.
    ProcessPayload {
        time: SimTime,
        node: NodeId,
        payload: Payload<M>,
    },

    /// Service completion / re-poll. If the port is idle and its ingress
    /// queue is non-empty, dequeues one payload into a `ProcessPayload` at
    /// the same time; otherwise leaves the port idle.
    PollQueue { time: SimTime, node: NodeId },

    /// A consensus round timer fires. Expiries whose tag is older than the
    /// validator's current tag have no effect.
    TimerExpiry {
        time: SimTime,
        node: NodeId,
        tag: TimerTag,
    },

    /// Per-validator consensus bootstrap: enters the initial round and
    /// emits the initial messages (e.g. the view-0 leader's proposal).
    ProtocolStart { time: SimTime, node: NodeId },
}

impl<M> Event<M> {
    /// When this event is due.
    pub fn time(&self) -> SimTime {
        match self {
            Event::QueueMessage { time, .. }
            | Event::ProcessPayload { time, .. }
            | Event::PollQueue { time, .. }
            | Event::TimerExpiry { time, .. }
            | Event::ProtocolStart { time, .. } => *time,
        }
    }

    /// The port this event is dispatched to.
    pub fn node(&self) -> NodeId {
        match self {
            Event::QueueMessage { node, .. }
            | Event::ProcessPayload { node, .. }
            | Event::PollQueue { node, .. }
            | Event::TimerExpiry { node, .. }
            | Event::ProtocolStart { node, .. } => *node,
        }
    }

    /// The event type name for trace output.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::QueueMessage { .. } => "QueueMessage",
            Event::ProcessPayload { .. } => "ProcessPayload",
            Event::PollQueue { .. } => "PollQueue",
            Event::TimerExpiry { .. } => "TimerExpiry",
            Event::ProtocolStart { .. } => "ProtocolStart",
        }
    }
}
