//! The interface between a consensus state machine and the simulation
//! runner.
//!
//! A consensus process is a pure state machine: it receives delivered
//! messages and timer expiries, and returns the messages to send plus an
//! optional timer request. It never touches the clock, the RNG, or the
//! network — those belong to the runner.

use latticebft_types::{SimTime, ValidatorId};
use std::fmt;

/// Version tag for round timers.
///
/// A validator bumps its tag whenever it advances state; an expiry carrying
/// an older tag is stale and must be ignored. This replaces an explicit
/// timer-cancellation primitive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerTag(pub u64);

impl TimerTag {
    /// Advance to the next tag, invalidating all earlier expiries.
    pub fn bump(&mut self) -> TimerTag {
        self.0 += 1;
        *self
    }
}

/// A message leaving a consensus process.
#[derive(Debug, Clone)]
pub enum Outbound<M> {
    /// One copy per validator, in validator-id order (including the
    /// sender; its copy loops back through the fabric).
    Broadcast(M),
    /// A single copy to one validator.
    Unicast(ValidatorId, M),
}

/// Request to arm the round timer.
#[derive(Debug, Clone, Copy)]
pub struct TimerArm {
    /// Seconds from now until expiry.
    pub delay: f64,
    /// Tag the expiry must carry to still be live when it fires.
    pub tag: TimerTag,
}

/// Everything a consensus process produced while handling one input.
#[derive(Debug)]
pub struct StepOutput<M> {
    /// Messages to send.
    pub outbound: Vec<Outbound<M>>,
    /// Timer to arm, if any.
    pub timer: Option<TimerArm>,
}

impl<M> StepOutput<M> {
    /// No messages, no timer.
    pub fn empty() -> Self {
        Self {
            outbound: Vec::new(),
            timer: None,
        }
    }

    /// Append another output's messages; a later timer request wins.
    pub fn merge(&mut self, other: StepOutput<M>) {
        self.outbound.extend(other.outbound);
        if other.timer.is_some() {
            self.timer = other.timer;
        }
    }
}

impl<M> Default for StepOutput<M> {
    fn default() -> Self {
        Self::empty()
    }
}

/// A consensus state machine driven by the simulation runner.
///
/// Protocol-level anomalies (stale views, duplicate votes, messages from
/// the wrong leader) are expected inputs, not errors: implementations
/// ignore them and return an empty output.
pub trait ConsensusProcess {
    /// The protocol's wire message type.
    type Message: Clone + fmt::Debug + fmt::Display;

    /// Names of every state the process can occupy, for statistics.
    fn state_names() -> &'static [&'static str];

    /// Bootstrap: enter the initial round.
    fn start(&mut self, now: SimTime) -> StepOutput<Self::Message>;

    /// A message from `from` was delivered to this validator.
    fn deliver(
        &mut self,
        now: SimTime,
        from: ValidatorId,
        message: Self::Message,
    ) -> StepOutput<Self::Message>;

    /// The round timer fired with the given tag.
    fn on_timer(&mut self, now: SimTime, tag: TimerTag) -> StepOutput<Self::Message>;

    /// The tag a live expiry must carry. The runner drops staler expiries
    /// without touching the process or its statistics.
    fn timer_tag(&self) -> TimerTag;

    /// The state this validator currently occupies.
    fn state_name(&self) -> &'static str;

    /// How many consensus instances this validator has decided.
    fn consensus_count(&self) -> u64;
}
