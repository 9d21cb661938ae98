//! The IBFT state machine.

use crate::messages::{IbftMessage, PreparedCertificate};
use latticebft_core::{ConsensusProcess, Outbound, StepOutput, TimerArm, TimerTag};
use latticebft_types::{quorum, Height, SimTime, ValidatorId, View};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

/// States a validator moves through within one consensus instance.
/// `COMMITTED` is transient: deciding immediately re-enters `NEW_ROUND`
/// at the next instance.
const STATE_NAMES: &[&str] = &[
    "NEW_ROUND",
    "PREPREPARED",
    "PREPARED",
    "ROUND_CHANGE",
    "COMMITTED",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NewRound,
    Preprepared,
    Prepared,
    RoundChange,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::NewRound => "NEW_ROUND",
            Phase::Preprepared => "PREPREPARED",
            Phase::Prepared => "PREPARED",
            Phase::RoundChange => "ROUND_CHANGE",
        }
    }
}

/// IBFT consensus configuration.
#[derive(Debug, Clone, Copy)]
pub struct IbftConfig {
    /// Total validator count `N`.
    pub num_validators: usize,
    /// Round-0 timeout; view `v` times out after `base_time_limit * 2^v`.
    pub base_time_limit: f64,
}

/// IBFT consensus state machine for one validator.
///
/// Pure state: all I/O (message transport, timers, the clock) belongs to
/// the simulation runner driving it.
#[derive(Debug)]
pub struct IbftState {
    id: ValidatorId,
    config: IbftConfig,

    phase: Phase,
    height: Height,
    view: View,

    /// Digest accepted from the current round's PREPREPARE.
    accepted: Option<u64>,
    /// Prepare tally for the current `(height, view)`: digest -> senders.
    /// Sender sets make duplicate messages idempotent.
    prepares: BTreeMap<u64, BTreeSet<ValidatorId>>,
    /// Commit tally for the current `(height, view)`.
    commits: BTreeMap<u64, BTreeSet<ValidatorId>>,
    /// Latest round-change target per sender for the current height.
    round_changes: BTreeMap<ValidatorId, (View, Option<PreparedCertificate>)>,
    /// Highest view this validator has requested via ROUND_CHANGE.
    round_change_target: Option<View>,
    /// Certificate for the value this validator prepared, if any.
    prepared_cert: Option<PreparedCertificate>,

    /// Messages for future instances, replayed on height advance.
    future: BTreeMap<Height, Vec<(ValidatorId, IbftMessage)>>,

    decided: u64,
    decided_values: Vec<u64>,
    tag: TimerTag,
}

impl IbftState {
    pub fn new(id: ValidatorId, config: IbftConfig) -> Self {
        Self {
            id,
            config,
            phase: Phase::NewRound,
            height: Height(0),
            view: View(0),
            accepted: None,
            prepares: BTreeMap::new(),
            commits: BTreeMap::new(),
            round_changes: BTreeMap::new(),
            round_change_target: None,
            prepared_cert: None,
            future: BTreeMap::new(),
            decided: 0,
            decided_values: Vec::new(),
            tag: TimerTag::default(),
        }
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn view(&self) -> View {
        self.view
    }

    /// Digests decided so far, in instance order.
    pub fn decided_values(&self) -> &[u64] {
        &self.decided_values
    }

    fn leader_of(&self, height: Height, view: View) -> ValidatorId {
        ValidatorId(((height.0 + view.0) % self.config.num_validators as u64) as u32)
    }

    fn quorum(&self) -> usize {
        quorum(self.config.num_validators)
    }

    /// Timeout for a given view: `base * 2^v`, exponent clamped so the
    /// delay stays finite.
    fn timeout_for(&self, view: View) -> f64 {
        self.config.base_time_limit * 2f64.powi(view.0.min(60) as i32)
    }

    /// Enter the current `(height, view)` as a fresh round: reset round
    /// tallies, arm the round timer, and propose if leader.
    fn enter_round(&mut self, out: &mut StepOutput<IbftMessage>) {
        self.phase = Phase::NewRound;
        self.accepted = None;
        self.prepares.clear();
        self.commits.clear();
        self.round_change_target = None;
        // Round changes targeting views beyond the one we just entered are
        // still live; the rest are consumed.
        let view = self.view;
        self.round_changes.retain(|_, (target, _)| *target > view);

        let tag = self.tag.bump();
        out.timer = Some(TimerArm {
            delay: self.timeout_for(self.view),
            tag,
        });

        if self.leader_of(self.height, self.view) == self.id {
            let value = self
                .prepared_cert
                .map(|cert| cert.value)
                .unwrap_or_else(|| proposal_value(self.height, self.view, self.id));
            trace!(validator = %self.id, height = %self.height, view = %self.view,
                   value = format_args!("{value:#x}"), "proposing as leader");
            self.accepted = Some(value);
            self.phase = Phase::Preprepared;
            // The leader's PREPREPARE doubles as its PREPARE.
            self.prepares.entry(value).or_default().insert(self.id);
            out.outbound.push(Outbound::Broadcast(IbftMessage::PrePrepare {
                height: self.height,
                view: self.view,
                value,
            }));
        }
    }

    fn handle(
        &mut self,
        now: SimTime,
        from: ValidatorId,
        message: IbftMessage,
        out: &mut StepOutput<IbftMessage>,
    ) {
        match message.height().cmp(&self.height) {
            Ordering::Less => {
                trace!(validator = %self.id, %from, msg = %message, "past instance, dropped");
                return;
            }
            Ordering::Greater => {
                self.future
                    .entry(message.height())
                    .or_default()
                    .push((from, message));
                return;
            }
            Ordering::Equal => {}
        }

        match message {
            IbftMessage::PrePrepare {
                height,
                view,
                value,
            } => self.on_preprepare(now, from, height, view, value, out),
            IbftMessage::Prepare { view, digest, .. } => {
                self.on_prepare(now, from, view, digest, out)
            }
            IbftMessage::Commit { view, digest, .. } => self.on_commit(now, from, view, digest, out),
            IbftMessage::RoundChange {
                target_view,
                prepared,
                ..
            } => self.on_round_change(now, from, target_view, prepared, out),
        }
    }

    fn on_preprepare(
        &mut self,
        _now: SimTime,
        from: ValidatorId,
        height: Height,
        view: View,
        value: u64,
        out: &mut StepOutput<IbftMessage>,
    ) {
        if view != self.view || from != self.leader_of(height, view) {
            trace!(validator = %self.id, %from, "preprepare from wrong view or leader, dropped");
            return;
        }
        if self.phase != Phase::NewRound || self.leader_of(height, view) == self.id {
            // Duplicate, or our own proposal looping back.
            return;
        }

        self.accepted = Some(value);
        self.phase = Phase::Preprepared;
        out.outbound.push(Outbound::Broadcast(IbftMessage::Prepare {
            height: self.height,
            view: self.view,
            digest: value,
        }));
        // Prepares may have arrived ahead of the proposal.
        self.try_prepared(out);
    }

    fn on_prepare(
        &mut self,
        _now: SimTime,
        from: ValidatorId,
        view: View,
        digest: u64,
        out: &mut StepOutput<IbftMessage>,
    ) {
        if view != self.view {
            return;
        }
        self.prepares.entry(digest).or_default().insert(from);
        self.try_prepared(out);
    }

    fn try_prepared(&mut self, out: &mut StepOutput<IbftMessage>) {
        let Some(digest) = self.accepted else {
            return;
        };
        if self.phase != Phase::Preprepared {
            return;
        }
        let count = self.prepares.get(&digest).map(BTreeSet::len).unwrap_or(0);
        if count < self.quorum() {
            return;
        }

        self.phase = Phase::Prepared;
        self.prepared_cert = Some(PreparedCertificate {
            view: self.view,
            value: digest,
        });
        out.outbound.push(Outbound::Broadcast(IbftMessage::Commit {
            height: self.height,
            view: self.view,
            digest,
        }));
        // Commits may already hold a quorum (they tally in any phase).
        self.try_committed(out);
    }

    fn on_commit(
        &mut self,
        _now: SimTime,
        from: ValidatorId,
        view: View,
        digest: u64,
        out: &mut StepOutput<IbftMessage>,
    ) {
        if view != self.view {
            return;
        }
        self.commits.entry(digest).or_default().insert(from);
        self.try_committed(out);
    }

    fn try_committed(&mut self, out: &mut StepOutput<IbftMessage>) {
        let Some(digest) = self.accepted else {
            return;
        };
        if self.phase != Phase::Prepared {
            return;
        }
        let count = self.commits.get(&digest).map(BTreeSet::len).unwrap_or(0);
        if count < self.quorum() {
            return;
        }

        self.decided += 1;
        self.decided_values.push(digest);
        debug!(validator = %self.id, height = %self.height,
               value = format_args!("{digest:#x}"), count = self.decided, "consensus reached");

        self.height = self.height.next();
        self.view = View(0);
        self.prepared_cert = None;
        self.round_changes.clear();
        self.enter_round(out);
        self.replay_buffered(out);
    }

    fn on_round_change(
        &mut self,
        _now: SimTime,
        from: ValidatorId,
        target_view: View,
        prepared: Option<PreparedCertificate>,
        out: &mut StepOutput<IbftMessage>,
    ) {
        let entry = self
            .round_changes
            .entry(from)
            .or_insert((target_view, prepared));
        if target_view >= entry.0 {
            *entry = (target_view, prepared);
        }

        let qualifying: Vec<View> = self
            .round_changes
            .values()
            .map(|(target, _)| *target)
            .filter(|target| *target > self.view)
            .collect();
        if qualifying.len() < self.quorum() {
            return;
        }
        let Some(new_view) = qualifying.iter().copied().min() else {
            return;
        };

        // Adopt the highest prepared certificate among the round changes
        // (and our own) so the new leader re-proposes a possibly-committed
        // value.
        let best = self
            .round_changes
            .values()
            .filter_map(|(_, cert)| *cert)
            .chain(self.prepared_cert)
            .max_by_key(|cert| cert.view);

        debug!(validator = %self.id, height = %self.height, old_view = %self.view,
               new_view = %new_view, "round change quorum");
        self.view = new_view;
        self.prepared_cert = best;
        self.enter_round(out);
    }

    fn replay_buffered(&mut self, out: &mut StepOutput<IbftMessage>) {
        if let Some(buffered) = self.future.remove(&self.height) {
            for (from, message) in buffered {
                self.handle(SimTime::ZERO, from, message, out);
            }
        }
    }
}

impl ConsensusProcess for IbftState {
    type Message = IbftMessage;

    fn state_names() -> &'static [&'static str] {
        STATE_NAMES
    }

    fn start(&mut self, _now: SimTime) -> StepOutput<IbftMessage> {
        let mut out = StepOutput::empty();
        self.enter_round(&mut out);
        out
    }

    fn deliver(
        &mut self,
        now: SimTime,
        from: ValidatorId,
        message: IbftMessage,
    ) -> StepOutput<IbftMessage> {
        let mut out = StepOutput::empty();
        self.handle(now, from, message, &mut out);
        out
    }

    fn on_timer(&mut self, _now: SimTime, tag: TimerTag) -> StepOutput<IbftMessage> {
        let mut out = StepOutput::empty();
        if tag != self.tag {
            trace!(validator = %self.id, stale = tag.0, current = self.tag.0, "stale timer");
            return out;
        }

        let target = self
            .round_change_target
            .map(View::next)
            .unwrap_or_else(|| self.view.next());
        self.round_change_target = Some(target);
        self.phase = Phase::RoundChange;
        debug!(validator = %self.id, height = %self.height, %target, "round timer expired");

        out.outbound
            .push(Outbound::Broadcast(IbftMessage::RoundChange {
                height: self.height,
                target_view: target,
                prepared: self.prepared_cert,
            }));
        // Keep a timer running so an unanswered round change escalates.
        let tag = self.tag.bump();
        out.timer = Some(TimerArm {
            delay: self.timeout_for(target),
            tag,
        });
        out
    }

    fn timer_tag(&self) -> TimerTag {
        self.tag
    }

    fn state_name(&self) -> &'static str {
        self.phase.name()
    }

    fn consensus_count(&self) -> u64 {
        self.decided
    }
}

/// Deterministic 64-bit proposal digest for `(height, view, leader)`.
fn proposal_value(height: Height, view: View, leader: ValidatorId) -> u64 {
    let mut x = height
        .0
        .wrapping_mul(0x9e37_79b9_7f4a_7c15)
        ^ view.0.wrapping_mul(0xbf58_476d_1ce4_e5b9)
        ^ u64::from(leader.0).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: usize = 4;

    fn cluster() -> Vec<IbftState> {
        (0..N as u32)
            .map(|i| {
                IbftState::new(
                    ValidatorId(i),
                    IbftConfig {
                        num_validators: N,
                        base_time_limit: 10_000.0,
                    },
                )
            })
            .collect()
    }

    /// Deliver outbound messages FIFO (broadcasts fan out in id order)
    /// until `done` holds or the network is quiet. Timers never fire.
    fn pump(machines: &mut [IbftState], done: impl Fn(&[IbftState]) -> bool) {
        let mut wire: std::collections::VecDeque<(ValidatorId, ValidatorId, IbftMessage)> =
            std::collections::VecDeque::new();
        for machine in machines.iter_mut() {
            let out = machine.start(SimTime::ZERO);
            enqueue(machine.id, out, &mut wire);
        }
        let mut steps = 0;
        while let Some((from, to, message)) = wire.pop_front() {
            if done(machines) {
                return;
            }
            steps += 1;
            assert!(steps < 100_000, "cluster failed to converge");
            let out = machines[to.0 as usize].deliver(SimTime::ZERO, from, message);
            enqueue(to, out, &mut wire);
        }
    }

    fn enqueue(
        from: ValidatorId,
        out: StepOutput<IbftMessage>,
        wire: &mut std::collections::VecDeque<(ValidatorId, ValidatorId, IbftMessage)>,
    ) {
        for outbound in out.outbound {
            match outbound {
                Outbound::Broadcast(message) => {
                    for to in 0..N as u32 {
                        wire.push_back((from, ValidatorId(to), message.clone()));
                    }
                }
                Outbound::Unicast(to, message) => wire.push_back((from, to, message)),
            }
        }
    }

    #[test]
    fn four_validators_decide_first_instance() {
        let mut machines = cluster();
        pump(&mut machines, |ms| ms.iter().all(|m| m.consensus_count() >= 1));

        for machine in &machines {
            assert!(machine.consensus_count() >= 1);
            assert!(machine.height() >= Height(1));
        }
    }

    #[test]
    fn no_two_validators_decide_different_values() {
        let mut machines = cluster();
        pump(&mut machines, |ms| ms.iter().all(|m| m.consensus_count() >= 3));

        let reference = machines[0].decided_values();
        assert!(reference.len() >= 3);
        for machine in &machines[1..] {
            let len = reference.len().min(machine.decided_values().len());
            assert_eq!(
                &reference[..len],
                &machine.decided_values()[..len],
                "validators decided conflicting values"
            );
        }
    }

    #[test]
    fn duplicate_prepare_is_idempotent() {
        let mut machines = cluster();
        // Validator 1 receives the view-0 leader's proposal.
        let leader_out = machines[0].start(SimTime::ZERO);
        let Outbound::Broadcast(preprepare) = &leader_out.outbound[0] else {
            panic!("leader should broadcast a proposal");
        };
        machines[1].start(SimTime::ZERO);
        machines[1].deliver(SimTime::ZERO, ValidatorId(0), preprepare.clone());

        let prepare = IbftMessage::Prepare {
            height: Height(0),
            view: View(0),
            digest: proposal_value(Height(0), View(0), ValidatorId(0)),
        };
        machines[1].deliver(SimTime::ZERO, ValidatorId(2), prepare.clone());
        let before = machines[1].prepares.clone();
        machines[1].deliver(SimTime::ZERO, ValidatorId(2), prepare);
        assert_eq!(before, machines[1].prepares, "duplicate changed the tally");
    }

    #[test]
    fn stale_timer_has_no_effect() {
        let mut machine = cluster().remove(1);
        let out = machine.start(SimTime::ZERO);
        let live_tag = out.timer.map(|t| t.tag).unwrap_or_default();

        let stale = machine.on_timer(SimTime::ZERO, TimerTag(live_tag.0.wrapping_sub(1)));
        assert!(stale.outbound.is_empty());
        assert!(stale.timer.is_none());
        assert_eq!(machine.state_name(), "NEW_ROUND");
    }

    #[test]
    fn live_timer_broadcasts_round_change() {
        let mut machine = cluster().remove(1);
        let out = machine.start(SimTime::ZERO);
        let live_tag = out.timer.map(|t| t.tag).unwrap_or_default();

        let out = machine.on_timer(SimTime::ZERO, live_tag);
        assert_eq!(machine.state_name(), "ROUND_CHANGE");
        assert!(matches!(
            out.outbound.as_slice(),
            [Outbound::Broadcast(IbftMessage::RoundChange {
                target_view: View(1),
                ..
            })]
        ));
        // Escalation timer doubles.
        let rearm = out.timer.expect("round change should re-arm the timer");
        assert_eq!(rearm.delay, 20_000.0);
    }

    #[test]
    fn round_change_quorum_adopts_minimum_view() {
        let mut machine = cluster().remove(3);
        machine.start(SimTime::ZERO);

        for (from, target) in [(0u32, 3u64), (1, 2), (2, 3)] {
            machine.deliver(
                SimTime::ZERO,
                ValidatorId(from),
                IbftMessage::RoundChange {
                    height: Height(0),
                    target_view: View(target),
                    prepared: None,
                },
            );
        }
        assert_eq!(machine.view(), View(2), "minimum qualifying view wins");
        assert_eq!(machine.state_name(), "NEW_ROUND");
    }

    #[test]
    fn future_instance_messages_are_buffered_and_replayed() {
        let mut machines = cluster();
        // A commit for instance 1 arrives while still at instance 0.
        machines[1].start(SimTime::ZERO);
        machines[1].deliver(
            SimTime::ZERO,
            ValidatorId(2),
            IbftMessage::Commit {
                height: Height(1),
                view: View(0),
                digest: 7,
            },
        );
        assert_eq!(machines[1].future.len(), 1);
        assert_eq!(machines[1].height(), Height(0));
    }
}
