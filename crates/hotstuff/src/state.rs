//! The HotStuff state machine.

use crate::messages::{HsMessage, HsPhase, HsProposal, QuorumCertificate};
use latticebft_core::{ConsensusProcess, Outbound, StepOutput, TimerArm, TimerTag};
use latticebft_types::{supermajority, SimTime, ValidatorId, View};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, trace};

/// Phases a replica moves through within one view.
const STATE_NAMES: &[&str] = &["NEW_VIEW", "PREPARE", "PRE_COMMIT", "COMMIT", "DECIDE"];

/// HotStuff consensus configuration.
#[derive(Debug, Clone, Copy)]
pub struct HotStuffConfig {
    /// Total replica count `N`.
    pub num_validators: usize,
    /// Base view timeout; doubles per consecutive timed-out view.
    pub base_time_limit: f64,
}

/// HotStuff state machine for one replica.
///
/// The replica doubles as leader when `view mod N` equals its id; leader
/// tallies live alongside replica state and reset on view entry.
#[derive(Debug)]
pub struct HotStuffState {
    id: ValidatorId,
    config: HotStuffConfig,

    view: View,
    phase_label: &'static str,

    /// Highest prepare-phase certificate this replica has adopted.
    prepare_qc: Option<QuorumCertificate>,
    /// Certificate this replica is locked on.
    locked_qc: Option<QuorumCertificate>,

    // ─── Leader tallies for the current view ───
    new_views: BTreeMap<ValidatorId, Option<QuorumCertificate>>,
    votes: BTreeMap<(HsPhase, u64), BTreeSet<ValidatorId>>,
    /// Phases whose certificate has already been broadcast this view.
    qc_sent: BTreeSet<HsPhase>,
    proposal_sent: bool,

    /// The proposal accepted in the current view.
    current_proposal: Option<HsProposal>,
    /// Every proposal seen, for the extends-walk.
    known: HashMap<u64, HsProposal>,

    /// Messages for future views, replayed on view entry.
    future: BTreeMap<View, Vec<(ValidatorId, HsMessage)>>,

    /// Views timed out since the last decide; the timeout exponent.
    consecutive_timeouts: u32,
    decided: u64,
    decided_values: Vec<u64>,
    tag: TimerTag,
}

impl HotStuffState {
    pub fn new(id: ValidatorId, config: HotStuffConfig) -> Self {
        Self {
            id,
            config,
            view: View(0),
            phase_label: "NEW_VIEW",
            prepare_qc: None,
            locked_qc: None,
            new_views: BTreeMap::new(),
            votes: BTreeMap::new(),
            qc_sent: BTreeSet::new(),
            proposal_sent: false,
            current_proposal: None,
            known: HashMap::new(),
            future: BTreeMap::new(),
            consecutive_timeouts: 0,
            decided: 0,
            decided_values: Vec::new(),
            tag: TimerTag::default(),
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    /// Command digests executed so far, in decision order.
    pub fn decided_values(&self) -> &[u64] {
        &self.decided_values
    }

    fn leader_of(&self, view: View) -> ValidatorId {
        ValidatorId((view.0 % self.config.num_validators as u64) as u32)
    }

    fn supermajority(&self) -> usize {
        supermajority(self.config.num_validators)
    }

    /// Enter the current view: reset leader tallies, send `NEW_VIEW` to the
    /// view's leader (the leader's copy loops back through the fabric),
    /// and arm the view timer.
    fn enter_view(&mut self, out: &mut StepOutput<HsMessage>) {
        self.new_views.clear();
        self.votes.clear();
        self.qc_sent.clear();
        self.proposal_sent = false;
        self.current_proposal = None;
        self.phase_label = "NEW_VIEW";

        let tag = self.tag.bump();
        // Exponent counts consecutive timed-out views since the last
        // decide, so steady-state views keep the base timeout.
        let exponent = self.consecutive_timeouts.min(60) as i32;
        out.timer = Some(TimerArm {
            delay: self.config.base_time_limit * 2f64.powi(exponent),
            tag,
        });

        out.outbound.push(Outbound::Unicast(
            self.leader_of(self.view),
            HsMessage::NewView {
                view: self.view,
                justify: self.prepare_qc,
            },
        ));

        self.replay_buffered(out);
    }

    fn handle(
        &mut self,
        now: SimTime,
        from: ValidatorId,
        message: HsMessage,
        out: &mut StepOutput<HsMessage>,
    ) {
        match message.view().cmp(&self.view) {
            Ordering::Less => {
                trace!(replica = %self.id, %from, msg = %message, "past view, dropped");
                return;
            }
            Ordering::Greater => {
                self.future
                    .entry(message.view())
                    .or_default()
                    .push((from, message));
                return;
            }
            Ordering::Equal => {}
        }

        match message {
            HsMessage::NewView { justify, .. } => self.on_new_view(from, justify, out),
            HsMessage::Prepare {
                proposal, high_qc, ..
            } => self.on_prepare(from, proposal, high_qc, out),
            HsMessage::Vote { phase, node, .. } => self.on_vote(from, phase, node, out),
            HsMessage::PreCommit { qc, .. } => self.on_precommit(from, qc, out),
            HsMessage::Commit { qc, .. } => self.on_commit(from, qc, out),
            HsMessage::Decide { qc, .. } => self.on_decide(now, from, qc, out),
        }
    }

    fn on_new_view(
        &mut self,
        from: ValidatorId,
        justify: Option<QuorumCertificate>,
        out: &mut StepOutput<HsMessage>,
    ) {
        if self.leader_of(self.view) != self.id {
            return;
        }
        self.new_views.insert(from, justify);
        if self.proposal_sent || self.new_views.len() < self.supermajority() {
            return;
        }

        // Propose on top of the highest prepareQC reported.
        let high_qc = self
            .new_views
            .values()
            .filter_map(|qc| *qc)
            .max_by_key(|qc| qc.view);
        let proposal = HsProposal {
            view: self.view,
            parent: high_qc.map(|qc| qc.node).unwrap_or(0),
            value: proposal_command(self.view, self.id),
        };
        self.known.insert(proposal.digest(), proposal);
        self.proposal_sent = true;
        trace!(leader = %self.id, view = %self.view,
               digest = format_args!("{:#x}", proposal.digest()), "proposing");
        out.outbound.push(Outbound::Broadcast(HsMessage::Prepare {
            view: self.view,
            proposal,
            high_qc,
        }));
    }

    fn on_prepare(
        &mut self,
        from: ValidatorId,
        proposal: HsProposal,
        high_qc: Option<QuorumCertificate>,
        out: &mut StepOutput<HsMessage>,
    ) {
        if from != self.leader_of(self.view) || self.current_proposal.is_some() {
            return;
        }
        self.known.insert(proposal.digest(), proposal);

        if !self.safe_node(&proposal, high_qc) {
            trace!(replica = %self.id, view = %self.view, "unsafe proposal, not voting");
            return;
        }

        self.current_proposal = Some(proposal);
        self.phase_label = "PREPARE";
        out.outbound.push(Outbound::Unicast(
            self.leader_of(self.view),
            HsMessage::Vote {
                phase: HsPhase::Prepare,
                view: self.view,
                node: proposal.digest(),
            },
        ));
    }

    /// The HotStuff voting rule: accept a proposal that extends the locked
    /// node, or whose justification is newer than the lock.
    fn safe_node(&self, proposal: &HsProposal, high_qc: Option<QuorumCertificate>) -> bool {
        let Some(locked) = self.locked_qc else {
            return true;
        };
        if self.extends(proposal, locked.node) {
            return true;
        }
        high_qc.map(|qc| qc.view > locked.view).unwrap_or(false)
    }

    /// Walk the parent chain from `proposal` looking for `ancestor`.
    fn extends(&self, proposal: &HsProposal, ancestor: u64) -> bool {
        if proposal.digest() == ancestor {
            return true;
        }
        let mut parent = proposal.parent;
        for _ in 0..=self.known.len() {
            if parent == ancestor {
                return true;
            }
            match self.known.get(&parent) {
                Some(node) => parent = node.parent,
                None => return false,
            }
        }
        false
    }

    fn on_vote(
        &mut self,
        from: ValidatorId,
        phase: HsPhase,
        node: u64,
        out: &mut StepOutput<HsMessage>,
    ) {
        if self.leader_of(self.view) != self.id {
            return;
        }
        let threshold = self.supermajority();
        let senders = self.votes.entry((phase, node)).or_default();
        senders.insert(from);
        if senders.len() < threshold || self.qc_sent.contains(&phase) {
            return;
        }
        self.qc_sent.insert(phase);

        let qc = QuorumCertificate {
            phase,
            view: self.view,
            node,
        };
        let next = match phase {
            HsPhase::Prepare => HsMessage::PreCommit { view: self.view, qc },
            HsPhase::PreCommit => HsMessage::Commit { view: self.view, qc },
            HsPhase::Commit => HsMessage::Decide { view: self.view, qc },
        };
        trace!(leader = %self.id, view = %self.view, %phase, "quorum, advancing phase");
        out.outbound.push(Outbound::Broadcast(next));
    }

    fn on_precommit(
        &mut self,
        from: ValidatorId,
        qc: QuorumCertificate,
        out: &mut StepOutput<HsMessage>,
    ) {
        if from != self.leader_of(self.view) || qc.view != self.view {
            return;
        }
        self.prepare_qc = Some(qc);
        self.phase_label = "PRE_COMMIT";
        out.outbound.push(Outbound::Unicast(
            self.leader_of(self.view),
            HsMessage::Vote {
                phase: HsPhase::PreCommit,
                view: self.view,
                node: qc.node,
            },
        ));
    }

    fn on_commit(
        &mut self,
        from: ValidatorId,
        qc: QuorumCertificate,
        out: &mut StepOutput<HsMessage>,
    ) {
        if from != self.leader_of(self.view) || qc.view != self.view {
            return;
        }
        self.locked_qc = Some(qc);
        self.phase_label = "COMMIT";
        out.outbound.push(Outbound::Unicast(
            self.leader_of(self.view),
            HsMessage::Vote {
                phase: HsPhase::Commit,
                view: self.view,
                node: qc.node,
            },
        ));
    }

    fn on_decide(
        &mut self,
        _now: SimTime,
        from: ValidatorId,
        qc: QuorumCertificate,
        out: &mut StepOutput<HsMessage>,
    ) {
        if from != self.leader_of(self.view) || qc.view != self.view {
            return;
        }

        let value = self
            .known
            .get(&qc.node)
            .map(|proposal| proposal.value)
            .unwrap_or(qc.node);
        self.decided += 1;
        self.decided_values.push(value);
        self.phase_label = "DECIDE";
        debug!(replica = %self.id, view = %self.view,
               value = format_args!("{value:#x}"), count = self.decided, "executed");

        self.consecutive_timeouts = 0;
        self.view = self.view.next();
        self.enter_view(out);
    }

    fn replay_buffered(&mut self, out: &mut StepOutput<HsMessage>) {
        if let Some(buffered) = self.future.remove(&self.view) {
            for (from, message) in buffered {
                self.handle(SimTime::ZERO, from, message, out);
            }
        }
    }
}

impl ConsensusProcess for HotStuffState {
    type Message = HsMessage;

    fn state_names() -> &'static [&'static str] {
        STATE_NAMES
    }

    fn start(&mut self, _now: SimTime) -> StepOutput<HsMessage> {
        let mut out = StepOutput::empty();
        self.enter_view(&mut out);
        out
    }

    fn deliver(
        &mut self,
        now: SimTime,
        from: ValidatorId,
        message: HsMessage,
    ) -> StepOutput<HsMessage> {
        let mut out = StepOutput::empty();
        self.handle(now, from, message, &mut out);
        out
    }

    fn on_timer(&mut self, _now: SimTime, tag: TimerTag) -> StepOutput<HsMessage> {
        let mut out = StepOutput::empty();
        if tag != self.tag {
            trace!(replica = %self.id, stale = tag.0, current = self.tag.0, "stale timer");
            return out;
        }

        self.consecutive_timeouts += 1;
        debug!(replica = %self.id, timed_out = %self.view,
               consecutive = self.consecutive_timeouts, "view timed out");
        self.view = self.view.next();
        self.enter_view(&mut out);
        out
    }

    fn timer_tag(&self) -> TimerTag {
        self.tag
    }

    fn state_name(&self) -> &'static str {
        self.phase_label
    }

    fn consensus_count(&self) -> u64 {
        self.decided
    }
}

/// Deterministic command digest proposed by `leader` in `view`.
fn proposal_command(view: View, leader: ValidatorId) -> u64 {
    let mut x = view
        .0
        .wrapping_mul(0xd6e8_feb8_6659_fd93)
        ^ u64::from(leader.0).wrapping_mul(0xa0761d6478bd642f);
    x ^= x >> 32;
    x = x.wrapping_mul(0xd6e8_feb8_6659_fd93);
    x ^ (x >> 29)
}
