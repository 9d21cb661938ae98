//! HotStuff wire messages and certificates.

use latticebft_types::View;
use std::fmt;

/// The phase a vote or certificate belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HsPhase {
    Prepare,
    PreCommit,
    Commit,
}

impl fmt::Display for HsPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HsPhase::Prepare => "PREPARE",
            HsPhase::PreCommit => "PRE_COMMIT",
            HsPhase::Commit => "COMMIT",
        };
        f.write_str(name)
    }
}

/// A node in the hash-linked proposal chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HsProposal {
    /// View this proposal was made in.
    pub view: View,
    /// Digest of the parent proposal; `0` extends genesis.
    pub parent: u64,
    /// The proposed command digest.
    pub value: u64,
}

impl HsProposal {
    /// Digest identifying this proposal.
    pub fn digest(&self) -> u64 {
        let mut x = self
            .view
            .0
            .wrapping_mul(0x9e37_79b9_7f4a_7c15)
            ^ self.parent.wrapping_mul(0xbf58_476d_1ce4_e5b9)
            ^ self.value.wrapping_mul(0x94d0_49bb_1331_11eb);
        x ^= x >> 30;
        x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
        x ^= x >> 27;
        x ^ (x >> 31)
    }
}

/// A set of `n - f` matching votes, reduced to the fields that matter for
/// the protocol (messages are trusted by structure).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumCertificate {
    /// Which phase's votes formed this certificate.
    pub phase: HsPhase,
    /// View the votes were cast in.
    pub view: View,
    /// Digest of the certified proposal.
    pub node: u64,
}

/// Messages exchanged by HotStuff replicas.
#[derive(Debug, Clone)]
pub enum HsMessage {
    /// Sent to `leader(view)` on entering a view, carrying the sender's
    /// highest `prepareQC`.
    NewView {
        view: View,
        justify: Option<QuorumCertificate>,
    },

    /// Leader's proposal, justified by the highest `prepareQC` collected.
    Prepare {
        view: View,
        proposal: HsProposal,
        high_qc: Option<QuorumCertificate>,
    },

    /// A replica's phase vote, unicast to the leader.
    Vote {
        phase: HsPhase,
        view: View,
        node: u64,
    },

    /// Leader announces the `prepareQC`; replicas adopt it and vote.
    PreCommit { view: View, qc: QuorumCertificate },

    /// Leader announces the `precommitQC`; replicas lock and vote.
    Commit { view: View, qc: QuorumCertificate },

    /// Leader announces the `commitQC`; replicas execute and advance.
    Decide { view: View, qc: QuorumCertificate },
}

impl HsMessage {
    /// The view this message belongs to.
    pub fn view(&self) -> View {
        match self {
            HsMessage::NewView { view, .. }
            | HsMessage::Prepare { view, .. }
            | HsMessage::Vote { view, .. }
            | HsMessage::PreCommit { view, .. }
            | HsMessage::Commit { view, .. }
            | HsMessage::Decide { view, .. } => *view,
        }
    }
}

impl fmt::Display for HsMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HsMessage::NewView { view, justify } => match justify {
                Some(qc) => write!(f, "NEW_VIEW({view}, prepareQC @ {})", qc.view),
                None => write!(f, "NEW_VIEW({view})"),
            },
            HsMessage::Prepare { view, proposal, .. } => {
                write!(f, "PREPARE({view}, {:#x})", proposal.digest())
            }
            HsMessage::Vote { phase, view, node } => {
                write!(f, "VOTE({phase}, {view}, {node:#x})")
            }
            HsMessage::PreCommit { view, qc } => {
                write!(f, "PRE_COMMIT({view}, {:#x})", qc.node)
            }
            HsMessage::Commit { view, qc } => write!(f, "COMMIT({view}, {:#x})", qc.node),
            HsMessage::Decide { view, qc } => write!(f, "DECIDE({view}, {:#x})", qc.node),
        }
    }
}
