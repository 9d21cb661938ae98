//! Basic HotStuff consensus state machine.
//!
//! One decision per view, four voting phases, leader rotating as
//! `leader(v) = v mod N`. Replicas vote by unicast to the leader; the
//! leader drives each phase by broadcasting the quorum certificate formed
//! from `n - f` votes.

mod messages;
mod state;

pub use messages::{HsMessage, HsPhase, HsProposal, QuorumCertificate};
pub use state::{HotStuffConfig, HotStuffState};
