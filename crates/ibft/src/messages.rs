//! IBFT wire messages.

use latticebft_types::{Height, View};
use std::fmt;

/// Proof that a value reached `2f + 1` prepares in an earlier view.
///
/// Carried in `ROUND_CHANGE` so the next leader re-proposes the value that
/// may already have committed somewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparedCertificate {
    /// View in which the value was prepared.
    pub view: View,
    /// The prepared proposal digest.
    pub value: u64,
}

/// Messages exchanged by IBFT validators. Messages are trusted by
/// structure; there are no signatures.
#[derive(Debug, Clone)]
pub enum IbftMessage {
    /// Leader's proposal for `(height, view)`.
    PrePrepare {
        height: Height,
        view: View,
        value: u64,
    },

    /// Echo of the proposal digest.
    Prepare {
        height: Height,
        view: View,
        digest: u64,
    },

    /// Commit vote for the prepared digest.
    Commit {
        height: Height,
        view: View,
        digest: u64,
    },

    /// Request to move to `target_view`, carrying the highest prepared
    /// certificate the sender holds, if any.
    RoundChange {
        height: Height,
        target_view: View,
        prepared: Option<PreparedCertificate>,
    },
}

impl IbftMessage {
    /// The consensus instance this message belongs to.
    pub fn height(&self) -> Height {
        match self {
            IbftMessage::PrePrepare { height, .. }
            | IbftMessage::Prepare { height, .. }
            | IbftMessage::Commit { height, .. }
            | IbftMessage::RoundChange { height, .. } => *height,
        }
    }
}

impl fmt::Display for IbftMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IbftMessage::PrePrepare {
                height,
                view,
                value,
            } => {
                write!(f, "PREPREPARE({height}, {view}, {value:#x})")
            }
            IbftMessage::Prepare {
                height,
                view,
                digest,
            } => {
                write!(f, "PREPARE({height}, {view}, {digest:#x})")
            }
            IbftMessage::Commit {
                height,
                view,
                digest,
            } => {
                write!(f, "COMMIT({height}, {view}, {digest:#x})")
            }
            IbftMessage::RoundChange {
                height,
                target_view,
                prepared,
            } => match prepared {
                Some(cert) => write!(
                    f,
                    "ROUND_CHANGE({height}, {target_view}, prepared {:#x} @ {})",
                    cert.value, cert.view
                ),
                None => write!(f, "ROUND_CHANGE({height}, {target_view})"),
            },
        }
    }
}
