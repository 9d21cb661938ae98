//! IBFT consensus state machine.
//!
//! A view-based protocol with rotating leaders: the leader of view `v` at
//! instance `h` is `(h + v) mod N`. Each instance moves through
//! `PREPREPARE` / `PREPARE` / `COMMIT`, with `ROUND_CHANGE` on timeout.

mod messages;
mod state;

pub use messages::{IbftMessage, PreparedCertificate};
pub use state::{IbftConfig, IbftState};
