//! Event model and consensus-process interface for the deterministic
//! simulation.
//!
//! Events are **passive data** — they describe something that is due to
//! happen at a point in simulated time. The simulation runner processes
//! events and converts the resulting outbound messages back into events.

mod event;
mod process;
mod service;

pub use event::Event;
pub use process::{ConsensusProcess, Outbound, StepOutput, TimerArm, TimerTag};
pub use service::ExpService;
