//! Deterministic simulation runner.
//!
//! This crate provides a fully deterministic simulation of consensus
//! validators over a switched network fabric. Given the same seed and
//! configuration, it produces a byte-identical event trace every run.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  SimulationRunner                       │
//! │                                                         │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     EventQueue (BTreeMap<EventKey, Event>)         │ │
//! │  │     Ordered by: (time, insertion sequence)         │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │  Fabric ports (endpoints + switches, FIFO ingress) │ │
//! │  │  Endpoint delivery drives the consensus machines   │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │  Outbound payloads → routed QueueMessage events    │ │
//! │  └────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod error;
mod event_queue;
mod rng;
mod runner;
mod stats;

pub use error::SimulationError;
pub use event_queue::{EventKey, EventQueue};
pub use rng::{endpoint_rng, trial_rng, trial_seed};
pub use runner::{Envelope, RunSummary, RunnerConfig, SimulationRunner};
pub use stats::ConsensusStatistics;
