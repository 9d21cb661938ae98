//! Simulation-level errors.

use latticebft_fabric::TopologyError;
use thiserror::Error;

/// Fatal error inside the simulation core.
///
/// Protocol-level anomalies are not errors; this enum covers topology
/// construction failures and driver invariant violations that should never
/// fire on a well-formed fabric.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// An internal invariant of the event loop was violated.
    #[error("runtime invariant violated: {0}")]
    RuntimeInvariant(String),
}

impl SimulationError {
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        SimulationError::RuntimeInvariant(message.into())
    }
}
