//! Topology construction errors.

use thiserror::Error;

/// Fatal error while constructing a network topology.
///
/// Construction either yields a fabric with total routing tables or fails;
/// there is no partial fabric.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// A required network parameter was not supplied.
    #[error("missing network parameter: expected {0}")]
    MissingParameter(&'static str),

    /// A network parameter is outside its allowed range.
    #[error("invalid network parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: i64 },

    /// Grid side length must divide the endpoint count.
    #[error("side length {side} does not divide endpoint count {endpoints}")]
    IndivisibleSide { side: i64, endpoints: usize },

    /// The fabric has no endpoints to arrange.
    #[error("cannot arrange a topology over zero endpoints")]
    NoEndpoints,

    /// Routing totality violated: some switch cannot reach some endpoint.
    #[error("endpoint {endpoint} is unreachable from switch {switch}")]
    UnreachableEndpoint { switch: String, endpoint: String },
}
