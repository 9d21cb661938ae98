//! The network fabric: an arena of endpoint and switch ports, shortest-path
//! routing tables, and the topology constructors that wire them together.
//!
//! # Architecture
//!
//! All ports live in a single [`Fabric`] arena and refer to each other by
//! [`NodeId`](latticebft_types::NodeId). Endpoints originate and consume
//! payloads; switches store-and-forward them along precomputed routes.
//! Topology constructors create the switches, wire endpoint uplinks and
//! switch edges, then invoke the routing engine; a fabric whose routing
//! tables are not total fails construction with [`TopologyError`].

mod error;
mod port;
mod routing;
mod topology;

pub use error::TopologyError;
pub use port::{EndpointPort, Fabric, Port, SwitchPort};
pub use routing::compute_routes;
pub use topology::{
    arrange_butterfly, arrange_clique, arrange_folded_clos, arrange_mesh, arrange_torus, build,
    TopologyKind,
};
