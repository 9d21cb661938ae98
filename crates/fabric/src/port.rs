//! The port arena: endpoints and switches with FIFO ingress queues and a
//! single-server service discipline.

use latticebft_core::ExpService;
use latticebft_types::{NodeId, Payload};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use std::collections::{HashMap, VecDeque};

/// State shared by every port: identity, ingress FIFO, service discipline.
#[derive(Debug)]
pub struct PortCommon<M> {
    id: NodeId,
    name: String,
    ingress: VecDeque<Payload<M>>,
    /// True while exactly one `ProcessPayload` for this port is in flight.
    busy: bool,
    /// True while a `PollQueue` for this port is scheduled but not yet
    /// dispatched. At most one poll is ever pending per port.
    poll_pending: bool,
    service: ExpService,
}

impl<M> PortCommon<M> {
    fn new(id: NodeId, name: String, service: ExpService) -> Self {
        Self {
            id,
            name,
            ingress: VecDeque::new(),
            busy: false,
            poll_pending: false,
            service,
        }
    }
}

/// An endpoint port: a consensus participant's attachment to the fabric.
///
/// Locally-originated payloads leave via a uniformly chosen uplink switch.
/// The choice uses a per-endpoint sub-stream so that runs stay reproducible
/// regardless of how many uplinks a topology wires.
#[derive(Debug)]
pub struct EndpointPort<M> {
    base: PortCommon<M>,
    uplinks: Vec<NodeId>,
    chooser: ChaCha8Rng,
}

impl<M> EndpointPort<M> {
    /// The switches this endpoint can emit into.
    pub fn uplinks(&self) -> &[NodeId] {
        &self.uplinks
    }

    /// Uniformly pick an uplink for a locally-originated payload.
    pub fn choose_uplink(&mut self) -> Option<NodeId> {
        self.uplinks.choose(&mut self.chooser).copied()
    }
}

/// A store-and-forward switch port.
#[derive(Debug)]
pub struct SwitchPort<M> {
    base: PortCommon<M>,
    /// Endpoints this switch delivers to directly.
    direct_endpoints: Vec<NodeId>,
    /// Out-edges to neighboring switches. Directed: an edge here does not
    /// imply the reverse edge (butterfly wires upward only).
    neighbors: Vec<NodeId>,
    /// Total after construction: every endpoint maps to its next hop.
    routes: HashMap<NodeId, NodeId>,
}

impl<M> SwitchPort<M> {
    /// Endpoints delivered directly by this switch.
    pub fn direct_endpoints(&self) -> &[NodeId] {
        &self.direct_endpoints
    }

    /// Outgoing switch edges.
    pub fn neighbors(&self) -> &[NodeId] {
        &self.neighbors
    }

    /// Next hop toward `endpoint`, if the routing table covers it.
    pub fn route(&self, endpoint: NodeId) -> Option<NodeId> {
        self.routes.get(&endpoint).copied()
    }
}

/// A port in the fabric arena.
#[derive(Debug)]
pub enum Port<M> {
    Endpoint(EndpointPort<M>),
    Switch(SwitchPort<M>),
}

impl<M> Port<M> {
    fn common(&self) -> &PortCommon<M> {
        match self {
            Port::Endpoint(p) => &p.base,
            Port::Switch(p) => &p.base,
        }
    }

    fn common_mut(&mut self) -> &mut PortCommon<M> {
        match self {
            Port::Endpoint(p) => &mut p.base,
            Port::Switch(p) => &mut p.base,
        }
    }

    pub fn id(&self) -> NodeId {
        self.common().id
    }

    pub fn name(&self) -> &str {
        &self.common().name
    }

    pub fn is_switch(&self) -> bool {
        matches!(self, Port::Switch(_))
    }
}

/// The arena owning every port in the network.
///
/// Endpoints are added first (so endpoint `i` occupies arena slot `i`),
/// then a topology constructor adds switches and wires edges.
#[derive(Debug, Default)]
pub struct Fabric<M> {
    ports: Vec<Port<M>>,
    num_endpoints: usize,
}

impl<M> Fabric<M> {
    pub fn new() -> Self {
        Self {
            ports: Vec::new(),
            num_endpoints: 0,
        }
    }

    /// Add an endpoint port. Must be called before any switch is added so
    /// endpoint arena ids stay contiguous from zero.
    pub fn add_endpoint(
        &mut self,
        name: impl Into<String>,
        service: ExpService,
        chooser: ChaCha8Rng,
    ) -> NodeId {
        debug_assert_eq!(self.ports.len(), self.num_endpoints);
        let id = NodeId(self.ports.len() as u32);
        self.ports.push(Port::Endpoint(EndpointPort {
            base: PortCommon::new(id, name.into(), service),
            uplinks: Vec::new(),
            chooser,
        }));
        self.num_endpoints += 1;
        id
    }

    /// Add a switch port with no edges yet.
    pub fn add_switch(&mut self, name: impl Into<String>, service: ExpService) -> NodeId {
        let id = NodeId(self.ports.len() as u32);
        self.ports.push(Port::Switch(SwitchPort {
            base: PortCommon::new(id, name.into(), service),
            direct_endpoints: Vec::new(),
            neighbors: Vec::new(),
            routes: HashMap::new(),
        }));
        id
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn num_endpoints(&self) -> usize {
        self.num_endpoints
    }

    /// Arena ids of all endpoints, in id order.
    pub fn endpoint_ids(&self) -> Vec<NodeId> {
        (0..self.num_endpoints as u32).map(NodeId).collect()
    }

    /// Arena ids of all switches, in id order.
    pub fn switch_ids(&self) -> Vec<NodeId> {
        (self.num_endpoints..self.ports.len())
            .map(|i| NodeId(i as u32))
            .collect()
    }

    pub fn port(&self, id: NodeId) -> Option<&Port<M>> {
        self.ports.get(id.0 as usize)
    }

    pub fn port_mut(&mut self, id: NodeId) -> Option<&mut Port<M>> {
        self.ports.get_mut(id.0 as usize)
    }

    /// Display name of a port; falls back to the raw id for unknown ports.
    pub fn name(&self, id: NodeId) -> &str {
        self.port(id).map(Port::name).unwrap_or("<unknown>")
    }

    // ─── Wiring (used by topology constructors) ───

    pub fn set_uplinks(&mut self, endpoint: NodeId, uplinks: Vec<NodeId>) {
        if let Some(Port::Endpoint(p)) = self.port_mut(endpoint) {
            p.uplinks = uplinks;
        }
    }

    pub fn set_direct_endpoints(&mut self, switch: NodeId, endpoints: Vec<NodeId>) {
        if let Some(Port::Switch(p)) = self.port_mut(switch) {
            p.direct_endpoints = endpoints;
        }
    }

    pub fn set_neighbors(&mut self, switch: NodeId, neighbors: Vec<NodeId>) {
        if let Some(Port::Switch(p)) = self.port_mut(switch) {
            p.neighbors = neighbors;
        }
    }

    /// Append out-edges to a switch (layered constructions wire upward
    /// edges incrementally).
    pub fn add_neighbors(&mut self, switch: NodeId, neighbors: &[NodeId]) {
        if let Some(Port::Switch(p)) = self.port_mut(switch) {
            p.neighbors.extend_from_slice(neighbors);
        }
    }

    pub(crate) fn insert_route(&mut self, switch: NodeId, endpoint: NodeId, next_hop: NodeId) {
        if let Some(Port::Switch(p)) = self.port_mut(switch) {
            p.routes.insert(endpoint, next_hop);
        }
    }

    // ─── Service discipline (used by the simulation runner) ───

    pub fn service(&self, id: NodeId) -> Option<ExpService> {
        self.port(id).map(|p| p.common().service)
    }

    pub fn is_busy(&self, id: NodeId) -> Option<bool> {
        self.port(id).map(|p| p.common().busy)
    }

    pub fn set_busy(&mut self, id: NodeId, busy: bool) {
        if let Some(p) = self.port_mut(id) {
            p.common_mut().busy = busy;
        }
    }

    pub fn poll_pending(&self, id: NodeId) -> Option<bool> {
        self.port(id).map(|p| p.common().poll_pending)
    }

    pub fn set_poll_pending(&mut self, id: NodeId, pending: bool) {
        if let Some(p) = self.port_mut(id) {
            p.common_mut().poll_pending = pending;
        }
    }

    pub fn ingress_push(&mut self, id: NodeId, payload: Payload<M>) {
        if let Some(p) = self.port_mut(id) {
            p.common_mut().ingress.push_back(payload);
        }
    }

    pub fn ingress_pop(&mut self, id: NodeId) -> Option<Payload<M>> {
        self.port_mut(id)?.common_mut().ingress.pop_front()
    }

    pub fn ingress_len(&self, id: NodeId) -> usize {
        self.port(id).map(|p| p.common().ingress.len()).unwrap_or(0)
    }

    /// Next hop for a payload leaving `from`: switches consult their
    /// routing table, endpoints pick an uplink uniformly at random from
    /// their own sub-stream.
    pub fn next_hop(&mut self, from: NodeId, destination: NodeId) -> Option<NodeId> {
        match self.port_mut(from)? {
            Port::Switch(p) => p.routes.get(&destination).copied(),
            Port::Endpoint(p) => p.choose_uplink(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn two_port_fabric() -> (Fabric<u64>, NodeId) {
        let mut fabric = Fabric::new();
        let endpoint = fabric.add_endpoint(
            "Validator-0",
            ExpService::new(ExpService::INSTANT),
            ChaCha8Rng::seed_from_u64(0),
        );
        (fabric, endpoint)
    }

    #[test]
    fn ingress_is_fifo() {
        let (mut fabric, endpoint) = two_port_fabric();
        for value in [10u64, 20, 30] {
            fabric.ingress_push(endpoint, Payload::new(value, endpoint, endpoint));
        }

        let order: Vec<u64> = std::iter::from_fn(|| fabric.ingress_pop(endpoint))
            .map(|p| p.message)
            .collect();
        assert_eq!(order, vec![10, 20, 30], "payloads must dequeue in order");
        assert_eq!(fabric.ingress_len(endpoint), 0);
    }

    #[test]
    fn uplink_choice_is_reproducible_per_endpoint() {
        let (mut fabric, endpoint) = two_port_fabric();
        let s0 = fabric.add_switch("s0", ExpService::new(ExpService::INSTANT));
        let s1 = fabric.add_switch("s1", ExpService::new(ExpService::INSTANT));
        fabric.set_uplinks(endpoint, vec![s0, s1]);

        let picks: Vec<NodeId> = (0..16)
            .filter_map(|_| fabric.next_hop(endpoint, endpoint))
            .collect();

        // Same sub-stream seed, same sequence of picks.
        let (mut again, endpoint2) = two_port_fabric();
        let t0 = again.add_switch("s0", ExpService::new(ExpService::INSTANT));
        let t1 = again.add_switch("s1", ExpService::new(ExpService::INSTANT));
        again.set_uplinks(endpoint2, vec![t0, t1]);
        let repeat: Vec<NodeId> = (0..16)
            .filter_map(|_| again.next_hop(endpoint2, endpoint2))
            .collect();

        assert_eq!(picks, repeat);
        assert!(picks.contains(&s0) && picks.contains(&s1), "both uplinks used");
    }

    #[test]
    fn busy_and_poll_flags_round_trip() {
        let (mut fabric, endpoint) = two_port_fabric();
        assert_eq!(fabric.is_busy(endpoint), Some(false));
        fabric.set_busy(endpoint, true);
        assert_eq!(fabric.is_busy(endpoint), Some(true));
        fabric.set_poll_pending(endpoint, true);
        assert_eq!(fabric.poll_pending(endpoint), Some(true));
        assert_eq!(fabric.is_busy(NodeId(99)), None, "unknown port");
    }
}
