//! Shortest-path routing-table computation.
//!
//! One BFS per destination endpoint over the *reversed* switch graph:
//! switches carrying the endpoint in their directly-connected set seed the
//! search at distance one, and every other reachable switch's next hop is
//! its minimum-distance out-neighbor, ties broken by the lower switch id.
//! Directed topologies (butterfly) fall out naturally since the BFS only
//! follows wired edges.
//!
//! Totality is checked where traffic enters the fabric: every endpoint's
//! uplink switch must hold a route to every endpoint. Entries at every
//! other switch exist wherever a path exists, which covers every switch a
//! routed payload can transit (finite distances chain downhill); a
//! directed topology's terminal switches legitimately carry routes only
//! for their own endpoints.

use crate::{Fabric, Port, TopologyError};
use latticebft_types::NodeId;
use std::collections::{BTreeSet, HashMap, VecDeque};
use tracing::trace;

struct SwitchView {
    id: NodeId,
    out: Vec<NodeId>,
    direct: Vec<NodeId>,
}

/// Compute the routing tables for every switch in the fabric.
///
/// Fails with [`TopologyError::UnreachableEndpoint`] if any endpoint's
/// uplink switch cannot reach any endpoint.
pub fn compute_routes<M>(fabric: &mut Fabric<M>) -> Result<(), TopologyError> {
    let views: Vec<SwitchView> = fabric
        .switch_ids()
        .into_iter()
        .filter_map(|id| match fabric.port(id) {
            Some(Port::Switch(s)) => Some(SwitchView {
                id,
                out: s.neighbors().to_vec(),
                direct: s.direct_endpoints().to_vec(),
            }),
            _ => None,
        })
        .collect();

    // Reverse adjacency: rev[t] = switches with an out-edge to t.
    let mut rev: HashMap<NodeId, Vec<NodeId>> = views.iter().map(|v| (v.id, Vec::new())).collect();
    for view in &views {
        for &t in &view.out {
            if let Some(sources) = rev.get_mut(&t) {
                sources.push(view.id);
            }
        }
    }

    // Ingress switches: every endpoint's uplinks must route everywhere.
    let mut ingress: BTreeSet<NodeId> = BTreeSet::new();
    for &endpoint in &fabric.endpoint_ids() {
        if let Some(Port::Endpoint(p)) = fabric.port(endpoint) {
            ingress.extend(p.uplinks().iter().copied());
        }
    }

    for &endpoint in &fabric.endpoint_ids() {
        let mut dist: HashMap<NodeId, u32> = HashMap::new();
        let mut frontier: VecDeque<NodeId> = VecDeque::new();

        for view in &views {
            if view.direct.contains(&endpoint) {
                dist.insert(view.id, 1);
                frontier.push_back(view.id);
            }
        }

        while let Some(s) = frontier.pop_front() {
            let d = dist[&s];
            if let Some(sources) = rev.get(&s) {
                for &p in sources {
                    dist.entry(p).or_insert_with(|| {
                        frontier.push_back(p);
                        d + 1
                    });
                }
            }
        }

        for view in &views {
            let Some(&d) = dist.get(&view.id) else {
                if ingress.contains(&view.id) {
                    return Err(TopologyError::UnreachableEndpoint {
                        switch: fabric.name(view.id).to_string(),
                        endpoint: fabric.name(endpoint).to_string(),
                    });
                }
                continue;
            };
            let hop = if d == 1 {
                endpoint
            } else {
                view.out
                    .iter()
                    .copied()
                    .filter(|t| dist.get(t) == Some(&(d - 1)))
                    .min()
                    .ok_or_else(|| TopologyError::UnreachableEndpoint {
                        switch: fabric.name(view.id).to_string(),
                        endpoint: fabric.name(endpoint).to_string(),
                    })?
            };
            trace!(switch = %view.id, %endpoint, next_hop = %hop, distance = d, "route");
            fabric.insert_route(view.id, endpoint, hop);
        }
    }

    Ok(())
}

/// Number of switch-to-switch hops from `switch` to `endpoint`, following
/// the computed routes. Diagnostic helper for tests and trace output.
pub(crate) fn switch_hops<M>(
    fabric: &Fabric<M>,
    mut switch: NodeId,
    endpoint: NodeId,
) -> Option<usize> {
    let mut hops = 0;
    loop {
        let Port::Switch(s) = fabric.port(switch)? else {
            return None;
        };
        let next = s.route(endpoint)?;
        if next == endpoint {
            return Some(hops);
        }
        switch = next;
        hops += 1;
        if hops > fabric.len() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latticebft_core::ExpService;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Two endpoints on two disconnected switches: routing must refuse the
    /// fabric because each uplink cannot reach the other endpoint.
    #[test]
    fn disconnected_fabric_fails_construction() {
        let mut fabric: Fabric<u64> = Fabric::new();
        let e0 = fabric.add_endpoint(
            "Validator-0",
            ExpService::new(ExpService::INSTANT),
            ChaCha8Rng::seed_from_u64(0),
        );
        let e1 = fabric.add_endpoint(
            "Validator-1",
            ExpService::new(ExpService::INSTANT),
            ChaCha8Rng::seed_from_u64(1),
        );
        let s0 = fabric.add_switch("Island-0", ExpService::new(ExpService::INSTANT));
        let s1 = fabric.add_switch("Island-1", ExpService::new(ExpService::INSTANT));
        fabric.set_direct_endpoints(s0, vec![e0]);
        fabric.set_direct_endpoints(s1, vec![e1]);
        fabric.set_uplinks(e0, vec![s0]);
        fabric.set_uplinks(e1, vec![s1]);

        let err = compute_routes(&mut fabric).unwrap_err();
        assert!(matches!(err, TopologyError::UnreachableEndpoint { .. }));
    }

    /// A linear chain routes along the only path, and equal-length ties
    /// pick the lower switch id.
    #[test]
    fn routes_follow_shortest_paths_with_low_id_ties() {
        let mut fabric: Fabric<u64> = Fabric::new();
        let e0 = fabric.add_endpoint(
            "Validator-0",
            ExpService::new(ExpService::INSTANT),
            ChaCha8Rng::seed_from_u64(0),
        );
        let e1 = fabric.add_endpoint(
            "Validator-1",
            ExpService::new(ExpService::INSTANT),
            ChaCha8Rng::seed_from_u64(1),
        );
        // Diamond: a -> {b, c} -> d, with both middle hops equal length.
        let a = fabric.add_switch("a", ExpService::new(ExpService::INSTANT));
        let b = fabric.add_switch("b", ExpService::new(ExpService::INSTANT));
        let c = fabric.add_switch("c", ExpService::new(ExpService::INSTANT));
        let d = fabric.add_switch("d", ExpService::new(ExpService::INSTANT));
        fabric.set_direct_endpoints(a, vec![e0]);
        fabric.set_direct_endpoints(d, vec![e1]);
        fabric.set_uplinks(e0, vec![a]);
        fabric.set_uplinks(e1, vec![d]);
        fabric.set_neighbors(a, vec![b, c]);
        fabric.set_neighbors(b, vec![a, d]);
        fabric.set_neighbors(c, vec![a, d]);
        fabric.set_neighbors(d, vec![b, c]);

        compute_routes(&mut fabric).expect("diamond is connected");

        let Some(Port::Switch(switch_a)) = fabric.port(a) else {
            panic!("a is a switch");
        };
        // Both b and c are on shortest paths; b has the lower arena id.
        assert_eq!(switch_a.route(e1), Some(b));
        assert_eq!(switch_hops(&fabric, a, e1), Some(2));
    }
}
