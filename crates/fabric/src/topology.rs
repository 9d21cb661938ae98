//! Topology constructors.
//!
//! All constructors take a fabric already populated with its endpoints,
//! create the switches, wire endpoint uplinks and switch edges, and invoke
//! the routing engine. They return the switches grouped by layer (grid and
//! clique topologies have a single layer).

use crate::routing::compute_routes;
use crate::{Fabric, TopologyError};
use latticebft_core::ExpService;
use latticebft_types::NodeId;
use tracing::debug;

/// The topology families the simulator can construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyKind {
    Clique,
    Mesh,
    Torus,
    Butterfly,
    FoldedClos,
}

impl TopologyKind {
    /// Parse the configuration spelling of a topology kind.
    pub fn parse(s: &str) -> Option<TopologyKind> {
        match s {
            "Clique" => Some(TopologyKind::Clique),
            "Mesh" => Some(TopologyKind::Mesh),
            "Torus" => Some(TopologyKind::Torus),
            "Butterfly" => Some(TopologyKind::Butterfly),
            "FoldedClos" => Some(TopologyKind::FoldedClos),
            _ => None,
        }
    }
}

/// Construct the given topology over the fabric's endpoints.
pub fn build<M>(
    fabric: &mut Fabric<M>,
    kind: TopologyKind,
    params: &[i64],
    switch_rate: f64,
) -> Result<Vec<Vec<NodeId>>, TopologyError> {
    match kind {
        TopologyKind::Clique => arrange_clique(fabric, switch_rate),
        TopologyKind::Mesh => arrange_mesh(fabric, params, switch_rate),
        TopologyKind::Torus => arrange_torus(fabric, params, switch_rate),
        TopologyKind::Butterfly => arrange_butterfly(fabric, params, switch_rate),
        TopologyKind::FoldedClos => arrange_folded_clos(fabric, params, switch_rate),
    }
}

/// Clique: one proxy switch per endpoint, every proxy a neighbor of every
/// other proxy. With the instant switch rate the proxies are transparent
/// and the clique behaves as a fully connected network.
pub fn arrange_clique<M>(
    fabric: &mut Fabric<M>,
    switch_rate: f64,
) -> Result<Vec<Vec<NodeId>>, TopologyError> {
    let endpoints = fabric.endpoint_ids();
    if endpoints.is_empty() {
        return Err(TopologyError::NoEndpoints);
    }

    let mut proxies = Vec::with_capacity(endpoints.len());
    for &endpoint in &endpoints {
        let name = format!("Switch-{}", fabric.name(endpoint));
        let proxy = fabric.add_switch(name, ExpService::new(switch_rate));
        fabric.set_direct_endpoints(proxy, vec![endpoint]);
        fabric.set_uplinks(endpoint, vec![proxy]);
        proxies.push(proxy);
    }
    for &proxy in &proxies {
        let others: Vec<NodeId> = proxies.iter().copied().filter(|&p| p != proxy).collect();
        fabric.set_neighbors(proxy, others);
    }

    compute_routes(fabric)?;
    debug!(switches = proxies.len(), "arranged clique");
    Ok(vec![proxies])
}

/// Mesh: an `n × (N/n)` grid with 4-neighborhood and no wraparound.
pub fn arrange_mesh<M>(
    fabric: &mut Fabric<M>,
    params: &[i64],
    switch_rate: f64,
) -> Result<Vec<Vec<NodeId>>, TopologyError> {
    arrange_grid(fabric, params, switch_rate, false)
}

/// Torus: as mesh, with wraparound on both axes.
pub fn arrange_torus<M>(
    fabric: &mut Fabric<M>,
    params: &[i64],
    switch_rate: f64,
) -> Result<Vec<Vec<NodeId>>, TopologyError> {
    arrange_grid(fabric, params, switch_rate, true)
}

fn arrange_grid<M>(
    fabric: &mut Fabric<M>,
    params: &[i64],
    switch_rate: f64,
    wrap: bool,
) -> Result<Vec<Vec<NodeId>>, TopologyError> {
    let endpoints = fabric.endpoint_ids();
    if endpoints.is_empty() {
        return Err(TopologyError::NoEndpoints);
    }
    let side = *params
        .first()
        .ok_or(TopologyError::MissingParameter("side length"))?;
    if side <= 0 {
        return Err(TopologyError::InvalidParameter {
            name: "side length",
            value: side,
        });
    }
    let n = side as usize;
    if endpoints.len() % n != 0 {
        return Err(TopologyError::IndivisibleSide {
            side,
            endpoints: endpoints.len(),
        });
    }
    let m = endpoints.len() / n;
    let prefix = if wrap { "Torus" } else { "Mesh" };

    // One switch per endpoint, laid out row-major.
    let mut grid = vec![vec![NodeId(0); m]; n];
    for (i, row) in grid.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            let endpoint = endpoints[i * m + j];
            let switch = fabric.add_switch(
                format!("{prefix}-Switch-(x: {i}, y: {j})"),
                ExpService::new(switch_rate),
            );
            fabric.set_direct_endpoints(switch, vec![endpoint]);
            fabric.set_uplinks(endpoint, vec![switch]);
            *cell = switch;
        }
    }

    for i in 0..n {
        for j in 0..m {
            let mut neighbors = Vec::with_capacity(4);
            let candidates = [
                (i as i64 - 1, j as i64),
                (i as i64 + 1, j as i64),
                (i as i64, j as i64 - 1),
                (i as i64, j as i64 + 1),
            ];
            for (x, y) in candidates {
                let coords = if wrap {
                    Some((
                        (x.rem_euclid(n as i64)) as usize,
                        (y.rem_euclid(m as i64)) as usize,
                    ))
                } else if x >= 0 && (x as usize) < n && y >= 0 && (y as usize) < m {
                    Some((x as usize, y as usize))
                } else {
                    None
                };
                if let Some((x, y)) = coords {
                    neighbors.push(grid[x][y]);
                }
            }
            fabric.set_neighbors(grid[i][j], neighbors);
        }
    }

    compute_routes(fabric)?;
    debug!(rows = n, cols = m, wrap, "arranged grid");
    Ok(vec![grid.into_iter().flatten().collect()])
}

/// Butterfly: layered switches with upward-only edges. Payloads climb from
/// a first-layer uplink to the last layer, which delivers directly to
/// endpoints in consecutive blocks of `radix`.
///
/// Parameters: `[radix, attachment, scheme]` — `radix >= 2`; `attachment`
/// 0 = flushed (consecutive blocks of `radix`), 1 = spread (round-robin,
/// remainder to the earliest groups); `scheme` 0 = maximize group count
/// per layer, 1 = maximize group size per layer.
pub fn arrange_butterfly<M>(
    fabric: &mut Fabric<M>,
    params: &[i64],
    switch_rate: f64,
) -> Result<Vec<Vec<NodeId>>, TopologyError> {
    let grouped = butterfly_skeleton(fabric, params, switch_rate, false)?;
    let endpoints = fabric.endpoint_ids();
    let radix = params[0] as usize;

    // Delivery happens at the top: attach endpoints to last-layer switches
    // in flushed blocks of `radix`, mirroring the first-layer geometry.
    let first_layer_count = grouped[0].len();
    let last_layer = grouped.last().cloned().unwrap_or_default();
    for i in 0..first_layer_count.min(last_layer.len()) {
        let lo = i * radix;
        if lo >= endpoints.len() {
            break;
        }
        let hi = ((i + 1) * radix).min(endpoints.len());
        fabric.set_direct_endpoints(last_layer[i], endpoints[lo..hi].to_vec());
    }

    compute_routes(fabric)?;
    debug!(layers = grouped.len(), "arranged butterfly");
    Ok(grouped)
}

/// Folded Clos: the butterfly skeleton with every switch-switch edge wired
/// both ways, so traffic can descend back to its destination. Endpoints
/// attach (and are delivered) at the first layer only.
pub fn arrange_folded_clos<M>(
    fabric: &mut Fabric<M>,
    params: &[i64],
    switch_rate: f64,
) -> Result<Vec<Vec<NodeId>>, TopologyError> {
    let grouped = butterfly_skeleton(fabric, params, switch_rate, true)?;
    compute_routes(fabric)?;
    debug!(layers = grouped.len(), "arranged folded Clos");
    Ok(grouped)
}

/// Shared butterfly/folded-Clos skeleton.
///
/// `backward` wires every switch-switch edge in both directions and makes
/// first-layer switches deliver to their attached endpoints (folded Clos);
/// without it edges point upward only and delivery is the caller's problem
/// (butterfly attaches the last layer).
fn butterfly_skeleton<M>(
    fabric: &mut Fabric<M>,
    params: &[i64],
    switch_rate: f64,
    backward: bool,
) -> Result<Vec<Vec<NodeId>>, TopologyError> {
    if params.len() < 3 {
        return Err(TopologyError::MissingParameter(
            "[radix, attachment, scheme]",
        ));
    }
    let endpoints = fabric.endpoint_ids();
    if endpoints.is_empty() {
        return Err(TopologyError::NoEndpoints);
    }
    if params[0] < 2 {
        return Err(TopologyError::InvalidParameter {
            name: "radix",
            value: params[0],
        });
    }
    let radix = params[0] as usize;
    let attachment = params[1];
    if attachment != 0 && attachment != 1 {
        return Err(TopologyError::InvalidParameter {
            name: "attachment",
            value: attachment,
        });
    }
    let scheme = params[2];
    if scheme != 0 && scheme != 1 {
        return Err(TopologyError::InvalidParameter {
            name: "scheme",
            value: scheme,
        });
    }

    let n = endpoints.len();
    let service = ExpService::new(switch_rate);

    // First-layer geometry: enough groups to cover ceil(n / radix) uplink
    // switches, rounded up to a full power-of-radix block.
    let min_count = ceil_div(n, radix);
    let levels = ilog_floor(min_count, radix);
    let base_group = radix.pow(levels);
    let first_groups = ceil_div(min_count, base_group) * base_group;

    let mut first_layer = Vec::with_capacity(first_groups);
    let min_per_switch = n / first_groups;
    let remainder = n % first_groups;
    let mut start = 0;
    for i in 0..first_groups {
        let attached: Vec<NodeId> = if attachment == 1 {
            // Spread: near-even split, remainder to the earliest groups.
            let end = start + min_per_switch + usize::from(i < remainder);
            let slice = endpoints[start..end].to_vec();
            start = end;
            slice
        } else {
            // Flushed: consecutive blocks of `radix`; trailing groups may
            // carry no endpoints.
            if i * radix >= n {
                Vec::new()
            } else {
                endpoints[i * radix..((i + 1) * radix).min(n)].to_vec()
            }
        };

        let switch = fabric.add_switch(
            format!("(Level: 1, Group: 0, Index: {i})"),
            service,
        );
        if backward {
            fabric.set_direct_endpoints(switch, attached.clone());
        }
        for &endpoint in &attached {
            fabric.set_uplinks(endpoint, vec![switch]);
        }
        first_layer.push(switch);
    }

    let mut grouped: Vec<Vec<NodeId>> = vec![first_layer.clone()];
    let mut prev_groups: Vec<Vec<NodeId>> = vec![first_layer];
    let mut level = 2;
    loop {
        let mut next_groups: Vec<Vec<NodeId>> = Vec::new();
        for (group_index, prev) in prev_groups.iter().enumerate() {
            let produced = if scheme == 0 {
                next_layer_max_groups(fabric, prev, radix, level, group_index, service, backward)
            } else {
                next_layer_max_size(fabric, prev, radix, level, group_index, service, backward)
            };
            next_groups.extend(produced);
        }
        level += 1;

        let group_size = next_groups.first().map(Vec::len).unwrap_or(0);
        grouped.push(next_groups.iter().flatten().copied().collect());
        prev_groups = next_groups;
        if group_size <= 1 {
            break;
        }
    }

    Ok(grouped)
}

/// Layer generation scheme 0: maximize the number of groups per layer.
///
/// A group of `S` switches produces `min(S, radix)` groups of `max(S /
/// radix, 1)` switches each; each previous-layer column fans out to a full
/// fresh group.
fn next_layer_max_groups<M>(
    fabric: &mut Fabric<M>,
    prev: &[NodeId],
    radix: usize,
    level: usize,
    group: usize,
    service: ExpService,
    backward: bool,
) -> Vec<Vec<NodeId>> {
    let num_nodes = prev.len();
    let num_groups = (num_nodes / radix).max(1);
    let eff_radix = num_nodes.min(radix);

    let mut out: Vec<Vec<NodeId>> = vec![Vec::new(); eff_radix];
    for g in 0..num_groups {
        let fresh: Vec<NodeId> = (0..eff_radix)
            .map(|index| {
                fabric.add_switch(
                    format!(
                        "(Level: {level}, Group: {}, Index: {g})",
                        eff_radix * group + index
                    ),
                    service,
                )
            })
            .collect();
        let prev_column: Vec<NodeId> = (0..eff_radix)
            .map(|index| prev[index * num_groups + g])
            .collect();
        for &p in &prev_column {
            fabric.add_neighbors(p, &fresh);
        }
        if backward {
            for &f in &fresh {
                fabric.set_neighbors(f, prev_column.clone());
            }
        }
        for (index, &f) in fresh.iter().enumerate() {
            out[index].push(f);
        }
    }
    out
}

/// Layer generation scheme 1: maximize group size per layer.
///
/// A group of `S` switches splits into `S / radix^(⌈log_radix S⌉ - 1)`
/// groups that keep the largest power-of-radix size still below `S`.
fn next_layer_max_size<M>(
    fabric: &mut Fabric<M>,
    prev: &[NodeId],
    radix: usize,
    level: usize,
    group: usize,
    service: ExpService,
    backward: bool,
) -> Vec<Vec<NodeId>> {
    let num_nodes = prev.len();
    let group_size = radix
        .pow(ilog_ceil(num_nodes, radix).saturating_sub(1))
        .max(1);
    let num_groups = (num_nodes / group_size).max(1);

    let mut out: Vec<Vec<NodeId>> = vec![Vec::new(); num_groups];
    for g in 0..num_groups {
        for index in 0..group_size {
            let switch = fabric.add_switch(
                format!(
                    "(Level: {level}, Group: {}, Index: {index})",
                    group * group_size + g
                ),
                service,
            );
            let prev_neighbors: Vec<NodeId> = (0..num_groups)
                .map(|p| prev[index + group_size * p])
                .collect();
            for &p in &prev_neighbors {
                fabric.add_neighbors(p, &[switch]);
            }
            if backward {
                fabric.set_neighbors(switch, prev_neighbors);
            }
            out[g].push(switch);
        }
    }
    out
}

fn ceil_div(a: usize, b: usize) -> usize {
    a.div_ceil(b)
}

/// Largest `e` with `base^e <= value` (integer, platform-independent).
fn ilog_floor(value: usize, base: usize) -> u32 {
    let mut e = 0;
    let mut acc = 1usize;
    while acc.saturating_mul(base) <= value {
        acc *= base;
        e += 1;
    }
    e
}

/// Smallest `e` with `base^e >= value`.
fn ilog_ceil(value: usize, base: usize) -> u32 {
    let mut e = 0;
    let mut acc = 1usize;
    while acc < value {
        acc = acc.saturating_mul(base);
        e += 1;
    }
    e
}
