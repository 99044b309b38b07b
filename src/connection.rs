// ===========================================================================
// Reconnection of components split apart by shot removal
// ===========================================================================
use crate::error::{CaveGraphError, Result};
use crate::flags::Flag;
use crate::graph::{CaveGraph, NodeKey, Shot};
use ahash::AHashSet;
use petgraph::stable_graph::NodeIndex;
use rstar::{AABB, RTree, primitives::GeomWithData};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

fn default_node_deg() -> usize {
    1
}

fn default_exclude_neighbors() -> usize {
    3
}

/// Search parameters for [`get_potential_connection`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Radius of the search cylinder
    pub dist_horiz_max: f64,
    /// Half height of the search cylinder
    pub dist_vert_max: f64,
    /// Only stations with exactly this many shots are checked
    #[serde(default = "default_node_deg")]
    pub node_deg: usize,
    /// Stations at most this many shots away are never proposed
    #[serde(default = "default_exclude_neighbors")]
    pub exclude_neighbors_up_to_edge: usize,
    #[serde(default)]
    pub with_distance: bool,
    #[serde(default)]
    pub with_angles: bool,
}

impl ConnectionParams {
    pub fn new(dist_horiz_max: f64, dist_vert_max: f64) -> Self {
        Self {
            dist_horiz_max,
            dist_vert_max,
            node_deg: default_node_deg(),
            exclude_neighbors_up_to_edge: default_exclude_neighbors(),
            with_distance: false,
            with_angles: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("dist_horiz_max", self.dist_horiz_max),
            ("dist_vert_max", self.dist_vert_max),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CaveGraphError::Config(format!(
                    "{} must be a finite positive distance, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// A proposed shot `from -> to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PotentialConnection {
    pub from: NodeKey,
    pub to: NodeKey,
    /// 3D length of the proposed shot
    pub distance: Option<f64>,
    /// Angles in degrees, within [0, 180], between the proposed shot and each
    /// shot already leaving `from`. NaN when a shot has zero length.
    pub angles: Option<Vec<f64>>,
}

/// Station positions in graph order, indexed by an R-tree.
struct StationIndex {
    order: Vec<NodeIndex>,
    positions: Vec<[f64; 3]>,
    tree: RTree<GeomWithData<[f64; 3], usize>>,
}

impl StationIndex {
    fn build(graph: &CaveGraph) -> Self {
        let inner = graph.inner();
        let order: Vec<NodeIndex> = inner.node_indices().collect();
        let positions: Vec<[f64; 3]> = order.iter().map(|&ix| inner[ix].pos).collect();
        let items = positions
            .iter()
            .enumerate()
            .map(|(i, p)| GeomWithData::new(*p, i))
            .collect();
        Self {
            order,
            positions,
            tree: RTree::bulk_load(items),
        }
    }

    /// Graph-order slots inside the vertical cylinder around `center`, with
    /// their squared horizontal distance.
    fn in_cylinder(&self, center: [f64; 3], radius: f64, half_height: f64) -> Vec<(usize, f64)> {
        let envelope = AABB::from_corners(
            [center[0] - radius, center[1] - radius, center[2] - half_height],
            [center[0] + radius, center[1] + radius, center[2] + half_height],
        );
        let rh2 = radius * radius;
        let mut found: Vec<(usize, f64)> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .filter_map(|item| {
                let p = item.geom();
                let dx = p[0] - center[0];
                let dy = p[1] - center[1];
                let disth2 = dx * dx + dy * dy;
                let distv = (p[2] - center[2]).abs();
                (disth2 <= rh2 && distv <= half_height).then_some((item.data, disth2))
            })
            .collect();
        found.sort_by_key(|(slot, _)| *slot);
        found
    }
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn norm(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

pub(crate) fn angle_deg(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dot = a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
    let cos = dot / (norm(a) * norm(b));
    if cos.is_nan() {
        return f64::NAN;
    }
    cos.clamp(-1.0, 1.0).acos().to_degrees()
}

/// Proposes new shots between dead ends and nearby, topologically distant stations.
///
/// For every station `u` with `node_deg` shots, the stations inside the
/// vertical cylinder of radius `dist_horiz_max` and half height
/// `dist_vert_max` centred on `u` are candidates. Candidates reachable from
/// `u` in at most `exclude_neighbors_up_to_edge` shots (including `u`) are
/// dropped, and the horizontally nearest remaining one becomes the proposal.
/// Ties go to the candidate first in graph order.
pub fn get_potential_connection(
    graph: &CaveGraph,
    params: &ConnectionParams,
) -> Result<Vec<PotentialConnection>> {
    params.validate()?;
    let index = StationIndex::build(graph);
    let inner = graph.inner();

    let mut proposals = Vec::new();
    for (slot, &ix) in index.order.iter().enumerate() {
        if inner.edges(ix).count() != params.node_deg {
            continue;
        }
        let u = graph.key_of(ix);
        let pos_u = index.positions[slot];

        let candidates = index.in_cylinder(pos_u, params.dist_horiz_max, params.dist_vert_max);
        // u itself is always inside
        if candidates.len() <= 1 {
            continue;
        }

        let excluded: AHashSet<NodeKey> = graph
            .shortest_path_lengths(u, Some(params.exclude_neighbors_up_to_edge))?
            .into_iter()
            .map(|(k, _)| k)
            .collect();

        let nearest = candidates
            .into_iter()
            .filter(|(s, _)| !excluded.contains(&graph.key_of(index.order[*s])))
            .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let Some((v_slot, _)) = nearest else {
            continue;
        };
        let v = graph.key_of(index.order[v_slot]);
        let uv = sub(index.positions[v_slot], pos_u);

        let distance = params.with_distance.then(|| norm(uv));
        let angles = if params.with_angles {
            let mut angles = Vec::new();
            for n in graph.neighbors(u)? {
                let pos_n = graph.require_station(n)?.pos;
                angles.push(angle_deg(uv, sub(pos_n, pos_u)));
            }
            Some(angles)
        } else {
            None
        };

        debug!("potential connection {} -> {}", u, v);
        proposals.push(PotentialConnection {
            from: u,
            to: v,
            distance,
            angles,
        });
    }

    info!(
        "{} potential connections for {} stations of degree {}",
        proposals.len(),
        graph.len(),
        params.node_deg
    );
    Ok(proposals)
}

/// Adds the proposed shots flagged [`Flag::Add`], skipping pairs already connected.
pub fn apply_connections(
    graph: &mut CaveGraph,
    proposals: &[PotentialConnection],
) -> Result<usize> {
    let mut added = 0;
    for p in proposals {
        if p.from == p.to || graph.has_shot(p.from, p.to) {
            continue;
        }
        graph.add_shot(p.from, p.to, Shot::flagged(Flag::Add))?;
        added += 1;
    }
    info!("added {} of {} proposed shots", added, proposals.len());
    Ok(added)
}

/// Stations that became dead ends in `cleaned` while being pass-through in `original`.
///
/// Returns `None` when `cleaned` is a single component and nothing needs merging.
pub fn find_disconnected_nodes(
    original: &CaveGraph,
    cleaned: &CaveGraph,
) -> Result<Option<Vec<NodeKey>>> {
    info!(
        "{} connected components in the original graph",
        original.number_connected_components()
    );
    let components = cleaned.connected_components();
    info!(
        "{} connected components in the graph without flagged edges",
        components.len()
    );

    if components.len() <= 1 {
        info!("no disconnected components, no need to merge");
        return Ok(None);
    }

    let mut disconnected = Vec::new();
    for component in &components {
        for &k in component {
            let cleaned_degree = cleaned.degree(k).ok_or(CaveGraphError::MissingNode(k))?;
            let original_degree = original.degree(k).ok_or(CaveGraphError::MissingNode(k))?;
            if cleaned_degree == 1 && original_degree > 1 {
                disconnected.push(k);
            }
        }
    }
    Ok(Some(disconnected))
}
