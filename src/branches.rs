// ===========================================================================
// Splitting a survey network into simple branches (needed by PLine export)
// ===========================================================================
use crate::error::{CaveGraphError, Result};
use crate::graph::{CaveGraph, NodeKey, PropertyValue, Shot, Station};
use tracing::debug;

pub const COMPONENT_PROPERTY: &str = "connected_component_number";
pub const INTERSECTION_PROPERTY: &str = "intersection";

/// Numbers the connected components 0..n in graph order and stores the
/// number on every station.
pub fn add_component_numbers(graph: &mut CaveGraph) -> usize {
    let components = graph.connected_components();
    for (i, component) in components.iter().enumerate() {
        for &key in component {
            if let Some(station) = graph.station_mut(key) {
                station
                    .properties
                    .insert(COMPONENT_PROPERTY.to_string(), PropertyValue::from(i));
            }
        }
    }
    components.len()
}

/// Detaches `neighbor` from `at` onto a fresh copy of `at` with key `new_key`.
///
/// The copy keeps the position and component number and remembers `at` in
/// its `intersection` property.
pub(crate) fn detach(
    graph: &mut CaveGraph,
    at: NodeKey,
    neighbor: NodeKey,
    new_key: NodeKey,
) -> Result<()> {
    let original = graph.require_station(at)?;
    let mut copy = Station::new(new_key, original.pos);
    if let Some(cc) = original.properties.get(COMPONENT_PROPERTY) {
        copy.properties
            .insert(COMPONENT_PROPERTY.to_string(), cc.clone());
    }
    copy.properties.insert(
        INTERSECTION_PROPERTY.to_string(),
        PropertyValue::Number(at.0 as f64),
    );

    let shot = graph
        .remove_shot(at, neighbor)
        .ok_or(CaveGraphError::MissingEdge(at, neighbor))?;
    graph.add_station(copy)?;
    graph.add_shot(new_key, neighbor, shot)?;
    Ok(())
}

/// Breaks the network into branches.
///
/// At every station with more than two shots, the first two neighbours stay
/// attached and every further neighbour is reconnected to a new station at
/// the same position. Afterwards no station has more than two shots, so each
/// connected component is either a simple path or a loop.
pub fn graph_to_branches(graph: &CaveGraph) -> Result<CaveGraph> {
    let mut branches = graph.clone();
    add_component_numbers(&mut branches);
    let mut next_key = branches.next_key();

    let intersections: Vec<NodeKey> = branches
        .stations()
        .map(|s| s.key)
        .filter(|&k| branches.degree(k).unwrap_or(0) > 2)
        .collect();

    for intersection in intersections {
        let neighbors = branches.neighbors(intersection)?;
        for &neighbor in neighbors.iter().skip(2) {
            detach(&mut branches, intersection, neighbor, next_key)?;
            next_key = NodeKey(next_key.0 + 1);
        }
    }

    debug!(
        "split {} stations into {} branches",
        graph.len(),
        branches.number_connected_components()
    );
    Ok(branches)
}
