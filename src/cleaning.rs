// ===========================================================================
// Manual corrections applied after a survey import: extra shots, station and
// shot flags, and removal of shots that are not part of the cave conduits.
// ===========================================================================
use crate::address::{AddressBook, NodeRef};
use crate::error::{CaveGraphError, Result};
use crate::flags::Flag;
use crate::graph::{CaveGraph, NodeKey, Shot};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovalReport {
    pub shots_removed: usize,
    pub stations_removed: usize,
}

fn resolve_pair(
    book: Option<&AddressBook>,
    edge: &(NodeRef, NodeRef),
) -> Result<(NodeKey, NodeKey)> {
    Ok((resolve(book, &edge.0)?, resolve(book, &edge.1)?))
}

fn resolve(book: Option<&AddressBook>, node: &NodeRef) -> Result<NodeKey> {
    match (book, node) {
        (Some(book), node) => book.resolve(node),
        (None, NodeRef::Key(k)) => Ok(*k),
        (None, NodeRef::Address(a)) => Err(CaveGraphError::UnknownAddress(a.clone())),
    }
}

/// Adds a shot between existing stations for every pair, flagged with `flag`.
///
/// A pair that is already connected has its flags replaced by `[flag]`.
pub fn add_edges(
    graph: &mut CaveGraph,
    additional_edges: &[(NodeRef, NodeRef)],
    book: Option<&AddressBook>,
    flag: Flag,
) -> Result<()> {
    for edge in additional_edges {
        let (u, v) = resolve_pair(book, edge)?;
        debug!("adding {} shot {}-{}", flag, u, v);
        graph.add_shot(u, v, Shot::flagged(flag.clone()))?;
    }
    Ok(())
}

/// Appends flags to stations, `[(flag, [stations])]`, in the order given.
pub fn flag_nodes(
    graph: &mut CaveGraph,
    flagged_nodes: &[(Flag, Vec<NodeRef>)],
    book: Option<&AddressBook>,
) -> Result<()> {
    info!(
        "adding manual node flags: {:?}",
        flagged_nodes.iter().map(|(f, _)| f.code()).collect::<Vec<_>>()
    );

    for (flag, nodes) in flagged_nodes {
        for node in nodes {
            let key = resolve(book, node)?;
            let station = graph
                .station_mut(key)
                .ok_or(CaveGraphError::MissingNode(key))?;
            station.flags.push(flag.clone());
        }
    }
    Ok(())
}

/// Appends flags to shots, `[(flag, [(u, v)])]`, in the order given.
/// Unknown shots are created carrying only that flag.
pub fn flag_edges(
    graph: &mut CaveGraph,
    flagged_edges: &[(Flag, Vec<(NodeRef, NodeRef)>)],
    book: Option<&AddressBook>,
) -> Result<()> {
    info!(
        "adding manual edge flags: {:?}",
        flagged_edges.iter().map(|(f, _)| f.code()).collect::<Vec<_>>()
    );

    for (flag, edges) in flagged_edges {
        for edge in edges {
            let (u, v) = resolve_pair(book, edge)?;
            match graph.shot_mut(u, v) {
                Some(shot) => shot.flags.push(flag.clone()),
                None => {
                    debug!("creating shot {}-{} for flag {}", u, v, flag);
                    graph.add_shot(u, v, Shot::flagged(flag.clone()))?;
                }
            }
        }
    }
    Ok(())
}

/// Removes every shot carrying one of `flags_to_remove`.
///
/// Whenever at least one shot goes, every station left without shots goes too.
pub fn remove_flagged_edges(graph: &mut CaveGraph, flags_to_remove: &[Flag]) -> RemovalReport {
    let doomed: Vec<(NodeKey, NodeKey)> = graph
        .shots()
        .filter(|(_, _, shot)| shot.flags.iter().any(|f| flags_to_remove.contains(f)))
        .map(|(u, v, _)| (u, v))
        .collect();

    let mut report = RemovalReport::default();
    for (u, v) in &doomed {
        if graph.remove_shot(*u, *v).is_some() {
            report.shots_removed += 1;
        }
    }
    if report.shots_removed > 0 {
        report.stations_removed = graph.remove_isolates();
    }

    info!(
        "removed {} flagged shots and {} isolated stations, {} stations left",
        report.shots_removed,
        report.stations_removed,
        graph.len()
    );
    report
}
