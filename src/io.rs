// ===========================================================================
// Reading and writing cave graphs: JSON documents and node/edge CSV tables
// ===========================================================================
use crate::connection::PotentialConnection;
use crate::error::{Result, io_err};
use crate::flags::{Flag, join_flags, split_flags};
use crate::graph::{CaveGraph, NodeKey, PropertyValue, Shot, Station};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationRecord {
    pub id: NodeKey,
    pub pos: [f64; 3],
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<Flag>,
    #[serde(default, rename = "fulladdress", skip_serializing_if = "Vec::is_empty")]
    pub full_address: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShotRecord {
    pub source: NodeKey,
    pub target: NodeKey,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<Flag>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyValue>,
}

/// On-disk form of a [`CaveGraph`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDocument {
    pub nodes: Vec<StationRecord>,
    pub edges: Vec<ShotRecord>,
}

impl GraphDocument {
    pub fn from_graph(graph: &CaveGraph) -> Self {
        let nodes = graph
            .stations()
            .map(|s| StationRecord {
                id: s.key,
                pos: s.pos,
                flags: s.flags.clone(),
                full_address: s.full_address.clone(),
                properties: s.properties.clone(),
            })
            .collect();
        let edges = graph
            .shots()
            .map(|(u, v, shot)| ShotRecord {
                source: u,
                target: v,
                flags: shot.flags.clone(),
                properties: shot.properties.clone(),
            })
            .collect();
        Self { nodes, edges }
    }

    pub fn into_graph(self) -> Result<CaveGraph> {
        let mut graph = CaveGraph::new();
        for node in self.nodes {
            graph.add_station(Station {
                key: node.id,
                pos: node.pos,
                flags: node.flags,
                full_address: node.full_address,
                properties: node.properties,
            })?;
        }
        for edge in self.edges {
            graph.add_shot(
                edge.source,
                edge.target,
                Shot::new(edge.flags, edge.properties),
            )?;
        }
        Ok(graph)
    }
}

pub fn load_json(path: &Path) -> Result<CaveGraph> {
    let file = File::open(path).map_err(|e| io_err!(path, e))?;
    let document: GraphDocument = serde_json::from_reader(BufReader::new(file))?;
    let graph = document.into_graph()?;
    info!(
        "loaded {} stations and {} shots from {}",
        graph.len(),
        graph.shot_count(),
        path.display()
    );
    Ok(graph)
}

pub fn save_json(graph: &CaveGraph, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|e| io_err!(path, e))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &GraphDocument::from_graph(graph))?;
    info!("saved graph to {}", path.display());
    Ok(())
}

#[derive(Debug, Deserialize)]
struct NodeRow {
    id: u64,
    x: f64,
    y: f64,
    z: f64,
    #[serde(default)]
    flags: String,
    #[serde(default)]
    fulladdress: String,
}

#[derive(Debug, Deserialize)]
struct EdgeRow {
    source: u64,
    target: u64,
    #[serde(default)]
    flags: String,
}

/// Reads `id,x,y,z[,flags][,fulladdress]` and `source,target[,flags]` tables.
/// Multi-valued columns are `;`-separated.
pub fn load_csv(nodes_path: &Path, edges_path: &Path) -> Result<CaveGraph> {
    let mut graph = CaveGraph::new();

    let mut nodes = csv::Reader::from_path(nodes_path)?;
    for row in nodes.deserialize() {
        let row: NodeRow = row?;
        let mut station = Station::new(row.id, [row.x, row.y, row.z]);
        station.flags = split_flags(&row.flags);
        station.full_address = row
            .fulladdress
            .split(';')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(String::from)
            .collect();
        graph.add_station(station)?;
    }

    let mut edges = csv::Reader::from_path(edges_path)?;
    for row in edges.deserialize() {
        let row: EdgeRow = row?;
        let shot = Shot::new(split_flags(&row.flags), BTreeMap::new());
        graph.add_shot(NodeKey(row.source), NodeKey(row.target), shot)?;
    }

    info!(
        "loaded {} stations and {} shots from {} / {}",
        graph.len(),
        graph.shot_count(),
        nodes_path.display(),
        edges_path.display()
    );
    Ok(graph)
}

#[derive(Debug, Serialize)]
struct ConnectionRow {
    from: u64,
    to: u64,
    distance: Option<f64>,
    angles: String,
}

pub fn write_connections_csv(path: &Path, proposals: &[PotentialConnection]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for p in proposals {
        writer.serialize(ConnectionRow {
            from: p.from.0,
            to: p.to.0,
            distance: p.distance,
            angles: p
                .angles
                .as_ref()
                .map(|a| a.iter().join(";"))
                .unwrap_or_default(),
        })?;
    }
    writer.flush().map_err(|e| io_err!(path, e))?;
    Ok(())
}

/// Shots as a CSV edge table, flags `;`-joined.
pub fn write_edges_csv(graph: &CaveGraph, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["source", "target", "flags"])?;
    for (u, v, shot) in graph.shots() {
        writer.write_record([u.to_string(), v.to_string(), join_flags(&shot.flags)])?;
    }
    writer.flush().map_err(|e| io_err!(path, e))?;
    Ok(())
}
