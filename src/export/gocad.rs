//! Gocad ASCII export: `PLine` for the conduit network, `VSet` for stations.

use crate::branches::{detach, graph_to_branches};
use crate::error::{Result, io_err};
use crate::graph::{CaveGraph, NodeKey, Station};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_NODATA: &str = "-999999999";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GocadDataType {
    #[default]
    Lines,
    Points,
}

#[derive(Debug, Clone)]
pub struct GocadOptions {
    pub data_type: GocadDataType,
    /// Station properties written after the coordinates, one value per station.
    pub properties: Vec<String>,
    pub nodata_value: String,
    /// Output path without the `.pl` extension
    pub name: String,
    /// Stations to write as points; empty means all. Ignored for lines.
    pub node_ids: Vec<NodeKey>,
}

impl Default for GocadOptions {
    fn default() -> Self {
        Self {
            data_type: GocadDataType::Lines,
            properties: Vec::new(),
            nodata_value: DEFAULT_NODATA.to_string(),
            name: "graph_gocad_export".to_string(),
            node_ids: Vec::new(),
        }
    }
}

impl GocadOptions {
    fn header_name(&self) -> &str {
        Path::new(&self.name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.name)
    }
}

fn coordinates(station: &Station) -> String {
    format!("{} {} {}", station.pos[0], station.pos[1], station.pos[2])
}

fn property_values(station: &Station, opts: &GocadOptions) -> Vec<String> {
    opts.properties
        .iter()
        .map(|name| match station.properties.get(name) {
            Some(value) => value.to_string(),
            None => {
                warn!("no property {} for station {}", name, station.key);
                opts.nodata_value.clone()
            }
        })
        .collect()
}

fn join_line(parts: impl IntoIterator<Item = String>) -> String {
    parts.into_iter().filter(|p| !p.is_empty()).join(" ")
}

fn header(kind: &str, property_line: String, opts: &GocadOptions) -> Vec<String> {
    let nodata = itertools::repeat_n(&opts.nodata_value, opts.properties.len() + 3).join(" ");
    vec![
        kind.to_string(),
        "HEADER{".to_string(),
        format!("name:{}", opts.header_name()),
        "}".to_string(),
        "GOCAD_ORIGINAL_COORDINATE_SYSTEM".to_string(),
        "ZPOSITIVE Elevation".to_string(),
        "END_ORIGINAL_COORDINATE_SYSTEM".to_string(),
        property_line,
        format!("NO_DATA_VALUES {}", nodata),
    ]
}

/// `GOCAD VSet` lines: one `PVRTX` per station, with its key as `ID` property.
pub fn points_document(graph: &CaveGraph, opts: &GocadOptions) -> Result<Vec<String>> {
    let mut lines = header(
        "GOCAD VSet 1.0",
        join_line(
            ["PROPERTIES".to_string(), "ID".to_string()]
                .into_iter()
                .chain(opts.properties.iter().cloned()),
        ),
        opts,
    );
    lines.push("SUBVSET".to_string());

    let keys: Vec<NodeKey> = if opts.node_ids.is_empty() {
        graph.keys().collect()
    } else {
        opts.node_ids.clone()
    };

    for key in keys {
        let station = graph.require_station(key)?;
        lines.push(join_line(
            [
                "PVRTX".to_string(),
                key.to_string(),
                coordinates(station),
                key.to_string(),
            ]
            .into_iter()
            .chain(property_values(station, opts)),
        ));
    }

    lines.push("END".to_string());
    Ok(lines)
}

/// `GOCAD PLine` lines: one `ILINE` per branch, vertices in path order then segments.
pub fn lines_document(graph: &CaveGraph, opts: &GocadOptions) -> Result<Vec<String>> {
    let mut lines = header(
        "GOCAD PLine 1",
        join_line(
            std::iter::once("PROPERTIES".to_string()).chain(opts.properties.iter().cloned()),
        ),
        opts,
    );

    let mut branches = graph_to_branches(graph)?;
    let mut next_key = branches.next_key();

    for component in branches.connected_components() {
        if component.len() < 2 {
            warn!("station {} has no shot, left out of the PLine", component[0]);
            continue;
        }

        let mut ends: Vec<NodeKey> = component
            .iter()
            .copied()
            .filter(|&k| branches.degree(k) == Some(1))
            .collect();

        if ends.is_empty() {
            // loop: open it at its first station
            let first = component[0];
            let neighbor = branches.neighbors(first)?[0];
            detach(&mut branches, first, neighbor, next_key)?;
            ends = vec![first, next_key];
            next_key = NodeKey(next_key.0 + 1);
        }

        let Some(path) = branches.shortest_path(ends[0], ends[ends.len() - 1])? else {
            continue;
        };

        lines.push("ILINE".to_string());
        for key in &path {
            let station = branches.require_station(*key)?;
            lines.push(join_line(
                ["PVRTX".to_string(), key.to_string(), coordinates(station)]
                    .into_iter()
                    .chain(property_values(station, opts)),
            ));
        }
        for pair in path.windows(2) {
            lines.push(format!("SEG {} {}", pair[0], pair[1]));
        }
    }

    lines.push("END".to_string());
    Ok(lines)
}

pub fn write_gocad<W: Write>(graph: &CaveGraph, opts: &GocadOptions, writer: &mut W) -> Result<()> {
    let lines = match opts.data_type {
        GocadDataType::Lines => lines_document(graph, opts)?,
        GocadDataType::Points => points_document(graph, opts)?,
    };
    writer
        .write_all(lines.join("\n").as_bytes())
        .map_err(|e| io_err!(Path::new(&opts.name), e))?;
    Ok(())
}

/// Writes `<name>.pl`.
pub fn export_to_gocad(graph: &CaveGraph, opts: &GocadOptions) -> Result<PathBuf> {
    let path = PathBuf::from(format!("{}.pl", opts.name));
    let file = File::create(&path).map_err(|e| io_err!(&path, e))?;
    let mut writer = BufWriter::new(file);
    write_gocad(graph, opts, &mut writer)?;
    writer.flush().map_err(|e| io_err!(&path, e))?;
    info!("exported {:?} to {}", opts.data_type, path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::sample_graph;
    use crate::graph::{PropertyValue, Shot};

    #[test]
    fn test_points_document() {
        let mut g = sample_graph();
        g.station_mut(NodeKey(0))
            .unwrap()
            .properties
            .insert("cs_width".into(), PropertyValue::Number(2.5));
        let opts = GocadOptions {
            data_type: GocadDataType::Points,
            properties: vec!["cs_width".into()],
            node_ids: vec![NodeKey(0), NodeKey(2)],
            name: "out/cave".into(),
            ..Default::default()
        };
        let lines = points_document(&g, &opts).unwrap();
        assert_eq!(lines[0], "GOCAD VSet 1.0");
        assert_eq!(lines[2], "name:cave");
        assert_eq!(lines[7], "PROPERTIES ID cs_width");
        assert_eq!(
            lines[8],
            "NO_DATA_VALUES -999999999 -999999999 -999999999 -999999999"
        );
        assert_eq!(lines[9], "SUBVSET");
        assert_eq!(lines[10], "PVRTX 0 0 0 0 0 2.5");
        assert_eq!(lines[11], "PVRTX 2 2 0 -1 2 -999999999");
        assert_eq!(lines.last().unwrap(), "END");
    }

    #[test]
    fn test_points_unknown_station() {
        let g = sample_graph();
        let opts = GocadOptions {
            data_type: GocadDataType::Points,
            node_ids: vec![NodeKey(55)],
            ..Default::default()
        };
        assert!(points_document(&g, &opts).is_err());
    }

    #[test]
    fn test_lines_document_branches() {
        let g = sample_graph();
        let lines = lines_document(&g, &GocadOptions::default()).unwrap();
        assert_eq!(lines[0], "GOCAD PLine 1");
        assert_eq!(lines[7], "PROPERTIES");

        let ilines = lines.iter().filter(|l| *l == "ILINE").count();
        // 0-1-2-3 and 10-4; the isolated station 9 is skipped
        assert_eq!(ilines, 2);
        let segs: Vec<&String> = lines.iter().filter(|l| l.starts_with("SEG")).collect();
        assert_eq!(segs.len(), 4);
        assert!(lines.contains(&"SEG 0 1".to_string()) || lines.contains(&"SEG 3 2".to_string()));
        assert!(lines.contains(&"PVRTX 10 1 0 0".to_string()));
        assert!(!lines.iter().any(|l| l.starts_with("PVRTX 9 ")));
    }

    #[test]
    fn test_lines_document_opens_loops() {
        let mut g = CaveGraph::new();
        for k in 0..3u64 {
            g.add_station(Station::new(k, [k as f64, (k % 2) as f64, 0.0]))
                .unwrap();
        }
        for (u, v) in [(0, 1), (1, 2), (2, 0)] {
            g.add_shot(NodeKey(u), NodeKey(v), Shot::default()).unwrap();
        }
        let lines = lines_document(&g, &GocadOptions::default()).unwrap();
        let pvrtx = lines.iter().filter(|l| l.starts_with("PVRTX")).count();
        let segs = lines.iter().filter(|l| l.starts_with("SEG")).count();
        assert_eq!(pvrtx, 4);
        assert_eq!(segs, 3);
        assert!(lines.contains(&"PVRTX 3 0 0 0".to_string()));
    }

    #[test]
    fn test_export_writes_file() {
        let g = sample_graph();
        let name = std::env::temp_dir()
            .join("cavegraph_gocad_test")
            .to_string_lossy()
            .to_string();
        let opts = GocadOptions {
            name,
            ..Default::default()
        };
        let path = export_to_gocad(&g, &opts).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("GOCAD PLine 1\nHEADER{\nname:cavegraph_gocad_test\n}"));
        assert!(text.ends_with("END"));
        std::fs::remove_file(path).unwrap();
    }
}
