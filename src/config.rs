use crate::address::{AddressBook, NodeRef};
use crate::cleaning::{RemovalReport, add_edges, flag_edges, flag_nodes, remove_flagged_edges};
use crate::connection::ConnectionParams;
use crate::error::{CaveGraphError, Result, io_err};
use crate::export::gocad::DEFAULT_NODATA;
use crate::flags::Flag;
use crate::graph::CaveGraph;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// RON maps kept as `(key, value)` lists in file order.
mod in_file_order {
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::fmt;
    use std::marker::PhantomData;

    pub fn serialize<S, K, V>(entries: &[(K, V)], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        K: Serialize,
        V: Serialize,
    {
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (k, v) in entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }

    struct EntriesVisitor<K, V>(PhantomData<(K, V)>);

    impl<'de, K, V> Visitor<'de> for EntriesVisitor<K, V>
    where
        K: Deserialize<'de>,
        V: Deserialize<'de>,
    {
        type Value = Vec<(K, V)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some(entry) = access.next_entry()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }

    pub fn deserialize<'de, D, K, V>(deserializer: D) -> Result<Vec<(K, V)>, D::Error>
    where
        D: Deserializer<'de>,
        K: Deserialize<'de>,
        V: Deserialize<'de>,
    {
        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

/// Manual corrections and processing parameters for one cave, stored as RON.
///
/// `flagged_nodes` and `flagged_edges` are RON maps applied in the order
/// they are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningConfig {
    #[serde(with = "in_file_order")]
    pub flagged_nodes: Vec<(Flag, Vec<NodeRef>)>,
    #[serde(with = "in_file_order")]
    pub flagged_edges: Vec<(Flag, Vec<(NodeRef, NodeRef)>)>,
    pub additional_edges: Vec<(NodeRef, NodeRef)>,
    pub flags_to_remove: Vec<Flag>,
    pub connection: Option<ConnectionParams>,
    pub export: ExportConfig,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            flagged_nodes: Vec::new(),
            flagged_edges: Vec::new(),
            additional_edges: Vec::new(),
            flags_to_remove: Flag::default_removed(),
            connection: None,
            export: ExportConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub name: String,
    /// Coordinate reference system as WKT, copied into `.prj` files
    pub crs_wkt: Option<String>,
    pub properties: Vec<String>,
    pub nodata_value: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            name: "graph_gocad_export".to_string(),
            crs_wkt: None,
            properties: Vec::new(),
            nodata_value: DEFAULT_NODATA.to_string(),
        }
    }
}

impl CleaningConfig {
    pub fn from_ron_str(s: &str) -> Result<Self> {
        ron::from_str(s).map_err(|e| CaveGraphError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| io_err!(path, e))?;
        Self::from_ron_str(&text)
    }

    /// Adds the extra shots and flags, then drops the flagged shots.
    pub fn apply(&self, graph: &mut CaveGraph) -> Result<RemovalReport> {
        let book = AddressBook::from_graph(graph);
        let book = (!book.is_empty()).then_some(&book);

        if !self.additional_edges.is_empty() {
            add_edges(graph, &self.additional_edges, book, Flag::Add)?;
        }
        if !self.flagged_nodes.is_empty() {
            flag_nodes(graph, &self.flagged_nodes, book)?;
        }
        if !self.flagged_edges.is_empty() {
            flag_edges(graph, &self.flagged_edges, book)?;
        }
        Ok(remove_flagged_edges(graph, &self.flags_to_remove))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeKey, Shot, Station};

    const SAMPLE: &str = r#"
(
    flagged_nodes: {
        "ent": ["main.0@cave"],
    },
    flagged_edges: {
        "srf": [("main.0@cave", "main.1@cave")],
        "dpl": [(2, 3)],
    },
    additional_edges: [(1, 3)],
    connection: Some((
        dist_horiz_max: 20.0,
        dist_vert_max: 5.0,
    )),
    export: (
        name: "out/cave",
        properties: ["connected_component_number"],
    ),
)
"#;

    #[test]
    fn test_parse_ron() {
        let config = CleaningConfig::from_ron_str(SAMPLE).unwrap();
        assert_eq!(config.flags_to_remove, Flag::default_removed());
        assert_eq!(
            config.flagged_nodes,
            vec![(Flag::Entrance, vec![NodeRef::from("main.0@cave")])]
        );
        // file order, not code order
        let edge_flags: Vec<&Flag> = config.flagged_edges.iter().map(|(f, _)| f).collect();
        assert_eq!(edge_flags, vec![&Flag::Surface, &Flag::Duplicate]);
        assert_eq!(
            config.flagged_edges[1].1,
            vec![(NodeRef::from(2u64), NodeRef::from(3u64))]
        );
        let connection = config.connection.unwrap();
        assert_eq!(connection.node_deg, 1);
        assert_eq!(connection.exclude_neighbors_up_to_edge, 3);
        assert_eq!(config.export.nodata_value, DEFAULT_NODATA);
    }

    #[test]
    fn test_flag_maps_survive_ron_round_trip() {
        let config = CleaningConfig::from_ron_str(SAMPLE).unwrap();
        let text = ron::to_string(&config).unwrap();
        let back = CleaningConfig::from_ron_str(&text).unwrap();
        assert_eq!(back.flagged_edges, config.flagged_edges);
        assert_eq!(back.flagged_nodes, config.flagged_nodes);
    }

    #[test]
    fn test_bad_ron() {
        assert!(matches!(
            CleaningConfig::from_ron_str("(flagged_nodes: 3)"),
            Err(CaveGraphError::Config(_))
        ));
    }

    #[test]
    fn test_apply() {
        let mut g = CaveGraph::new();
        for k in 0..4u64 {
            g.add_station(
                Station::new(k, [k as f64, 0.0, 0.0]).with_address(format!("main.{}@cave", k)),
            )
            .unwrap();
        }
        for k in 0..3u64 {
            g.add_shot(NodeKey(k), NodeKey(k + 1), Shot::default()).unwrap();
        }

        let config = CleaningConfig::from_ron_str(SAMPLE).unwrap();
        let report = config.apply(&mut g).unwrap();

        // 0-1 is surface and 2-3 duplicate; 1-3 was added
        assert_eq!(report.shots_removed, 2);
        assert_eq!(report.stations_removed, 1);
        assert!(!g.contains(NodeKey(0)));
        assert!(g.has_shot(NodeKey(1), NodeKey(3)));
        assert!(g.is_connected());
    }
}
