// ===========================================================================
// Cave survey graph: stations (survey points) joined by shots (survey legs)
// ===========================================================================
use crate::error::{CaveGraphError, Result};
use crate::flags::Flag;
use ahash::{AHashMap, AHashSet};
use petgraph::algo::astar;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableUnGraph};
use petgraph::visit::{Bfs, EdgeRef, IntoEdgeReferences};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

/// Station identifier, stable across edits (unlike petgraph indices).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct NodeKey(pub u64);

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeKey {
    fn from(value: u64) -> Self {
        NodeKey(value)
    }
}

/// Free-form attribute value. Gocad and DBF exports only know numbers and text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Number(n) => write!(f, "{}", n),
            PropertyValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Number(value)
    }
}

impl From<usize> for PropertyValue {
    fn from(value: usize) -> Self {
        PropertyValue::Number(value as f64)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub key: NodeKey,
    /// [x, y, z], z positive upwards
    pub pos: [f64; 3],
    pub flags: Vec<Flag>,
    /// Original survey names merged into this station, e.g. `main.entrance.0@cave`
    pub full_address: Vec<String>,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl Station {
    pub fn new(key: impl Into<NodeKey>, pos: [f64; 3]) -> Self {
        Self {
            key: key.into(),
            pos,
            flags: Vec::new(),
            full_address: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.full_address.push(address.into());
        self
    }

    pub fn has_flag(&self, flag: &Flag) -> bool {
        self.flags.contains(flag)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Shot {
    pub flags: Vec<Flag>,
    pub properties: BTreeMap<String, PropertyValue>,
    /// Insertion stamp, set by [`CaveGraph::add_shot`]
    pub(crate) seq: u64,
}

impl PartialEq for Shot {
    fn eq(&self, other: &Self) -> bool {
        self.flags == other.flags && self.properties == other.properties
    }
}

impl Shot {
    pub fn new(flags: Vec<Flag>, properties: BTreeMap<String, PropertyValue>) -> Self {
        Self {
            flags,
            properties,
            seq: 0,
        }
    }

    pub fn flagged(flag: Flag) -> Self {
        Self::new(vec![flag], BTreeMap::new())
    }

    pub fn has_flag(&self, flag: &Flag) -> bool {
        self.flags.contains(flag)
    }
}

/// Undirected survey network keyed by [`NodeKey`].
///
/// Iteration order ("graph order") is the petgraph index order, which is
/// insertion order as long as no station has been removed and re-added.
/// Shots are ordered by insertion stamp instead: petgraph reuses the slots
/// of removed edges, so edge indices say nothing about age.
#[derive(Debug, Clone, Default)]
pub struct CaveGraph {
    graph: StableUnGraph<Station, Shot>,
    index: AHashMap<NodeKey, NodeIndex>,
    next_seq: u64,
}

impl CaveGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn shot_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.index.contains_key(&key)
    }

    pub(crate) fn index_of(&self, key: NodeKey) -> Result<NodeIndex> {
        self.index
            .get(&key)
            .copied()
            .ok_or(CaveGraphError::MissingNode(key))
    }

    pub(crate) fn key_of(&self, ix: NodeIndex) -> NodeKey {
        self.graph[ix].key
    }

    pub(crate) fn inner(&self) -> &StableUnGraph<Station, Shot> {
        &self.graph
    }

    pub fn add_station(&mut self, station: Station) -> Result<()> {
        if self.index.contains_key(&station.key) {
            return Err(CaveGraphError::DuplicateNode(station.key));
        }
        let key = station.key;
        let ix = self.graph.add_node(station);
        self.index.insert(key, ix);
        Ok(())
    }

    pub fn station(&self, key: NodeKey) -> Option<&Station> {
        self.index.get(&key).map(|&ix| &self.graph[ix])
    }

    pub fn station_mut(&mut self, key: NodeKey) -> Option<&mut Station> {
        match self.index.get(&key) {
            Some(&ix) => self.graph.node_weight_mut(ix),
            None => None,
        }
    }

    pub fn require_station(&self, key: NodeKey) -> Result<&Station> {
        self.station(key).ok_or(CaveGraphError::MissingNode(key))
    }

    pub fn remove_station(&mut self, key: NodeKey) -> Option<Station> {
        let ix = self.index.remove(&key)?;
        self.graph.remove_node(ix)
    }

    fn edge_between(&self, u: NodeKey, v: NodeKey) -> Option<EdgeIndex> {
        let a = *self.index.get(&u)?;
        let b = *self.index.get(&v)?;
        self.graph.find_edge(a, b)
    }

    /// Inserts the shot, replacing the attributes of an already existing `u`-`v` shot.
    /// A replaced shot keeps its place in the shot order.
    pub fn add_shot(&mut self, u: NodeKey, v: NodeKey, mut shot: Shot) -> Result<()> {
        let a = self.index_of(u)?;
        let b = self.index_of(v)?;
        shot.seq = match self.graph.find_edge(a, b) {
            Some(e) => self.graph[e].seq,
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        self.graph.update_edge(a, b, shot);
        Ok(())
    }

    pub fn has_shot(&self, u: NodeKey, v: NodeKey) -> bool {
        self.edge_between(u, v).is_some()
    }

    pub fn shot(&self, u: NodeKey, v: NodeKey) -> Option<&Shot> {
        self.edge_between(u, v).map(|e| &self.graph[e])
    }

    pub fn shot_mut(&mut self, u: NodeKey, v: NodeKey) -> Option<&mut Shot> {
        let e = self.edge_between(u, v)?;
        self.graph.edge_weight_mut(e)
    }

    pub fn remove_shot(&mut self, u: NodeKey, v: NodeKey) -> Option<Shot> {
        let e = self.edge_between(u, v)?;
        self.graph.remove_edge(e)
    }

    /// Stations in graph order.
    pub fn stations(&self) -> impl Iterator<Item = &Station> + '_ {
        self.graph.node_indices().map(move |ix| &self.graph[ix])
    }

    pub fn keys(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.stations().map(|s| s.key)
    }

    /// Shots as `(u, v, shot)`, oldest first.
    pub fn shots(&self) -> impl Iterator<Item = (NodeKey, NodeKey, &Shot)> + '_ {
        let mut edges: Vec<_> = self.graph.edge_references().collect();
        edges.sort_by_key(|e| e.weight().seq);
        edges.into_iter().map(move |e| {
            (
                self.graph[e.source()].key,
                self.graph[e.target()].key,
                e.weight(),
            )
        })
    }

    pub fn degree(&self, key: NodeKey) -> Option<usize> {
        let ix = *self.index.get(&key)?;
        Some(self.graph.edges(ix).count())
    }

    /// Neighbors ordered by the age of the connecting shot, oldest shot first.
    pub fn neighbors(&self, key: NodeKey) -> Result<Vec<NodeKey>> {
        let ix = self.index_of(key)?;
        let mut edges: Vec<(u64, NodeIndex)> = self
            .graph
            .edges(ix)
            .map(|e| (e.weight().seq, other_end(&e, ix)))
            .collect();
        edges.sort_by_key(|(seq, _)| *seq);
        Ok(edges.into_iter().map(|(_, n)| self.key_of(n)).collect())
    }

    pub fn max_key(&self) -> Option<NodeKey> {
        self.index.keys().max().copied()
    }

    /// First key strictly above every key in use.
    pub fn next_key(&self) -> NodeKey {
        self.max_key().map(|k| NodeKey(k.0 + 1)).unwrap_or_default()
    }

    /// Connected components in graph order; each component lists its stations in BFS order.
    pub fn connected_components(&self) -> Vec<Vec<NodeKey>> {
        let mut seen: AHashSet<NodeIndex> = AHashSet::new();
        let mut components = Vec::new();

        for start in self.graph.node_indices() {
            if seen.contains(&start) {
                continue;
            }
            let mut component = Vec::new();
            let mut bfs = Bfs::new(&self.graph, start);
            while let Some(ix) = bfs.next(&self.graph) {
                seen.insert(ix);
                component.push(self.key_of(ix));
            }
            components.push(component);
        }

        components
    }

    pub fn number_connected_components(&self) -> usize {
        self.connected_components().len()
    }

    /// An empty graph is not connected.
    pub fn is_connected(&self) -> bool {
        self.number_connected_components() == 1
    }

    pub fn isolates(&self) -> Vec<NodeKey> {
        self.graph
            .node_indices()
            .filter(|&ix| self.graph.edges(ix).next().is_none())
            .map(|ix| self.key_of(ix))
            .collect()
    }

    pub fn remove_isolates(&mut self) -> usize {
        let isolated = self.isolates();
        for key in &isolated {
            self.remove_station(*key);
        }
        isolated.len()
    }

    /// Hop counts from `source` to every station reachable within `cutoff` shots.
    pub fn shortest_path_lengths(
        &self,
        source: NodeKey,
        cutoff: Option<usize>,
    ) -> Result<AHashMap<NodeKey, usize>> {
        let start = self.index_of(source)?;
        let mut lengths: AHashMap<NodeIndex, usize> = AHashMap::new();
        let mut queue = VecDeque::new();
        lengths.insert(start, 0);
        queue.push_back(start);

        while let Some(ix) = queue.pop_front() {
            let depth = lengths[&ix];
            if cutoff.is_some_and(|c| depth >= c) {
                continue;
            }
            for n in self.graph.neighbors(ix) {
                if !lengths.contains_key(&n) {
                    lengths.insert(n, depth + 1);
                    queue.push_back(n);
                }
            }
        }

        Ok(lengths
            .into_iter()
            .map(|(ix, d)| (self.key_of(ix), d))
            .collect())
    }

    /// Fewest-shots path between two stations, both ends included.
    pub fn shortest_path(&self, from: NodeKey, to: NodeKey) -> Result<Option<Vec<NodeKey>>> {
        let a = self.index_of(from)?;
        let b = self.index_of(to)?;
        let path = astar(&self.graph, a, |ix| ix == b, |_| 1usize, |_| 0usize);
        Ok(path.map(|(_, nodes)| nodes.into_iter().map(|ix| self.key_of(ix)).collect()))
    }

    pub fn positions_3d(&self) -> BTreeMap<NodeKey, [f64; 3]> {
        self.stations().map(|s| (s.key, s.pos)).collect()
    }

    pub fn positions_2d(&self) -> BTreeMap<NodeKey, [f64; 2]> {
        self.stations().map(|s| (s.key, [s.pos[0], s.pos[1]])).collect()
    }

    pub fn positions_z(&self) -> BTreeMap<NodeKey, f64> {
        self.stations().map(|s| (s.key, s.pos[2])).collect()
    }

    /// Names of every attribute carried by at least one station.
    pub fn node_attribute_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for station in self.stations() {
            names.insert("pos".to_string());
            if !station.flags.is_empty() {
                names.insert("flags".to_string());
            }
            if !station.full_address.is_empty() {
                names.insert("fulladdress".to_string());
            }
            names.extend(station.properties.keys().cloned());
        }
        names
    }

    pub fn edge_attribute_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for (_, _, shot) in self.shots() {
            if !shot.flags.is_empty() {
                names.insert("flags".to_string());
            }
            names.extend(shot.properties.keys().cloned());
        }
        names
    }

    pub fn find_nodes_with_property(&self, name: &str, value: &PropertyValue) -> Vec<NodeKey> {
        self.stations()
            .filter(|s| s.properties.get(name) == Some(value))
            .map(|s| s.key)
            .collect()
    }

    pub fn find_nodes_with_flag(&self, flag: &Flag) -> Vec<NodeKey> {
        self.stations()
            .filter(|s| s.has_flag(flag))
            .map(|s| s.key)
            .collect()
    }
}

fn other_end<E: EdgeRef<NodeId = NodeIndex>>(edge: &E, ix: NodeIndex) -> NodeIndex {
    if edge.source() == ix {
        edge.target()
    } else {
        edge.source()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 0 - 1 - 2 - 3 with 1 - 4 branching off, plus an isolated 9.
    pub(crate) fn sample_graph() -> CaveGraph {
        let mut g = CaveGraph::new();
        for (k, pos) in [
            (0u64, [0.0, 0.0, 0.0]),
            (1, [1.0, 0.0, 0.0]),
            (2, [2.0, 0.0, -1.0]),
            (3, [3.0, 0.0, -1.0]),
            (4, [1.0, 1.0, 0.5]),
            (9, [10.0, 10.0, 10.0]),
        ] {
            g.add_station(Station::new(k, pos)).unwrap();
        }
        for (u, v) in [(0, 1), (1, 2), (2, 3), (1, 4)] {
            g.add_shot(NodeKey(u), NodeKey(v), Shot::default()).unwrap();
        }
        g
    }

    #[test]
    fn test_duplicate_station_rejected() {
        let mut g = sample_graph();
        let err = g.add_station(Station::new(3u64, [0.0; 3])).unwrap_err();
        assert!(matches!(err, CaveGraphError::DuplicateNode(NodeKey(3))));
    }

    #[test]
    fn test_shot_on_missing_station() {
        let mut g = sample_graph();
        assert!(matches!(
            g.add_shot(NodeKey(0), NodeKey(42), Shot::default()),
            Err(CaveGraphError::MissingNode(NodeKey(42)))
        ));
    }

    #[test]
    fn test_add_shot_replaces_attributes() {
        let mut g = sample_graph();
        g.add_shot(NodeKey(1), NodeKey(0), Shot::flagged(Flag::Surface))
            .unwrap();
        assert_eq!(g.shot_count(), 4);
        assert_eq!(g.shot(NodeKey(0), NodeKey(1)).unwrap().flags, vec![Flag::Surface]);
    }

    #[test]
    fn test_degree_and_neighbors() {
        let g = sample_graph();
        assert_eq!(g.degree(NodeKey(1)), Some(3));
        assert_eq!(g.degree(NodeKey(9)), Some(0));
        assert_eq!(g.degree(NodeKey(77)), None);
        assert_eq!(
            g.neighbors(NodeKey(1)).unwrap(),
            vec![NodeKey(0), NodeKey(2), NodeKey(4)]
        );
    }

    /// 0 joined to 1, 2 and 3; then 0-1 goes and 0-4 comes in the freed edge slot.
    pub(crate) fn rewired_star() -> CaveGraph {
        let mut g = CaveGraph::new();
        for k in 0..5u64 {
            g.add_station(Station::new(k, [k as f64, 0.0, 0.0])).unwrap();
        }
        for v in 1..4u64 {
            g.add_shot(NodeKey(0), NodeKey(v), Shot::default()).unwrap();
        }
        g.remove_shot(NodeKey(0), NodeKey(1)).unwrap();
        g.add_shot(NodeKey(0), NodeKey(4), Shot::flagged(Flag::Add))
            .unwrap();
        g
    }

    #[test]
    fn test_neighbors_follow_shot_age_after_removal() {
        let g = rewired_star();
        assert_eq!(
            g.neighbors(NodeKey(0)).unwrap(),
            vec![NodeKey(2), NodeKey(3), NodeKey(4)]
        );
        let order: Vec<_> = g.shots().map(|(_, v, _)| v).collect();
        assert_eq!(order, vec![NodeKey(2), NodeKey(3), NodeKey(4)]);
    }

    #[test]
    fn test_replaced_shot_keeps_its_place() {
        let mut g = rewired_star();
        g.add_shot(NodeKey(2), NodeKey(0), Shot::flagged(Flag::Surface))
            .unwrap();
        assert_eq!(
            g.neighbors(NodeKey(0)).unwrap(),
            vec![NodeKey(2), NodeKey(3), NodeKey(4)]
        );
    }

    #[test]
    fn test_components_and_isolates() {
        let mut g = sample_graph();
        let components = g.connected_components();
        assert_eq!(components.len(), 2);
        assert_eq!(components[0].len(), 5);
        assert_eq!(components[1], vec![NodeKey(9)]);
        assert!(!g.is_connected());

        assert_eq!(g.isolates(), vec![NodeKey(9)]);
        assert_eq!(g.remove_isolates(), 1);
        assert!(g.is_connected());
        assert!(!CaveGraph::new().is_connected());
    }

    #[test]
    fn test_shortest_path_lengths_cutoff() {
        let g = sample_graph();
        let all = g.shortest_path_lengths(NodeKey(0), None).unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[&NodeKey(3)], 3);
        assert_eq!(all[&NodeKey(4)], 2);

        let near = g.shortest_path_lengths(NodeKey(0), Some(1)).unwrap();
        let mut keys: Vec<_> = near.keys().copied().collect();
        keys.sort();
        assert_eq!(keys, vec![NodeKey(0), NodeKey(1)]);

        let only_self = g.shortest_path_lengths(NodeKey(0), Some(0)).unwrap();
        assert_eq!(only_self.len(), 1);
    }

    #[test]
    fn test_shortest_path() {
        let g = sample_graph();
        assert_eq!(
            g.shortest_path(NodeKey(4), NodeKey(3)).unwrap(),
            Some(vec![NodeKey(4), NodeKey(1), NodeKey(2), NodeKey(3)])
        );
        assert_eq!(g.shortest_path(NodeKey(4), NodeKey(9)).unwrap(), None);
    }

    #[test]
    fn test_positions_and_attribute_names() {
        let mut g = sample_graph();
        assert_eq!(g.positions_2d()[&NodeKey(2)], [2.0, 0.0]);
        assert_eq!(g.positions_z()[&NodeKey(2)], -1.0);
        assert_eq!(g.next_key(), NodeKey(10));

        g.station_mut(NodeKey(0))
            .unwrap()
            .properties
            .insert("cs_width".into(), PropertyValue::Number(2.5));
        g.station_mut(NodeKey(0)).unwrap().flags.push(Flag::Entrance);
        let names: Vec<_> = g.node_attribute_names().into_iter().collect();
        assert_eq!(names, vec!["cs_width", "flags", "pos"]);
        assert!(g.edge_attribute_names().is_empty());

        assert_eq!(
            g.find_nodes_with_property("cs_width", &PropertyValue::Number(2.5)),
            vec![NodeKey(0)]
        );
        assert_eq!(g.find_nodes_with_flag(&Flag::Entrance), vec![NodeKey(0)]);
    }
}
