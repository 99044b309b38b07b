//! Full-address lookups.
//!
//! Survey stations sharing a position are merged into one graph node on
//! import; the node keeps every original survey name in
//! [`Station::full_address`](crate::graph::Station). Users usually refer to
//! stations by those names, so cleaning operations accept either form.

use crate::error::{CaveGraphError, Result, io_err};
use crate::graph::{CaveGraph, NodeKey};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// A station given either by graph key or by one of its survey names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeRef {
    Key(NodeKey),
    Address(String),
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::Key(k) => write!(f, "{}", k),
            NodeRef::Address(a) => f.write_str(a),
        }
    }
}

impl From<u64> for NodeRef {
    fn from(value: u64) -> Self {
        NodeRef::Key(NodeKey(value))
    }
}

impl From<NodeKey> for NodeRef {
    fn from(value: NodeKey) -> Self {
        NodeRef::Key(value)
    }
}

impl From<&str> for NodeRef {
    fn from(value: &str) -> Self {
        NodeRef::Address(value.to_string())
    }
}

/// Inverse index from survey name to node key.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    inverse: AHashMap<String, NodeKey>,
}

impl AddressBook {
    pub fn from_graph(graph: &CaveGraph) -> Self {
        let mut inverse = AHashMap::new();
        for station in graph.stations() {
            for address in &station.full_address {
                inverse.insert(address.clone(), station.key);
            }
        }
        Self { inverse }
    }

    /// Builds the index from an explicit `{node: [names]}` mapping.
    pub fn from_dict(dict: &BTreeMap<NodeKey, Vec<String>>) -> Self {
        let inverse = dict
            .iter()
            .flat_map(|(k, names)| names.iter().map(move |n| (n.clone(), *k)))
            .collect();
        Self { inverse }
    }

    pub fn len(&self) -> usize {
        self.inverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inverse.is_empty()
    }

    pub fn lookup(&self, address: &str) -> Option<NodeKey> {
        self.inverse.get(address).copied()
    }

    /// Keys pass through untouched; addresses must be known.
    pub fn resolve(&self, node: &NodeRef) -> Result<NodeKey> {
        match node {
            NodeRef::Key(k) => Ok(*k),
            NodeRef::Address(a) => self
                .lookup(a)
                .ok_or_else(|| CaveGraphError::UnknownAddress(a.clone())),
        }
    }
}

/// First station (in graph order) whose survey names contain `address`.
pub fn find_key_from_fulladdress(graph: &CaveGraph, address: &str) -> Option<NodeKey> {
    let found = graph
        .stations()
        .find(|s| s.full_address.iter().any(|a| a == address))
        .map(|s| s.key);
    if found.is_none() {
        tracing::warn!("{} is missing in the graph full addresses", address);
    }
    found
}

pub fn find_key_from_dict<K, V>(dict: &BTreeMap<K, Vec<V>>, value: &V) -> Option<K>
where
    K: Clone,
    V: PartialEq,
{
    dict.iter()
        .find(|(_, values)| values.contains(value))
        .map(|(k, _)| k.clone())
}

/// Groups `values` under their paired key, keeping the input order inside each group.
pub fn list2dict<K, V>(keys: &[K], values: &[V]) -> BTreeMap<K, Vec<V>>
where
    K: Ord + Clone,
    V: Clone,
{
    let mut grouped: BTreeMap<K, Vec<V>> = BTreeMap::new();
    for (k, v) in keys.iter().zip(values) {
        grouped.entry(k.clone()).or_default().push(v.clone());
    }
    grouped
}

/// `output/folder`, created if needed.
pub fn make_filepath(output: &Path, folder: &str) -> Result<PathBuf> {
    let path = output.join(folder.trim_end_matches('/'));
    std::fs::create_dir_all(&path).map_err(|e| io_err!(&path, e))?;
    Ok(path)
}
