use crate::graph::NodeKey;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaveGraphError {
    #[error("node {0} is not in the graph")]
    MissingNode(NodeKey),
    #[error("edge {0}-{1} is not in the graph")]
    MissingEdge(NodeKey, NodeKey),
    #[error("address '{0}' does not belong to any node")]
    UnknownAddress(String),
    #[error("node {0} already exists")]
    DuplicateNode(NodeKey),
    #[error("I/O error accessing path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("export failed: {0}")]
    Export(String),
}

pub type Result<T> = std::result::Result<T, CaveGraphError>;

macro_rules! io_err {
    ($path:expr, $err:expr) => {
        $crate::error::CaveGraphError::Io {
            path: $path.to_path_buf(),
            source: $err,
        }
    };
}

pub(crate) use io_err;
