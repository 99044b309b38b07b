#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::op_ref
)]

pub mod address;
pub mod branches;
pub mod cleaning;
pub mod config;
pub mod connection;
pub mod error;
pub mod export;
pub mod flags;
pub mod graph;
pub mod io;

pub use error::{CaveGraphError, Result};
pub use flags::Flag;
pub use graph::{CaveGraph, NodeKey, PropertyValue, Shot, Station};
