pub mod geojson;
pub mod gocad;
pub mod shapefile;

pub use gocad::{GocadDataType, GocadOptions, export_to_gocad};
pub use shapefile::{ShapeKind, to_shapefile};
