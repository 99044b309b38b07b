use crate::error::{Result, io_err};
use crate::flags::join_flags;
use crate::graph::{CaveGraph, PropertyValue};
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, JsonValue, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

fn property_json(value: &PropertyValue) -> JsonValue {
    match value {
        PropertyValue::Number(n) => serde_json::Number::from_f64(*n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        PropertyValue::Text(s) => JsonValue::String(s.clone()),
    }
}

fn feature(geometry: Value, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(geometry)),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

fn extra_properties(props: &mut JsonObject, extra: &BTreeMap<String, PropertyValue>) {
    for (name, value) in extra {
        props.insert(name.clone(), property_json(value));
    }
}

/// Stations as 3D points followed by shots as two-vertex lines.
pub fn graph_to_feature_collection(graph: &CaveGraph) -> FeatureCollection {
    let mut features = Vec::with_capacity(graph.len() + graph.shot_count());

    for station in graph.stations() {
        let mut props = JsonObject::new();
        props.insert("kind".into(), "station".into());
        props.insert("id".into(), station.key.0.into());
        props.insert("flags".into(), join_flags(&station.flags).into());
        props.insert("fulladdress".into(), station.full_address.clone().into());
        extra_properties(&mut props, &station.properties);
        features.push(feature(Value::Point(station.pos.to_vec()), props));
    }

    for (u, v, shot) in graph.shots() {
        let (Some(a), Some(b)) = (graph.station(u), graph.station(v)) else {
            continue;
        };
        let mut props = JsonObject::new();
        props.insert("kind".into(), "shot".into());
        props.insert("source".into(), u.0.into());
        props.insert("target".into(), v.0.into());
        props.insert("flags".into(), join_flags(&shot.flags).into());
        extra_properties(&mut props, &shot.properties);
        features.push(feature(
            Value::LineString(vec![a.pos.to_vec(), b.pos.to_vec()]),
            props,
        ));
    }

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

pub fn write_geojson(graph: &CaveGraph, path: &Path) -> Result<()> {
    let collection = graph_to_feature_collection(graph);
    let file = File::create(path).map_err(|e| io_err!(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &collection)?;
    writer.flush().map_err(|e| io_err!(path, e))?;
    info!(
        "exported {} features to {}",
        collection.features.len(),
        path.display()
    );
    Ok(())
}
