use std::collections::BTreeMap;

use gridref_refs::{ArrayMetadata, InlineValue, RefValue, ReferenceFragment};
use serde_json::{Value, json};

pub(crate) const URI: &str = "s3://bucket/hrrr.t00z.wrfsfcf01.grib2";

fn inline(values: &[f64]) -> RefValue {
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    RefValue::Inline(InlineValue::encode(&bytes))
}

fn document(value: &impl serde::Serialize) -> RefValue {
    RefValue::text(serde_json::to_string(value).unwrap())
}

/// Insert a raw `<f8` coordinate array holding `values`; 0-d when `dims` is empty.
pub(crate) fn set_coordinate(fragment: &mut ReferenceFragment, name: &str, dims: &[&str], values: &[f64]) {
    let shape = if dims.is_empty() { vec![] } else { vec![values.len()] };
    let meta = ArrayMetadata::single_chunk(shape, "<f8", Value::Null);
    fragment.refs.insert(format!("{name}/.zarray"), document(&meta));
    fragment
        .refs
        .insert(format!("{name}/.zattrs"), document(&json!({"_ARRAY_DIMENSIONS": dims})));
    fragment.refs.insert(format!("{name}/0"), inline(values));
}

/// A decoded message holding `var` on a 2x3 lat/lon grid with the given variable attributes.
pub(crate) fn fragment(var: &str, var_attrs: Value, coordinates: &str) -> ReferenceFragment {
    let mut fragment = ReferenceFragment::new(BTreeMap::new());
    fragment
        .refs
        .insert(".zgroup".to_string(), RefValue::text(r#"{"zarr_format":2}"#));
    fragment.refs.insert(
        ".zattrs".to_string(),
        document(&json!({"GRIB_centre": "kwbc", "coordinates": coordinates})),
    );

    let mut attrs = var_attrs;
    if let Value::Object(map) = &mut attrs {
        map.insert("_ARRAY_DIMENSIONS".to_string(), json!(["latitude", "longitude"]));
        map.insert("coordinates".to_string(), json!(coordinates));
    }
    let meta = ArrayMetadata {
        compressor: Some(json!({"id": "grib"})),
        ..ArrayMetadata::single_chunk(vec![2, 3], "<f8", json!("NaN"))
    };
    fragment.refs.insert(format!("{var}/.zarray"), document(&meta));
    fragment.refs.insert(format!("{var}/.zattrs"), document(&attrs));
    fragment
        .refs
        .insert(format!("{var}/0.0"), RefValue::range(URI, 0, 1_000));

    for name in coordinates.split(' ').filter(|name| !name.is_empty()) {
        match name {
            "latitude" => set_coordinate(&mut fragment, name, &["latitude"], &[38.0, 39.0]),
            "longitude" => set_coordinate(&mut fragment, name, &["longitude"], &[250.0, 251.0, 252.0]),
            _ => set_coordinate(&mut fragment, name, &[], &[0.0]),
        }
    }
    fragment
}

/// A temperature message on a single level of `level_type`.
pub(crate) fn level_fragment(var: &str, step_type: &str, level_type: &str, level: i32) -> ReferenceFragment {
    let mut fragment = fragment(
        var,
        json!({
            "GRIB_name": "Temperature",
            "GRIB_stepType": step_type,
            "GRIB_typeOfLevel": level_type,
        }),
        &format!("{level_type} latitude longitude"),
    );
    set_coordinate(&mut fragment, level_type, &[], &[f64::from(level)]);
    fragment
}
