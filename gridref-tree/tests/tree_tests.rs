use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use gridref_error::GridRefResult;
use gridref_metrics::{Diagnostics, Event};
use gridref_refs::{ArrayMetadata, FlatManifest, InlineValue, RefValue, ReferenceFragment};
use gridref_tree::{
    AggregationEngine, ExecutionMode, ManifestTree, RemoteOptions, TreeOptions, build_tree,
};
use rstest::rstest;
use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Call {
    members: usize,
    concat_dims: Vec<String>,
    identical_dims: Vec<String>,
}

/// Stacks the data chunks of every member along a new leading axis.
#[derive(Default)]
struct StackingEngine {
    calls: Mutex<Vec<Call>>,
}

impl StackingEngine {
    fn calls(&self) -> Vec<Call> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort_by_key(|call| call.members);
        calls
    }
}

impl AggregationEngine for StackingEngine {
    fn merge(
        &self,
        fragments: &[Arc<ReferenceFragment>],
        concat_dims: &[String],
        identical_dims: &[String],
        _remote_options: &RemoteOptions,
    ) -> GridRefResult<FlatManifest> {
        self.calls.lock().unwrap().push(Call {
            members: fragments.len(),
            concat_dims: concat_dims.to_vec(),
            identical_dims: identical_dims.to_vec(),
        });
        let mut refs = BTreeMap::new();
        for (i, fragment) in fragments.iter().enumerate() {
            for (key, value) in fragment.render_templates().refs {
                let key = match key.strip_suffix("/0.0") {
                    Some(var) => format!("{var}/{i}.0.0"),
                    None => key,
                };
                refs.entry(key).or_insert(value);
            }
        }
        Ok(FlatManifest::new(refs))
    }
}

fn document(value: &impl serde::Serialize) -> RefValue {
    RefValue::text(serde_json::to_string(value).unwrap())
}

fn scalar(refs: &mut BTreeMap<String, RefValue>, name: &str, value: f64) {
    refs.insert(
        format!("{name}/.zarray"),
        document(&ArrayMetadata::single_chunk(vec![], "<f8", Value::Null)),
    );
    refs.insert(format!("{name}/.zattrs"), document(&json!({"_ARRAY_DIMENSIONS": []})));
    refs.insert(
        format!("{name}/0"),
        RefValue::Inline(InlineValue::encode(&value.to_le_bytes())),
    );
}

fn message(var: &str, step_type: &str, level_type: &str, level: f64, offset: u64) -> Arc<ReferenceFragment> {
    let coordinates = format!("time step {level_type}");
    let mut refs = BTreeMap::new();
    refs.insert(".zgroup".to_string(), RefValue::text(r#"{"zarr_format":2}"#));
    refs.insert(".zattrs".to_string(), document(&json!({"coordinates": coordinates})));
    refs.insert(
        format!("{var}/.zarray"),
        document(&ArrayMetadata::single_chunk(vec![1, 1], "<f4", Value::Null)),
    );
    refs.insert(
        format!("{var}/.zattrs"),
        document(&json!({
            "_ARRAY_DIMENSIONS": ["y", "x"],
            "GRIB_name": var,
            "GRIB_stepType": step_type,
            "GRIB_typeOfLevel": level_type,
        })),
    );
    refs.insert(format!("{var}/0.0"), RefValue::range("{{u}}", offset, 100));
    scalar(&mut refs, "time", 0.0);
    scalar(&mut refs, "step", 1.0);
    scalar(&mut refs, level_type, level);
    Arc::new(ReferenceFragment::new(refs).with_template("u", "file.grib2"))
}

fn messages() -> Vec<Arc<ReferenceFragment>> {
    vec![
        message("t", "instant", "isobaricInhPa", 2.0, 0),
        message("u", "instant", "heightAboveGround", 10.0, 100),
        message("t", "instant", "isobaricInhPa", 10.0, 200),
        message("unknown", "instant", "surface", 0.0, 300),
        message("t", "instant", "isobaricInhPa", 10.0, 400),
        message("tp", "accum", "surface", 0.0, 500),
    ]
}

#[test]
fn varying_levels_are_concatenated() {
    let engine = StackingEngine::default();
    let diagnostics = Diagnostics::default();
    let manifest = build_tree(messages(), &engine, &TreeOptions::default(), &diagnostics).unwrap();

    assert_eq!(
        engine.calls(),
        vec![
            Call {
                members: 1,
                concat_dims: vec!["time".into(), "step".into()],
                identical_dims: vec!["longitude".into(), "latitude".into(), "surface".into()],
            },
            Call {
                members: 1,
                concat_dims: vec!["time".into(), "step".into()],
                identical_dims: vec!["longitude".into(), "latitude".into(), "heightAboveGround".into()],
            },
            Call {
                members: 3,
                concat_dims: vec!["time".into(), "step".into(), "isobaricInhPa".into()],
                identical_dims: vec!["longitude".into(), "latitude".into()],
            },
        ]
    );

    for key in [
        "t/instant/isobaricInhPa/t/0.0.0",
        "t/instant/isobaricInhPa/t/2.0.0",
        "u/instant/heightAboveGround/u/0.0.0",
        "tp/accum/surface/tp/0.0.0",
    ] {
        assert!(manifest.refs.contains_key(key), "{key}");
    }
    assert!(!manifest.refs.keys().any(|key| key.starts_with("unknown")));
    assert_eq!(diagnostics.count(Event::DroppedUnknownVariable), 1);
}

#[rstest]
#[case(ExecutionMode::Inline)]
#[case(ExecutionMode::Rayon)]
#[case(ExecutionMode::RayonThreadPool(Arc::new(
    rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap()
)))]
fn output_is_deterministic(#[case] mode: ExecutionMode) {
    let options = TreeOptions::default().with_execution_mode(mode);
    let first = build_tree(messages(), &StackingEngine::default(), &options, &Diagnostics::default())
        .unwrap();
    let second = build_tree(
        messages(),
        &StackingEngine::default(),
        &TreeOptions::default(),
        &Diagnostics::default(),
    )
    .unwrap();
    assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
}

#[test]
fn manifest_opens_as_a_tree() {
    let manifest = build_tree(
        messages(),
        &StackingEngine::default(),
        &TreeOptions::default(),
        &Diagnostics::default(),
    )
    .unwrap();
    let manifest = FlatManifest::from_json(&manifest.to_json().unwrap()).unwrap();
    let tree = ManifestTree::open(&manifest).unwrap();

    let data = tree.data_nodes().map(|node| node.path().to_string()).collect::<Vec<_>>();
    assert_eq!(
        data,
        vec!["t/instant/isobaricInhPa", "tp/accum/surface", "u/instant/heightAboveGround"]
    );
    assert_eq!(tree.node("t").unwrap().attrs()["name"], json!("t"));
    assert_eq!(
        tree.node("tp/accum/surface").unwrap().attrs()["coordinates"],
        json!("time step surface")
    );
    assert_eq!(
        manifest.refs["u/instant/heightAboveGround/u/0.0.0"],
        RefValue::range("file.grib2", 100, 100)
    );
}
