use std::collections::BTreeMap;

use gridref_error::{GridRefResult, gridref_bail, gridref_err};
use gridref_metrics::{Diagnostics, Event};
use gridref_refs::zarr::chunk_suffix;
use gridref_refs::{Attributes, ByteRange, CoordValue, FlatManifest, RefStore, RefValue, build_path};
use gridref_tree::{ArrayNode, ManifestTree, TreeNode};
use itertools::Itertools;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Coordinate names kept as is in [`CoordMode::GribLevels`].
const GRIB_COORDINATES: [&str; 5] = ["valid_time", "time", "step", "latitude", "longitude"];

/// The name every other coordinate is reported under in [`CoordMode::GribLevels`].
pub const LEVEL: &str = "level";

/// How coordinate names are reported in chunk index records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordMode {
    /// Coordinates keep their array names.
    #[default]
    Raw,
    /// GRIB variables have a single level coordinate; it is reported as `level` whatever its
    /// level type.
    GribLevels,
}

impl CoordMode {
    fn name<'a>(&self, coord: &'a str) -> &'a str {
        match self {
            CoordMode::GribLevels if !GRIB_COORDINATES.contains(&coord) => LEVEL,
            _ => coord,
        }
    }
}

/// Where the bytes of a chunk live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkLocation {
    Inline(String),
    Range(ByteRange),
}

/// One chunk of a data variable with the coordinate values that identify it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkIndexRecord {
    pub varname: String,
    /// Group attributes of the variable's node merged with those of its ancestors.
    pub attrs: Attributes,
    pub coords: BTreeMap<String, CoordValue>,
    pub location: ChunkLocation,
}

impl ChunkIndexRecord {
    /// Byte offset of the chunk, `-1` for inline chunks.
    pub fn offset(&self) -> i64 {
        match &self.location {
            ChunkLocation::Inline(_) => -1,
            ChunkLocation::Range(range) => i64::try_from(range.offset).unwrap_or(i64::MAX),
        }
    }

    /// Byte length of the chunk, `-1` for inline chunks.
    pub fn length(&self) -> i64 {
        match &self.location {
            ChunkLocation::Inline(_) => -1,
            ChunkLocation::Range(range) => i64::try_from(range.length).unwrap_or(i64::MAX),
        }
    }

    pub fn uri(&self) -> Option<&str> {
        match &self.location {
            ChunkLocation::Inline(_) => None,
            ChunkLocation::Range(range) => Some(&range.uri),
        }
    }

    pub fn inline_value(&self) -> Option<&str> {
        match &self.location {
            ChunkLocation::Inline(value) => Some(value),
            ChunkLocation::Range(_) => None,
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.location, ChunkLocation::Inline(_))
    }

    /// A string group attribute such as `typeOfLevel` or `stepType`.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).and_then(Value::as_str)
    }

    pub fn coord(&self, name: &str) -> Option<CoordValue> {
        self.coords.get(name).copied()
    }
}

/// Serialized as a single flat row: `varname`, the attributes, the coordinates, then `uri`,
/// `offset`, `length` and `inline_value`.
impl Serialize for ChunkIndexRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("varname", &self.varname)?;
        for (key, value) in &self.attrs {
            map.serialize_entry(key, value)?;
        }
        for (key, value) in &self.coords {
            map.serialize_entry(key, value)?;
        }
        map.serialize_entry("uri", &self.uri())?;
        map.serialize_entry("offset", &self.offset())?;
        map.serialize_entry("length", &self.length())?;
        map.serialize_entry("inline_value", &self.inline_value())?;
        map.end()
    }
}

/// Index every chunk of the data variables stored at `node`.
///
/// Only dimensions chunked by one element are indexed, dimensions held whole by a single chunk
/// are left out. Any other chunking is an error since a chunk would not map to one coordinate
/// value.
pub fn extract_dataset_chunk_index(
    tree: &ManifestTree,
    node: &TreeNode,
    manifest: &FlatManifest,
    mode: CoordMode,
    diagnostics: &Diagnostics,
) -> GridRefResult<Vec<ChunkIndexRecord>> {
    let attrs = inherited_attrs(tree, node);
    let mut records = Vec::new();

    for var in node.data_vars() {
        let indexed = indexed_dims(var)?;
        let coords = node.coords_for(var).collect_vec();

        for combination in combinations(&indexed) {
            let dim_index: BTreeMap<&str, usize> = indexed
                .iter()
                .map(|(axis, _)| var.dims()[*axis].as_str())
                .zip(combination.iter().copied())
                .collect();

            let mut coord_values = BTreeMap::new();
            for coord in &coords {
                let Some(index) = coord
                    .dims()
                    .iter()
                    .map(|dim| dim_index.get(dim.as_str()).copied())
                    .collect::<Option<Vec<_>>>()
                else {
                    continue;
                };
                let value = coord.value_at(manifest, &index).map_err(|err| {
                    gridref_err!(
                        ChunkIndex: "error reading coordinate {} of {} at index [{}]: {}",
                        coord.name(),
                        var.path(),
                        index.iter().join(", "),
                        err
                    )
                })?;
                match value {
                    Some(value) => {
                        coord_values.insert(mode.name(coord.name()).to_string(), value);
                    }
                    None => {
                        log::debug!("Coordinate {} of {} has no value", coord.name(), var.path());
                        diagnostics.record(Event::DroppedCoordinate);
                    }
                }
            }

            let mut chunk_coords = vec![0; var.dims().len()];
            for ((axis, _), position) in indexed.iter().zip(&combination) {
                chunk_coords[*axis] = *position;
            }
            let suffix = chunk_suffix(&chunk_coords);
            let key = build_path([Some(var.path())], Some(suffix.as_str()));

            let location = match manifest.entry(&key) {
                None => {
                    log::warn!("Chunk not found: {key}");
                    diagnostics.record(Event::MissingChunk);
                    continue;
                }
                Some(RefValue::Range(range)) => ChunkLocation::Range(range.clone()),
                Some(RefValue::Inline(inline)) => ChunkLocation::Inline(inline.as_text()?.to_string()),
                Some(RefValue::Whole(uri)) => {
                    gridref_bail!(Manifest: "key {} has bad value: whole resource reference to {}", key, uri)
                }
            };

            records.push(ChunkIndexRecord {
                varname: var.name().to_string(),
                attrs: attrs.clone(),
                coords: coord_values,
                location,
            });
        }
    }
    Ok(records)
}

/// Index every group of `tree` that holds data, in pre-order.
pub fn extract_tree_chunk_index(
    tree: &ManifestTree,
    manifest: &FlatManifest,
    mode: CoordMode,
    diagnostics: &Diagnostics,
) -> GridRefResult<Vec<ChunkIndexRecord>> {
    let mut records = Vec::new();
    for node in tree.data_nodes() {
        records.extend(extract_dataset_chunk_index(tree, node, manifest, mode, diagnostics)?);
    }
    Ok(records)
}

/// The node's attributes over those of its ancestors; the closest group wins.
fn inherited_attrs(tree: &ManifestTree, node: &TreeNode) -> Attributes {
    let ancestors = tree.ancestors(node.path()).collect_vec();
    let mut attrs = Attributes::new();
    for group in ancestors.into_iter().rev().chain(std::iter::once(node)) {
        attrs.extend(group.attrs().iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    attrs
}

/// The axes of `var` chunked by a single element, with their extents.
fn indexed_dims(var: &ArrayNode) -> GridRefResult<Vec<(usize, usize)>> {
    if var.chunks().len() != var.shape().len() {
        gridref_bail!(
            Manifest: "array {} has {} chunk dimensions for a shape of rank {}",
            var.path(),
            var.chunks().len(),
            var.shape().len()
        );
    }
    let mut indexed = Vec::new();
    for (axis, (extent, chunk)) in var.shape().iter().zip(var.chunks()).enumerate() {
        if *chunk == 1 {
            indexed.push((axis, *extent));
        } else if chunk != extent {
            gridref_bail!(
                ChunkIndex: "can not extract chunk index for dimension {} of {} with non singleton chunks of {}",
                var.dims()[axis],
                var.path(),
                chunk
            );
        }
    }
    Ok(indexed)
}

/// Every combination of positions along the indexed axes, the last axis varying fastest.
fn combinations(indexed: &[(usize, usize)]) -> Vec<Vec<usize>> {
    if indexed.is_empty() {
        return vec![Vec::new()];
    }
    indexed
        .iter()
        .map(|(_, extent)| 0..*extent)
        .multi_cartesian_product()
        .collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(CoordMode::Raw, "isobaricInhPa", "isobaricInhPa")]
    #[case(CoordMode::GribLevels, "isobaricInhPa", "level")]
    #[case(CoordMode::GribLevels, "valid_time", "valid_time")]
    #[case(CoordMode::GribLevels, "latitude", "latitude")]
    fn coordinate_names(#[case] mode: CoordMode, #[case] coord: &str, #[case] expected: &str) {
        assert_eq!(mode.name(coord), expected);
    }

    #[rstest]
    #[case(vec![], vec![vec![]])]
    #[case(vec![(0, 2)], vec![vec![0], vec![1]])]
    #[case(vec![(0, 2), (2, 2)], vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]])]
    #[case(vec![(1, 0)], vec![])]
    fn chunk_combinations(#[case] indexed: Vec<(usize, usize)>, #[case] expected: Vec<Vec<usize>>) {
        assert_eq!(combinations(&indexed), expected);
    }

    #[test]
    fn inline_records_have_no_offsets() {
        let record = ChunkIndexRecord {
            varname: "t2m".to_string(),
            attrs: Attributes::new(),
            coords: BTreeMap::new(),
            location: ChunkLocation::Inline("base64:AAAA".to_string()),
        };
        assert_eq!(record.offset(), -1);
        assert_eq!(record.length(), -1);
        assert_eq!(record.uri(), None);
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            serde_json::json!({
                "varname": "t2m",
                "uri": null,
                "offset": -1,
                "length": -1,
                "inline_value": "base64:AAAA"
            })
        );
    }
}
