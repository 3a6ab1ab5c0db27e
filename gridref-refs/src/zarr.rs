//! The subset of the zarr v2 storage layout that manifests are expressed in.

use std::collections::BTreeMap;

use gridref_error::{GridRefResult, gridref_bail, gridref_err};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dtype::{CoordValue, ZarrDType};
use crate::value::RefValue;

/// Key of the group marker document.
pub const ZGROUP: &str = ".zgroup";
/// Key of a group's or array's attribute document.
pub const ZATTRS: &str = ".zattrs";
/// Key of an array's metadata document.
pub const ZARRAY: &str = ".zarray";
/// Attribute listing the dimension names of an array, outermost first.
pub const ARRAY_DIMENSIONS: &str = "_ARRAY_DIMENSIONS";
/// Group attribute listing the coordinate variables, space separated.
pub const COORDINATES: &str = "coordinates";

/// Attribute documents are arbitrary JSON objects.
pub type Attributes = serde_json::Map<String, Value>;

/// Returns true for the reserved metadata key names.
pub fn is_metadata_key(name: &str) -> bool {
    matches!(name, ZGROUP | ZATTRS | ZARRAY)
}

/// The contents of a `.zgroup` document.
pub fn group_document() -> String {
    r#"{"zarr_format":2}"#.to_string()
}

/// Returns the path to access the values in a store without a leading "/".
///
/// Absent parts are skipped.
pub fn build_path<'a>(
    parts: impl IntoIterator<Item = Option<&'a str>>,
    suffix: Option<&'a str>,
) -> String {
    let joined = parts
        .into_iter()
        .chain(std::iter::once(suffix))
        .flatten()
        .join("/");
    joined.trim_start_matches('/').to_string()
}

/// Returns true when `key` addresses the first chunk of an array, e.g. `level/0` or `t2m/0.0`.
pub fn is_first_chunk_key(key: &str) -> bool {
    let Some((_, chunk)) = key.rsplit_once('/') else {
        return false;
    };
    !chunk.is_empty() && chunk.split('.').all(|part| part == "0")
}

/// The chunk key suffix for the given chunk grid coordinates.
pub fn chunk_suffix(chunk_coords: &[usize]) -> String {
    if chunk_coords.is_empty() {
        "0".to_string()
    } else {
        chunk_coords.iter().join(".")
    }
}

/// A zarr v2 `.zarray` document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayMetadata {
    pub chunks: Vec<usize>,
    #[serde(default)]
    pub compressor: Option<Value>,
    pub dtype: String,
    #[serde(default)]
    pub fill_value: Value,
    #[serde(default)]
    pub filters: Option<Vec<Value>>,
    #[serde(default = "default_order")]
    pub order: String,
    pub shape: Vec<usize>,
    #[serde(default = "default_zarr_format")]
    pub zarr_format: u8,
}

fn default_order() -> String {
    "C".to_string()
}

fn default_zarr_format() -> u8 {
    2
}

impl ArrayMetadata {
    /// Metadata for an uncompressed array stored as a single chunk.
    pub fn single_chunk(shape: Vec<usize>, dtype: impl Into<String>, fill_value: Value) -> Self {
        Self {
            chunks: shape.clone(),
            compressor: None,
            dtype: dtype.into(),
            fill_value,
            filters: None,
            order: default_order(),
            shape,
            zarr_format: 2,
        }
    }

    pub fn parsed_dtype(&self) -> GridRefResult<ZarrDType> {
        self.dtype.parse()
    }

    /// True when chunks hold raw, uncompressed, C-ordered elements that can be decoded in place.
    pub fn is_raw(&self) -> bool {
        self.compressor.as_ref().is_none_or(Value::is_null)
            && self.filters.as_ref().is_none_or(Vec::is_empty)
            && self.order == "C"
    }

    /// Number of chunks along each dimension.
    pub fn chunk_grid(&self) -> Vec<usize> {
        self.shape
            .iter()
            .zip(self.chunks.iter())
            .map(|(extent, chunk)| if *chunk == 0 { 0 } else { extent.div_ceil(*chunk) })
            .collect()
    }

    /// Split an element index into its chunk coordinates and the C-order element offset within
    /// that chunk.
    pub fn locate(&self, index: &[usize]) -> GridRefResult<(Vec<usize>, usize)> {
        if index.len() != self.shape.len() || self.chunks.len() != self.shape.len() {
            gridref_bail!(
                Manifest: "index of rank {} does not match array of rank {} with {} chunk dims",
                index.len(),
                self.shape.len(),
                self.chunks.len()
            );
        }
        let mut chunk_coords = Vec::with_capacity(index.len());
        let mut within = 0usize;
        for ((idx, extent), chunk) in index.iter().zip(&self.shape).zip(&self.chunks) {
            if idx >= extent || *chunk == 0 {
                gridref_bail!(Manifest: "index {} out of bounds for dimension of size {}", idx, extent);
            }
            chunk_coords.push(idx / chunk);
            within = within * chunk + idx % chunk;
        }
        Ok((chunk_coords, within))
    }
}

/// Read access to a path-keyed mapping of manifest entries.
pub trait RefStore {
    fn entries(&self) -> &BTreeMap<String, RefValue>;

    fn entry(&self, key: &str) -> Option<&RefValue> {
        self.entries().get(key)
    }

    /// Parse the inline JSON document stored at `key`, if present.
    fn json_document(&self, key: &str) -> GridRefResult<Option<Value>> {
        match self.entry(key) {
            None => Ok(None),
            Some(RefValue::Inline(inline)) => Ok(Some(serde_json::from_str(inline.as_text()?)?)),
            Some(other) => gridref_bail!(
                Manifest: "metadata key {} must be stored inline, found a reference to {}",
                key,
                other.uri().unwrap_or_default()
            ),
        }
    }

    /// The attributes of the group or array at `path` (`None` for the root).
    fn attributes(&self, path: Option<&str>) -> GridRefResult<Option<Attributes>> {
        let key = build_path([path], Some(ZATTRS));
        match self.json_document(&key)? {
            None => Ok(None),
            Some(Value::Object(attrs)) => Ok(Some(attrs)),
            Some(other) => gridref_bail!(Manifest: "{} is not a JSON object: {}", key, other),
        }
    }

    /// The array metadata of the array at `path`, if it is an array.
    fn array_metadata(&self, path: &str) -> GridRefResult<Option<ArrayMetadata>> {
        let key = build_path([Some(path)], Some(ZARRAY));
        self.json_document(&key)?
            .map(|doc| serde_json::from_value(doc).map_err(Into::into))
            .transpose()
    }

    /// The dimension names declared for the array at `path`.
    fn array_dimensions(&self, path: &str) -> GridRefResult<Vec<String>> {
        let attrs = self.attributes(Some(path))?.unwrap_or_default();
        match attrs.get(ARRAY_DIMENSIONS) {
            None => Ok(Vec::new()),
            Some(dims) => Ok(serde_json::from_value(dims.clone())?),
        }
    }

    /// Decode the single element at `index` of the array at `path`.
    ///
    /// Only raw inline chunks can be decoded; a chunk held in an external resource is an error
    /// because resolving it would require reading that resource. Missing chunks resolve to the
    /// array's fill value.
    fn read_element(&self, path: &str, index: &[usize]) -> GridRefResult<Option<CoordValue>> {
        let meta = self
            .array_metadata(path)?
            .ok_or_else(|| gridref_err!(Manifest: "no array metadata at {}", path))?;
        if !meta.is_raw() {
            gridref_bail!(Manifest: "array {} is compressed or filtered and cannot be decoded", path);
        }
        let dtype = meta.parsed_dtype()?;
        let (chunk_coords, within) = meta.locate(index)?;
        let chunk = chunk_suffix(&chunk_coords);
        let key = build_path([Some(path)], Some(chunk.as_str()));

        match self.entry(&key) {
            None => dtype.fill_value(&meta.fill_value),
            Some(RefValue::Inline(inline)) => {
                let bytes = inline.decode()?;
                let start = within * dtype.itemsize();
                let item = bytes.get(start..start + dtype.itemsize()).ok_or_else(|| {
                    gridref_err!(
                        Manifest: "chunk {} holds {} bytes, element {} is out of range",
                        key,
                        bytes.len(),
                        within
                    )
                })?;
                dtype.decode(item).map(Some)
            }
            Some(other) => gridref_bail!(
                Manifest: "chunk {} refers to {} and is not stored inline",
                key,
                other.uri().unwrap_or_default()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::value::InlineValue;

    struct Store(BTreeMap<String, RefValue>);

    impl RefStore for Store {
        fn entries(&self) -> &BTreeMap<String, RefValue> {
            &self.0
        }
    }

    fn store(entries: Vec<(&str, RefValue)>) -> Store {
        Store(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    #[rstest]
    #[case(vec![None, Some("t2m")], Some(".zarray"), "t2m/.zarray")]
    #[case(vec![Some("/t2m"), None], Some("0.0"), "t2m/0.0")]
    #[case(vec![None], Some(".zattrs"), ".zattrs")]
    #[case(vec![Some("a"), Some("b")], None, "a/b")]
    fn paths(#[case] parts: Vec<Option<&str>>, #[case] suffix: Option<&str>, #[case] expected: &str) {
        assert_eq!(build_path(parts, suffix), expected);
    }

    #[rstest]
    #[case("surface/0", true)]
    #[case("t2m/0.0", true)]
    #[case("t2m/0.1", false)]
    #[case("surface/10", false)]
    #[case("surface/.zarray", false)]
    #[case("surface", false)]
    fn first_chunk_keys(#[case] key: &str, #[case] expected: bool) {
        assert_eq!(is_first_chunk_key(key), expected);
    }

    #[test]
    fn locate_elements() {
        let meta = ArrayMetadata {
            chunks: vec![1, 4],
            ..ArrayMetadata::single_chunk(vec![3, 4], "<f8", Value::Null)
        };
        assert_eq!(meta.chunk_grid(), vec![3, 1]);
        assert_eq!(meta.locate(&[2, 3]).unwrap(), (vec![2, 0], 3));
        assert!(meta.locate(&[3, 0]).is_err());
        assert!(meta.locate(&[0]).is_err());
    }

    #[test]
    fn read_inline_elements() {
        let values: Vec<u8> = [1.0f64, 2.0, 3.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let meta = ArrayMetadata::single_chunk(vec![3], "<f8", Value::Null);
        let store = store(vec![
            ("latitude/.zarray", RefValue::text(serde_json::to_string(&meta).unwrap())),
            (
                "latitude/.zattrs",
                RefValue::text(json!({"_ARRAY_DIMENSIONS": ["latitude"]}).to_string()),
            ),
            ("latitude/0", RefValue::Inline(InlineValue::encode(&values))),
        ]);

        assert_eq!(store.array_dimensions("latitude").unwrap(), vec!["latitude"]);
        assert_eq!(
            store.read_element("latitude", &[1]).unwrap(),
            Some(CoordValue::Float(2.0))
        );
    }

    #[test]
    fn missing_chunk_reads_fill_value() {
        let meta = ArrayMetadata::single_chunk(vec![], "<i8", json!(-1));
        let store = store(vec![(
            "time/.zarray",
            RefValue::text(serde_json::to_string(&meta).unwrap()),
        )]);
        assert_eq!(store.read_element("time", &[]).unwrap(), Some(CoordValue::Int(-1)));
    }

    #[test]
    fn referenced_chunks_are_not_read() {
        let meta = ArrayMetadata::single_chunk(vec![], "<f8", Value::Null);
        let store = store(vec![
            ("level/.zarray", RefValue::text(serde_json::to_string(&meta).unwrap())),
            ("level/0", RefValue::range("file.grib2", 0, 8)),
        ]);
        assert!(store.read_element("level", &[]).is_err());
    }
}
