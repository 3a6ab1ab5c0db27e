//! gridref builds hierarchical chunk manifests out of the references a decoder emits for each
//! message of a gridded file, and checks them against the file's side-channel offset index.
//!
//! The building blocks live in their own crates and are re-exported here:
//!
//! * [`refs`]: reference fragments, manifests and the zarr v2 layout they describe.
//! * [`tree`]: grouping fragments into a variable / step type / level type hierarchy and merging
//!   each group with an [`AggregationEngine`](tree::AggregationEngine).
//! * [`index`]: chunk indexes over a merged manifest and the side-channel cross-validation.

use std::io::Read;
use std::sync::Arc;

pub use {
    gridref_error as error, gridref_index as index, gridref_metrics as metrics,
    gridref_refs as refs, gridref_tree as tree,
};

use crate::error::GridRefResult;
use crate::index::{MappedRow, Mapper, SideChannelIndex, build_idx_mapping, index_messages};
use crate::metrics::Diagnostics;
use crate::refs::ReferenceFragment;
use crate::tree::TreeOptions;

/// Map every message of `resource` to its entry in the side-channel index read from `sidecar`.
///
/// The fragments are the decoder output for the resource, one per message in file order, and
/// `resource_size` is its length in bytes. The side-channel index is authoritative: every one of
/// its entries yields a row. With `validate`, computed offsets and lengths must agree with it.
pub fn map_resource(
    resource: &str,
    fragments: impl IntoIterator<Item = Arc<ReferenceFragment>>,
    sidecar: impl Read,
    resource_size: u64,
    mapper: Option<Mapper<'_>>,
    validate: bool,
    diagnostics: &Diagnostics,
) -> GridRefResult<Vec<MappedRow>> {
    let index = SideChannelIndex::read(sidecar, resource_size, false)?;
    let computed = index_messages(fragments, mapper, &TreeOptions::default(), diagnostics)?;
    log::debug!(
        "Indexed {} of {} messages listed for {resource}",
        computed.len(),
        index.len()
    );
    let rows = build_idx_mapping(resource, &index, &computed, validate, diagnostics)?;
    for (event, count) in diagnostics.summary() {
        log::info!("{resource}: {event} = {count}");
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::error::GridRefError;
    use crate::refs::{ArrayMetadata, InlineValue, RefValue};

    fn message(offset: u64, length: u64) -> Arc<ReferenceFragment> {
        let doc = |value: serde_json::Value| RefValue::text(value.to_string());
        let meta = |shape: Vec<usize>| serde_json::to_value(ArrayMetadata::single_chunk(shape, "<f8", json!(null))).unwrap();
        let mut refs = BTreeMap::from([
            (".zgroup".to_string(), doc(json!({"zarr_format": 2}))),
            (".zattrs".to_string(), doc(json!({"coordinates": "surface"}))),
            ("tp/.zarray".to_string(), doc(meta(vec![4]))),
            (
                "tp/.zattrs".to_string(),
                doc(json!({"_ARRAY_DIMENSIONS": ["x"], "GRIB_stepType": "accum", "GRIB_typeOfLevel": "surface"})),
            ),
            ("tp/0".to_string(), RefValue::range("file.grib2", offset, length)),
            ("surface/.zarray".to_string(), doc(meta(vec![]))),
            ("surface/.zattrs".to_string(), doc(json!({"_ARRAY_DIMENSIONS": []}))),
        ]);
        refs.insert(
            "surface/0".to_string(),
            RefValue::Inline(InlineValue::encode(&0f64.to_le_bytes())),
        );
        Arc::new(ReferenceFragment::new(refs))
    }

    #[test]
    fn maps_messages_to_sidecar_entries() {
        let sidecar = "1:0:d=2024010100:APCP:surface:0-1 hour acc fcst:\n2:50:d=2024010100:APCP:surface:0-2 hour acc fcst:\n";
        let rows = map_resource(
            "file.grib2",
            [message(0, 50), message(50, 30)],
            sidecar.as_bytes(),
            80,
            None,
            true,
            &Diagnostics::default(),
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.computed.is_some()));
        // Both messages share variable, level and step type but no valid time.
        assert_eq!(rows[0].hierarchy_key(), rows[1].hierarchy_key());

        let err = map_resource(
            "file.grib2",
            [message(0, 50), message(50, 30)],
            sidecar.as_bytes(),
            90,
            None,
            true,
            &Diagnostics::default(),
        )
        .unwrap_err();
        assert!(matches!(err, GridRefError::Mismatch(..)));
    }
}
