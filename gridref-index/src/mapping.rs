//! Mapping between the messages of a resource and its side-channel index.
//!
//! Every message is indexed on its own, which yields exactly one chunk record per message. The
//! side-channel listing is authoritative: each of its entries is joined to the computed record
//! with the same message number, when there is one.

use std::collections::BTreeMap;
use std::sync::Arc;

use gridref_error::{GridRefResult, MismatchCounts, gridref_bail};
use gridref_metrics::{Diagnostics, Event};
use gridref_refs::ReferenceFragment;
use gridref_tree::{ManifestTree, PassthroughEngine, TreeOptions, build_tree};
use itertools::Itertools;
use serde::Serialize;
use serde_json::Value;

use crate::chunk_index::{ChunkIndexRecord, ChunkLocation, CoordMode, LEVEL, extract_tree_chunk_index};
use crate::sidecar::{SideChannelEntry, SideChannelIndex};

/// A correction applied to each fragment before it is indexed.
pub type Mapper<'a> = &'a dyn Fn(&ReferenceFragment) -> GridRefResult<ReferenceFragment>;

/// Compute the chunk record of every message, keyed by message number starting at 1.
///
/// Messages that produce no data, like those holding an unknown variable, are skipped.
pub fn index_messages(
    fragments: impl IntoIterator<Item = Arc<ReferenceFragment>>,
    mapper: Option<Mapper<'_>>,
    options: &TreeOptions,
    diagnostics: &Diagnostics,
) -> GridRefResult<BTreeMap<usize, ChunkIndexRecord>> {
    let mut records = BTreeMap::new();
    for (idx, fragment) in (1..).zip(fragments) {
        let record = index_message(idx, fragment, mapper, options, diagnostics)
            .map_err(|err| err.with_context(format!("message {idx}")))?;
        if let Some(record) = record {
            records.insert(idx, record);
        }
    }
    Ok(records)
}

fn index_message(
    idx: usize,
    fragment: Arc<ReferenceFragment>,
    mapper: Option<Mapper<'_>>,
    options: &TreeOptions,
    diagnostics: &Diagnostics,
) -> GridRefResult<Option<ChunkIndexRecord>> {
    let fragment = match mapper {
        Some(mapper) => Arc::new(mapper(fragment.as_ref())?),
        None => fragment,
    };
    let manifest = build_tree([fragment], &PassthroughEngine, options, diagnostics)?;
    if manifest.len() <= 1 {
        log::info!("Message {idx} produced an empty manifest");
        diagnostics.record(Event::EmptyMessage);
        return Ok(None);
    }

    let tree = ManifestTree::open(&manifest)?;
    let mut message_records =
        extract_tree_chunk_index(&tree, &manifest, CoordMode::GribLevels, diagnostics)?;
    match message_records.len() {
        0 => {
            log::warn!("Message {idx} produced an empty chunk index");
            diagnostics.record(Event::EmptyMessage);
            Ok(None)
        }
        1 => Ok(message_records.pop()),
        n => gridref_bail!(
            ChunkIndex: "expected a single variable but indexed {} chunks: {}",
            n,
            message_records.iter().map(|record| &record.varname).join(", ")
        ),
    }
}

/// A side-channel entry with the record computed for the same message, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedRow {
    pub entry: SideChannelEntry,
    pub computed: Option<ChunkIndexRecord>,
}

/// Identifies a message within the hierarchy: variable, level type, step type, level and valid time.
pub type HierarchyKey = (String, Option<String>, Option<String>, Option<String>, Option<String>);

impl MappedRow {
    pub fn idx(&self) -> usize {
        self.entry.idx
    }

    fn offset_matches(&self) -> bool {
        match self.computed.as_ref().map(|record| &record.location) {
            Some(ChunkLocation::Range(range)) => range.offset == self.entry.offset,
            Some(ChunkLocation::Inline(_)) | None => true,
        }
    }

    fn length_matches(&self) -> bool {
        match self.computed.as_ref().map(|record| &record.location) {
            Some(ChunkLocation::Range(range)) => range.length == self.entry.length,
            Some(ChunkLocation::Inline(_)) | None => true,
        }
    }

    pub fn hierarchy_key(&self) -> Option<HierarchyKey> {
        let record = self.computed.as_ref()?;
        let attr = |name: &str| record.attrs.get(name).map(display_value);
        let coord = |name: &str| record.coord(name).map(|value| value.to_string());
        Some((
            record.varname.clone(),
            attr("typeOfLevel"),
            attr("stepType"),
            coord(LEVEL),
            coord("valid_time"),
        ))
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Join the side-channel entries of `resource` to the computed records.
///
/// With `validate`, any computed byte range that disagrees with the listing is an error, offsets
/// being checked before lengths. Duplicate descriptors and duplicate hierarchy keys are only
/// reported.
pub fn build_idx_mapping(
    resource: &str,
    index: &SideChannelIndex,
    computed: &BTreeMap<usize, ChunkIndexRecord>,
    validate: bool,
    diagnostics: &Diagnostics,
) -> GridRefResult<Vec<MappedRow>> {
    let rows = index
        .entries()
        .iter()
        .map(|entry| MappedRow {
            entry: entry.clone(),
            computed: computed.get(&entry.idx).cloned(),
        })
        .collect_vec();

    if validate {
        check_field(resource, &rows, "offset", MappedRow::offset_matches)?;
        check_field(resource, &rows, "length", MappedRow::length_matches)?;
        report_duplicate_descriptors(resource, index, &rows, diagnostics);
        report_duplicate_hierarchy_keys(resource, &rows, diagnostics);
    }
    Ok(rows)
}

fn check_field(
    resource: &str,
    rows: &[MappedRow],
    field: &'static str,
    check: fn(&MappedRow) -> bool,
) -> GridRefResult<()> {
    let matched = rows.iter().filter(|row| check(row)).count();
    let mismatched = rows.len() - matched;
    if mismatched > 0 {
        gridref_bail!(Mismatch: MismatchCounts {
            field,
            resource: resource.to_string(),
            matched,
            mismatched,
        });
    }
    Ok(())
}

fn report_duplicate_descriptors(
    resource: &str,
    index: &SideChannelIndex,
    rows: &[MappedRow],
    diagnostics: &Diagnostics,
) {
    let duplicates = index.duplicate_descriptors();
    if duplicates.is_empty() {
        return;
    }
    let varnames = duplicates
        .iter()
        .filter_map(|entry| rows.iter().find(|row| row.idx() == entry.idx))
        .filter_map(|row| row.computed.as_ref().map(|record| record.varname.as_str()))
        .join(", ");
    log::warn!(
        "The idx attribute mapping for {resource} is not unique for {} variables: {varnames}",
        duplicates.len()
    );
    diagnostics.record_n(Event::DuplicateDescriptor, duplicates.len());
}

fn report_duplicate_hierarchy_keys(resource: &str, rows: &[MappedRow], diagnostics: &Diagnostics) {
    let keyed = rows
        .iter()
        .filter_map(|row| row.hierarchy_key())
        .counts();
    let duplicates = keyed
        .iter()
        .filter(|(_, count)| **count > 1)
        .collect_vec();
    if duplicates.is_empty() {
        return;
    }
    let total = duplicates.iter().map(|(_, count)| **count).sum::<usize>();
    let varnames = duplicates
        .iter()
        .map(|(key, count)| format!("{} x{}", key.0, count))
        .sorted()
        .join(", ");
    log::warn!("The grib hierarchy in {resource} is not unique for {total} variables: {varnames}");
    diagnostics.record_n(Event::DuplicateHierarchyKey, total);
}
