use std::collections::BTreeMap;
use std::sync::Arc;

use gridref_error::{GridRefError, GridRefResult, gridref_bail, gridref_err};
use gridref_metrics::Diagnostics;
use gridref_refs::zarr::{ZATTRS, ZGROUP, group_document};
use gridref_refs::{FlatManifest, RefValue, ReferenceFragment, build_path};
use itertools::Itertools;
#[cfg(feature = "rayon")]
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::hierarchy::{AggregationNode, Hierarchy, HierarchyBuilder};
use crate::options::{ExecutionMode, RemoteOptions, TreeOptions};

/// Position at which a varying level dimension is inserted into the concat dimensions.
const LEVEL_DIM_POSITION: usize = 3;

/// Merges the fragments of one hierarchy node into a single set of references.
///
/// Implementations must be deterministic and must fail rather than return partial output.
pub trait AggregationEngine: Send + Sync {
    fn merge(
        &self,
        fragments: &[Arc<ReferenceFragment>],
        concat_dims: &[String],
        identical_dims: &[String],
        remote_options: &RemoteOptions,
    ) -> GridRefResult<FlatManifest>;
}

/// An engine for nodes holding a single fragment: the fragment's references are returned as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughEngine;

impl AggregationEngine for PassthroughEngine {
    fn merge(
        &self,
        fragments: &[Arc<ReferenceFragment>],
        _concat_dims: &[String],
        _identical_dims: &[String],
        _remote_options: &RemoteOptions,
    ) -> GridRefResult<FlatManifest> {
        match fragments {
            [fragment] => Ok(FlatManifest::new(fragment.render_templates().refs)),
            _ => gridref_bail!(
                Aggregation: "passthrough merge expects exactly one fragment, got {}",
                fragments.len()
            ),
        }
    }
}

/// The dimensions a node is merged along.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionPlan {
    pub concat_dims: Vec<String>,
    pub identical_dims: Vec<String>,
}

impl DimensionPlan {
    /// Extend the configured dimensions with the node's level coordinate.
    ///
    /// A level taking a single value across members must be identical; a level taking several
    /// values becomes a concat dimension.
    pub fn for_node(options: &TreeOptions, node: &AggregationNode) -> Self {
        Self::new(options, node.level_type(), node.level_values().len())
    }

    pub fn new(options: &TreeOptions, level_type: Option<&str>, distinct_levels: usize) -> Self {
        let mut concat_dims = options.concat_dims().to_vec();
        let mut identical_dims = options.identical_dims().to_vec();
        match (level_type, distinct_levels) {
            (Some(level), 1) => identical_dims.push(level.to_string()),
            (Some(level), n) if n > 1 => {
                let at = LEVEL_DIM_POSITION.min(concat_dims.len());
                concat_dims.insert(at, level.to_string());
            }
            _ => log::debug!("No level coordinate to aggregate"),
        }
        Self {
            concat_dims,
            identical_dims,
        }
    }
}

/// Build the hierarchy for `fragments` and merge every node into a single manifest.
pub fn build_tree(
    fragments: impl IntoIterator<Item = Arc<ReferenceFragment>>,
    engine: &dyn AggregationEngine,
    options: &TreeOptions,
    diagnostics: &Diagnostics,
) -> GridRefResult<FlatManifest> {
    let mut builder = HierarchyBuilder::new(diagnostics.clone());
    builder.extend(fragments)?;
    log::debug!("Grouped {} fragments", builder.pushed());
    aggregate(&builder.finish(), engine, options)
}

/// Merge every node of `hierarchy` with `engine` and assemble the resulting manifest.
pub fn aggregate(
    hierarchy: &Hierarchy,
    engine: &dyn AggregationEngine,
    options: &TreeOptions,
) -> GridRefResult<FlatManifest> {
    let nodes = hierarchy.nodes().collect_vec();
    let merged: Vec<(&str, FlatManifest)> = match options.execution_mode() {
        ExecutionMode::Inline => nodes
            .into_iter()
            .map(|node| merge_node(node, engine, options))
            .try_collect()?,
        #[cfg(feature = "rayon")]
        ExecutionMode::Rayon => nodes
            .into_par_iter()
            .map(|node| merge_node(node, engine, options))
            .collect::<GridRefResult<Vec<_>>>()?,
        #[cfg(feature = "rayon")]
        ExecutionMode::RayonThreadPool(pool) => pool.install(|| {
            nodes
                .into_par_iter()
                .map(|node| merge_node(node, engine, options))
                .collect::<GridRefResult<Vec<_>>>()
        })?,
    };
    assemble(hierarchy, merged)
}

fn merge_node<'a>(
    node: &'a AggregationNode,
    engine: &dyn AggregationEngine,
    options: &TreeOptions,
) -> GridRefResult<(&'a str, FlatManifest)> {
    let plan = DimensionPlan::for_node(options, node);
    log::info!(
        "{} calling aggregation with concat dims [{}] and identical dims [{}] over {} fragments",
        node.path(),
        plan.concat_dims.iter().join(", "),
        plan.identical_dims.iter().join(", "),
        node.members().len()
    );
    engine
        .merge(
            node.members(),
            &plan.concat_dims,
            &plan.identical_dims,
            options.remote_options(),
        )
        .map(|merged| (node.path(), merged))
        .map_err(|err| match err {
            GridRefError::Aggregation(..) => err.with_context(format!("aggregating node {}", node.path())),
            other => gridref_err!(Aggregation: "aggregating node {} failed: {}", node.path(), other),
        })
}

/// Single-writer reduction of the merged nodes into the output manifest.
fn assemble(hierarchy: &Hierarchy, merged: Vec<(&str, FlatManifest)>) -> GridRefResult<FlatManifest> {
    let mut refs = BTreeMap::new();
    refs.insert(ZGROUP.to_string(), RefValue::text(group_document()));
    for (path, attrs) in hierarchy.groups() {
        refs.insert(
            build_path([Some(path)], Some(ZGROUP)),
            RefValue::text(group_document()),
        );
        if !attrs.is_empty() {
            refs.insert(
                build_path([Some(path)], Some(ZATTRS)),
                RefValue::text(serde_json::to_string(attrs)?),
            );
        }
    }

    for (path, manifest) in merged {
        for (key, value) in manifest.refs {
            if key == ZATTRS || key == ZGROUP {
                continue;
            }
            let full_key = build_path([Some(path)], Some(key.as_str()));
            if refs.insert(full_key.clone(), value).is_some() {
                gridref_bail!(Aggregation: "key {} is produced by more than one node", full_key);
            }
        }
    }

    FlatManifest::new(refs).into_text_values()
}
