//! Grouping of reference fragments into a variable / stepType / typeOfLevel hierarchy.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use gridref_error::{GridRefResult, gridref_bail};
use gridref_metrics::{Diagnostics, Event};
use gridref_refs::zarr::{COORDINATES, is_first_chunk_key};
use gridref_refs::{Attributes, RefStore, RefValue, ReferenceFragment};
use itertools::Itertools;
use serde_json::Value;

/// Variables and attribute values the decoder could not identify.
pub const UNKNOWN: &str = "unknown";

/// Prefix of the decoder-provided variable attributes.
const ATTR_PREFIX: &str = "GRIB_";

/// The categorical attributes that nest groups below a variable, outermost first.
pub const GROUP_KEYS: [&str; 2] = ["stepType", "typeOfLevel"];

/// The attribute naming the level coordinate of a variable.
const LEVEL_KEY: &str = "typeOfLevel";

/// A hierarchy node that received fragments and will be merged into the manifest.
#[derive(Debug, Clone)]
pub struct AggregationNode {
    path: String,
    coordinates: String,
    level_type: Option<String>,
    members: Vec<Arc<ReferenceFragment>>,
    level_values: BTreeSet<RefValue>,
}

impl AggregationNode {
    fn new(path: String, coordinates: String, level_type: Option<String>) -> Self {
        Self {
            path,
            coordinates,
            level_type,
            members: Vec::new(),
            level_values: BTreeSet::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The space-separated coordinate names shared by every member.
    pub fn coordinates(&self) -> &str {
        &self.coordinates
    }

    /// The name of the level coordinate, when the members declare one.
    pub fn level_type(&self) -> Option<&str> {
        self.level_type.as_deref()
    }

    /// Member fragments in the order they were pushed.
    pub fn members(&self) -> &[Arc<ReferenceFragment>] {
        &self.members
    }

    /// The distinct values of the level coordinate across members.
    pub fn level_values(&self) -> &BTreeSet<RefValue> {
        &self.level_values
    }
}

/// The finished hierarchy: group attributes per path plus the nodes holding fragments.
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    groups: BTreeMap<String, Attributes>,
    children: BTreeMap<String, BTreeSet<String>>,
    nodes: BTreeMap<String, AggregationNode>,
}

impl Hierarchy {
    /// Every group below the root with its attributes, in path order.
    pub fn groups(&self) -> impl Iterator<Item = (&str, &Attributes)> {
        self.groups.iter().map(|(path, attrs)| (path.as_str(), attrs))
    }

    pub fn group_attrs(&self, path: &str) -> Option<&Attributes> {
        self.groups.get(path)
    }

    /// The direct children of the group at `path`; the root is `""`.
    pub fn children(&self, path: &str) -> impl Iterator<Item = &str> {
        self.children
            .get(path)
            .into_iter()
            .flat_map(|children| children.iter().map(String::as_str))
    }

    /// Nodes with members, in path order.
    pub fn nodes(&self) -> impl Iterator<Item = &AggregationNode> {
        self.nodes.values()
    }

    pub fn node(&self, path: &str) -> Option<&AggregationNode> {
        self.nodes.get(path)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Consumes fragments in order and assigns each one to a hierarchy node.
pub struct HierarchyBuilder {
    hierarchy: Hierarchy,
    diagnostics: Diagnostics,
    warned_unknown: BTreeSet<(String, String)>,
    pushed: usize,
}

impl HierarchyBuilder {
    pub fn new(diagnostics: Diagnostics) -> Self {
        Self {
            hierarchy: Hierarchy::default(),
            diagnostics,
            warned_unknown: BTreeSet::new(),
            pushed: 0,
        }
    }

    pub fn extend(
        &mut self,
        fragments: impl IntoIterator<Item = Arc<ReferenceFragment>>,
    ) -> GridRefResult<()> {
        fragments.into_iter().try_for_each(|fragment| self.push(fragment))
    }

    /// Assign the next fragment. Messages are numbered from 1 in push order.
    pub fn push(&mut self, fragment: Arc<ReferenceFragment>) -> GridRefResult<()> {
        self.pushed += 1;
        let message = self.pushed;
        fragment.check_version()?;

        let coordinates = fragment.coordinates()?;
        let vname = primary_variable(&fragment, &coordinates, message)?;
        if vname == UNKNOWN {
            log::warn!("Dropping unknown variable in message {message}");
            self.diagnostics.record(Event::DroppedUnknownVariable);
            return Ok(());
        }

        let dattrs = fragment.attributes(Some(&vname))?.unwrap_or_default();
        let group_values = GROUP_KEYS
            .iter()
            .filter_map(|key| {
                categorical(&dattrs, key).map(|value| (*key, value))
            })
            .collect_vec();
        for (key, value) in &group_values {
            if value == UNKNOWN && self.warned_unknown.insert((key.to_string(), vname.clone())) {
                log::warn!("Found '{UNKNOWN}' attribute value for key {key} in var {vname} of msg {message}");
            }
            if value == UNKNOWN {
                self.diagnostics.record(Event::UnknownAttributeValue);
            }
        }

        let var_attrs = self.require_group("", &vname);
        if !var_attrs.contains_key("name") {
            let name = dattrs
                .get(&format!("{ATTR_PREFIX}name"))
                .cloned()
                .unwrap_or(Value::Null);
            var_attrs.insert("name".to_string(), name);
        }

        let mut path = vname.clone();
        for (key, value) in &group_values {
            let attrs = self.require_group(&path, value);
            attrs.insert(key.to_string(), Value::String(value.clone()));
            path = format!("{path}/{value}");
        }

        let coordinates = coordinates.join(" ");
        let leaf_attrs = self.require_group_at(&path);
        match leaf_attrs.get(COORDINATES) {
            None => {
                leaf_attrs.insert(COORDINATES.to_string(), Value::String(coordinates.clone()));
            }
            Some(Value::String(existing)) if *existing == coordinates => {}
            Some(existing) => gridref_bail!(
                Structure: "message {} declares coordinates '{}' but group {} already has {}",
                message,
                coordinates,
                path,
                existing
            ),
        }

        let level_type = group_values
            .iter()
            .find(|(key, _)| *key == LEVEL_KEY)
            .map(|(_, value)| value.clone());
        let node = self
            .hierarchy
            .nodes
            .entry(path.clone())
            .or_insert_with(|| AggregationNode::new(path, coordinates, level_type.clone()));

        if let Some(level_type) = level_type.as_deref() {
            for (key, value) in &fragment.refs {
                if key.split('/').next() == Some(level_type) && is_first_chunk_key(key) {
                    node.level_values.insert(value.clone());
                }
            }
        }
        node.members.push(fragment);
        Ok(())
    }

    /// The number of fragments pushed so far, dropped ones included.
    pub fn pushed(&self) -> usize {
        self.pushed
    }

    pub fn finish(self) -> Hierarchy {
        self.hierarchy
    }

    fn require_group(&mut self, parent: &str, name: &str) -> &mut Attributes {
        let path = if parent.is_empty() {
            name.to_string()
        } else {
            format!("{parent}/{name}")
        };
        self.hierarchy
            .children
            .entry(parent.to_string())
            .or_default()
            .insert(path.clone());
        self.hierarchy.groups.entry(path).or_default()
    }

    fn require_group_at(&mut self, path: &str) -> &mut Attributes {
        self.hierarchy.groups.entry(path.to_string()).or_default()
    }
}

/// The single top-level name that is neither metadata nor a declared coordinate.
fn primary_variable(
    fragment: &ReferenceFragment,
    coordinates: &[String],
    message: usize,
) -> GridRefResult<String> {
    let candidates = fragment
        .top_level_names()
        .into_iter()
        .filter(|name| !coordinates.iter().any(|coord| coord == name))
        .collect_vec();
    match candidates.as_slice() {
        [vname] => Ok(vname.to_string()),
        [] => gridref_bail!(Structure: "no primary variable found in message {}", message),
        many => gridref_bail!(
            Structure: "message {} has {} primary variable candidates: {}",
            message,
            many.len(),
            many.join(", ")
        ),
    }
}

/// The value of the decoder attribute for `key`, skipping absent, null and empty values.
fn categorical(attrs: &Attributes, key: &str) -> Option<String> {
    match attrs.get(&format!("{ATTR_PREFIX}{key}"))? {
        Value::Null => None,
        Value::String(value) if value.is_empty() => None,
        Value::String(value) => Some(value.clone()),
        other => Some(other.to_string()),
    }
}
