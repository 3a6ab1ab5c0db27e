//! A hierarchical view over a flat manifest.
//!
//! Groups are addressed by their `/`-joined path, the root being `""`. Parents are found by path
//! lookup rather than stored links.

use std::collections::{BTreeMap, BTreeSet};

use gridref_error::{GridRefResult, gridref_bail};
use gridref_refs::zarr::{COORDINATES, ZARRAY, ZGROUP};
use gridref_refs::{ArrayMetadata, Attributes, CoordValue, FlatManifest, RefStore};
use serde_json::Value;

/// An array stored directly below a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayNode {
    name: String,
    path: String,
    dims: Vec<String>,
    meta: ArrayMetadata,
    attrs: Attributes,
}

impl ArrayNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The full path of the array inside the manifest.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn shape(&self) -> &[usize] {
        &self.meta.shape
    }

    pub fn chunks(&self) -> &[usize] {
        &self.meta.chunks
    }

    pub fn metadata(&self) -> &ArrayMetadata {
        &self.meta
    }

    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    /// Decode the element at `index` from the manifest this view was opened on.
    pub fn value_at(&self, manifest: &FlatManifest, index: &[usize]) -> GridRefResult<Option<CoordValue>> {
        manifest.read_element(&self.path, index)
    }

    fn is_dimension_coordinate(&self) -> bool {
        self.dims.len() == 1 && self.dims[0] == self.name
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeNode {
    path: String,
    attrs: Attributes,
    children: BTreeSet<String>,
    arrays: BTreeMap<String, ArrayNode>,
}

impl TreeNode {
    fn new(path: String) -> Self {
        Self {
            path,
            ..Default::default()
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The last path segment, empty for the root.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    /// Paths of the child groups.
    pub fn children(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(String::as_str)
    }

    pub fn arrays(&self) -> impl Iterator<Item = &ArrayNode> {
        self.arrays.values()
    }

    pub fn array(&self, name: &str) -> Option<&ArrayNode> {
        self.arrays.get(name)
    }

    /// True when the group holds at least one data variable.
    pub fn has_data(&self) -> bool {
        self.data_vars().next().is_some()
    }

    /// Arrays that are not coordinates, in name order.
    pub fn data_vars(&self) -> impl Iterator<Item = &ArrayNode> {
        let coords = self.coordinate_names();
        self.arrays
            .values()
            .filter(move |array| !coords.contains(array.name()))
    }

    /// Coordinate arrays, in name order.
    pub fn coords(&self) -> impl Iterator<Item = &ArrayNode> {
        let coords = self.coordinate_names();
        self.arrays
            .values()
            .filter(move |array| coords.contains(array.name()))
    }

    /// The coordinates of `var`: those whose dimensions are a subset of the variable's.
    pub fn coords_for<'a>(&'a self, var: &'a ArrayNode) -> impl Iterator<Item = &'a ArrayNode> {
        self.coords()
            .filter(move |coord| coord.name() != var.name())
            .filter(move |coord| coord.dims().iter().all(|dim| var.dims().contains(dim)))
    }

    /// Dimension coordinates plus every name listed in a `coordinates` attribute of the group or
    /// one of its arrays.
    fn coordinate_names(&self) -> BTreeSet<&str> {
        let listed = std::iter::once(&self.attrs)
            .chain(self.arrays.values().map(|array| &array.attrs))
            .filter_map(|attrs| attrs.get(COORDINATES).and_then(Value::as_str))
            .flat_map(|names| names.split_whitespace());
        self.arrays
            .values()
            .filter(|array| array.is_dimension_coordinate())
            .map(ArrayNode::name)
            .chain(listed)
            .filter(|name| self.arrays.contains_key(*name))
            .collect()
    }
}

/// The group tree of a flat manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestTree {
    nodes: BTreeMap<String, TreeNode>,
}

impl ManifestTree {
    pub fn open(manifest: &FlatManifest) -> GridRefResult<Self> {
        let mut tree = Self {
            nodes: BTreeMap::from([(String::new(), TreeNode::new(String::new()))]),
        };

        for key in manifest.refs.keys() {
            let (parent, leaf) = split_path(key);
            match leaf {
                ZGROUP => {
                    tree.ensure_group(parent);
                }
                ZARRAY => tree.insert_array(manifest, parent)?,
                _ => {}
            }
        }

        let groups = tree.nodes.keys().cloned().collect::<Vec<_>>();
        for path in groups {
            let attrs = manifest.attributes((!path.is_empty()).then_some(path.as_str()))?;
            if let (Some(attrs), Some(node)) = (attrs, tree.nodes.get_mut(&path)) {
                node.attrs = attrs;
            }
        }
        Ok(tree)
    }

    pub fn root(&self) -> &TreeNode {
        &self.nodes[""]
    }

    pub fn node(&self, path: &str) -> Option<&TreeNode> {
        self.nodes.get(path)
    }

    /// The parent group of the group at `path`; `None` for the root.
    pub fn parent(&self, path: &str) -> Option<&TreeNode> {
        if path.is_empty() {
            return None;
        }
        self.nodes.get(split_path(path).0)
    }

    /// The ancestors of the group at `path`, closest first, ending with the root.
    pub fn ancestors<'a>(&'a self, path: &str) -> impl Iterator<Item = &'a TreeNode> {
        std::iter::successors(self.parent(path), |node| self.parent(node.path()))
    }

    /// Every group in depth-first pre-order starting at the root.
    pub fn subtree(&self) -> Vec<&TreeNode> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root()];
        while let Some(node) = stack.pop() {
            order.push(node);
            stack.extend(node.children.iter().rev().filter_map(|child| self.nodes.get(child)));
        }
        order
    }

    /// Groups holding data variables, in pre-order.
    pub fn data_nodes(&self) -> impl Iterator<Item = &TreeNode> {
        self.subtree().into_iter().filter(|node| node.has_data())
    }

    fn ensure_group(&mut self, path: &str) -> &mut TreeNode {
        if !self.nodes.contains_key(path) && !path.is_empty() {
            let parent = split_path(path).0.to_string();
            self.ensure_group(&parent).children.insert(path.to_string());
        }
        self.nodes
            .entry(path.to_string())
            .or_insert_with(|| TreeNode::new(path.to_string()))
    }

    fn insert_array(&mut self, manifest: &FlatManifest, path: &str) -> GridRefResult<()> {
        let Some(meta) = manifest.array_metadata(path)? else {
            return Ok(());
        };
        let attrs = manifest.attributes(Some(path))?.unwrap_or_default();
        let dims = manifest.array_dimensions(path)?;
        if dims.len() != meta.shape.len() {
            gridref_bail!(
                Manifest: "array {} declares {} dimensions for a shape of rank {}",
                path,
                dims.len(),
                meta.shape.len()
            );
        }
        let (parent, name) = split_path(path);
        let array = ArrayNode {
            name: name.to_string(),
            path: path.to_string(),
            dims,
            meta,
            attrs,
        };
        self.ensure_group(parent).arrays.insert(name.to_string(), array);
        Ok(())
    }
}

/// Split `a/b/c` into `("a/b", "c")`; a single segment has the root as parent.
fn split_path(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}
