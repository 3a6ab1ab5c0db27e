use std::collections::{BTreeMap, BTreeSet};

use gridref_error::{GridRefResult, gridref_bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::value::RefValue;
use crate::zarr::{Attributes, COORDINATES, RefStore, ZATTRS, is_metadata_key};

/// The only reference format version understood by gridref.
pub const REFERENCE_VERSION: u32 = 1;

/// The references produced by a decoder for a single physical record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceFragment {
    pub version: u32,
    pub refs: BTreeMap<String, RefValue>,
    /// Values substituted for `{{name}}` placeholders in reference URIs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub templates: BTreeMap<String, String>,
}

impl RefStore for ReferenceFragment {
    fn entries(&self) -> &BTreeMap<String, RefValue> {
        &self.refs
    }
}

impl ReferenceFragment {
    pub fn new(refs: BTreeMap<String, RefValue>) -> Self {
        Self {
            version: REFERENCE_VERSION,
            refs,
            templates: BTreeMap::new(),
        }
    }

    pub fn with_template(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.templates.insert(name.into(), value.into());
        self
    }

    pub fn check_version(&self) -> GridRefResult<()> {
        if self.version != REFERENCE_VERSION {
            gridref_bail!(
                Structure: "unsupported reference version {}, expected {}",
                self.version,
                REFERENCE_VERSION
            );
        }
        Ok(())
    }

    /// The distinct top-level names of the fragment, metadata keys excluded.
    pub fn top_level_names(&self) -> BTreeSet<&str> {
        self.refs
            .keys()
            .map(|key| key.split('/').next().unwrap_or(key.as_str()))
            .filter(|name| !is_metadata_key(name))
            .collect()
    }

    /// The group-level attributes. Every decoded record carries these.
    pub fn group_attrs(&self) -> GridRefResult<Attributes> {
        match self.attributes(None)? {
            Some(attrs) => Ok(attrs),
            None => gridref_bail!(Structure: "fragment has no group level {} entry", ZATTRS),
        }
    }

    /// The names listed in the group `coordinates` attribute, in declaration order.
    pub fn coordinates(&self) -> GridRefResult<Vec<String>> {
        let attrs = self.group_attrs()?;
        match attrs.get(COORDINATES) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::String(coords)) => Ok(coords
                .split(' ')
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()),
            Some(other) => gridref_bail!(Structure: "coordinates attribute is not a string: {}", other),
        }
    }

    /// Replace the inline JSON document at `key`.
    pub fn set_document(&mut self, key: impl Into<String>, document: &impl Serialize) -> GridRefResult<()> {
        self.refs
            .insert(key.into(), RefValue::text(serde_json::to_string(document)?));
        Ok(())
    }

    /// A copy of this fragment with `{{name}}` placeholders in URIs replaced by the template values.
    pub fn render_templates(&self) -> ReferenceFragment {
        if self.templates.is_empty() {
            return self.clone();
        }
        let refs = self
            .refs
            .iter()
            .map(|(key, value)| {
                let rendered = value.clone().map_uri(|uri| {
                    self.templates
                        .iter()
                        .fold(uri, |uri, (name, value)| uri.replace(&format!("{{{{{name}}}}}"), value))
                });
                (key.clone(), rendered)
            })
            .collect();
        ReferenceFragment {
            version: self.version,
            refs,
            templates: BTreeMap::new(),
        }
    }
}
