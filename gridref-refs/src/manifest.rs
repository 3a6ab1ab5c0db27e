use std::collections::BTreeMap;
use std::io::{Read, Write};

use gridref_error::GridRefResult;
use serde::{Deserialize, Serialize};

use crate::fragment::REFERENCE_VERSION;
use crate::value::RefValue;
use crate::zarr::RefStore;

/// The flat, path-keyed mapping that is persisted and exchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatManifest {
    pub version: u32,
    pub refs: BTreeMap<String, RefValue>,
}

impl RefStore for FlatManifest {
    fn entries(&self) -> &BTreeMap<String, RefValue> {
        &self.refs
    }
}

impl FromIterator<(String, RefValue)> for FlatManifest {
    fn from_iter<T: IntoIterator<Item = (String, RefValue)>>(iter: T) -> Self {
        FlatManifest::new(iter.into_iter().collect())
    }
}

impl FlatManifest {
    pub fn new(refs: BTreeMap<String, RefValue>) -> Self {
        Self {
            version: REFERENCE_VERSION,
            refs,
        }
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Decode every byte-valued entry into text, as the persisted format requires.
    pub fn into_text_values(self) -> GridRefResult<Self> {
        let refs = self
            .refs
            .into_iter()
            .map(|(key, value)| Ok((key, value.into_text()?)))
            .collect::<GridRefResult<_>>()?;
        Ok(Self {
            version: self.version,
            refs,
        })
    }

    pub fn to_json(&self) -> GridRefResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> GridRefResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn write_json(&self, writer: impl Write) -> GridRefResult<()> {
        Ok(serde_json::to_writer(writer, self)?)
    }

    pub fn read_json(reader: impl Read) -> GridRefResult<Self> {
        Ok(serde_json::from_reader(reader)?)
    }
}
